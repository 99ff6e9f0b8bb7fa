//! DIFF WebSocket 客户端基类
//!
//! 实现 TIFI 传输机制的客户端半边：
//!
//! - **队列发送**: 未连接时消息进 FIFO 队列，连接建立后按序冲刷
//! - **接收循环**: 每解码一帧入站 JSON 后回发 `peek_message`，
//!   作为服务端下一批差分的流控信号
//! - **自动重连**: 断开后按间隔轮换 URL 重拨；重连前触发 `on_reconnect`
//!   让上层把需要重放的请求塞回队列；超过重连预算后触发 `on_death`
//!
//! # 状态机
//!
//! ```text
//! Closed ──init──▶ Connecting ──握手成功──▶ Open
//!    ▲                 │                     │
//!    └────握手失败──────┘      读写错误/主动关闭
//!    ▲                                       │
//!    └───────────────────────────────────────┘
//! ```
//!
//! 单条连接内帧按接收顺序投递；跨重连不保序，由应用层序列化。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::{ClientError, Result};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// WebSocket 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsStatus {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// WebSocket 配置
#[derive(Debug, Clone)]
pub struct WebsocketConfig {
    /// 握手时附带的 HTTP 头（含鉴权）
    pub headers: Vec<(String, String)>,
    /// 重连间隔
    pub reconnect_interval: Duration,
    /// 最大重连次数（URL 列表轮换一圈记一次）
    pub reconnect_max_times: usize,
}

impl Default for WebsocketConfig {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            reconnect_interval: Duration::from_secs(3),
            reconnect_max_times: 2,
        }
    }
}

type MessageCallback = Arc<dyn Fn(Value) + Send + Sync + 'static>;
type EventCallback = Arc<dyn Fn() + Send + Sync + 'static>;
type ErrorCallback = Arc<dyn Fn(String) + Send + Sync + 'static>;

#[derive(Default)]
struct WsCallbacks {
    on_message: Option<MessageCallback>,
    on_open: Option<EventCallback>,
    on_close: Option<EventCallback>,
    on_reconnect: Option<EventCallback>,
    on_error: Option<ErrorCallback>,
    on_death: Option<ErrorCallback>,
}

struct WsInner {
    urls: Vec<String>,
    config: WebsocketConfig,
    status: RwLock<WsStatus>,
    queue: Mutex<VecDeque<String>>,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    reconnect: AtomicBool,
    reconnect_times: AtomicUsize,
    reconnect_url_index: AtomicUsize,
    callbacks: RwLock<WsCallbacks>,
    shutdown: CancellationToken,
}

/// DIFF WebSocket 客户端
#[derive(Clone)]
pub struct DiffWebsocket {
    inner: Arc<WsInner>,
}

impl DiffWebsocket {
    /// 创建客户端（不发起连接，连接由 `init` 触发）
    pub fn new(urls: Vec<String>, config: WebsocketConfig) -> Self {
        Self {
            inner: Arc::new(WsInner {
                urls,
                config,
                status: RwLock::new(WsStatus::Closed),
                queue: Mutex::new(VecDeque::new()),
                sink: tokio::sync::Mutex::new(None),
                reconnect: AtomicBool::new(true),
                reconnect_times: AtomicUsize::new(0),
                reconnect_url_index: AtomicUsize::new(0),
                callbacks: RwLock::new(WsCallbacks::default()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    // ========================================================================
    // 事件回调注册
    // ========================================================================

    pub fn on_message<F: Fn(Value) + Send + Sync + 'static>(&self, callback: F) {
        self.inner.callbacks.write().on_message = Some(Arc::new(callback));
    }

    pub fn on_open<F: Fn() + Send + Sync + 'static>(&self, callback: F) {
        self.inner.callbacks.write().on_open = Some(Arc::new(callback));
    }

    pub fn on_close<F: Fn() + Send + Sync + 'static>(&self, callback: F) {
        self.inner.callbacks.write().on_close = Some(Arc::new(callback));
    }

    pub fn on_reconnect<F: Fn() + Send + Sync + 'static>(&self, callback: F) {
        self.inner.callbacks.write().on_reconnect = Some(Arc::new(callback));
    }

    pub fn on_error<F: Fn(String) + Send + Sync + 'static>(&self, callback: F) {
        self.inner.callbacks.write().on_error = Some(Arc::new(callback));
    }

    /// 重连预算耗尽后触发（终态）
    pub fn on_death<F: Fn(String) + Send + Sync + 'static>(&self, callback: F) {
        self.inner.callbacks.write().on_death = Some(Arc::new(callback));
    }

    // ========================================================================
    // 连接管理
    // ========================================================================

    /// 发起（或重新发起）连接
    pub async fn init(&self, is_reconnect: bool) -> Result<()> {
        Self::init_inner(self.inner.clone(), is_reconnect).await
    }

    async fn init_inner(inner: Arc<WsInner>, is_reconnect: bool) -> Result<()> {
        if inner.urls.is_empty() {
            return Err(ClientError::InvalidParameter("no URL provided".to_string()));
        }

        let url_index = inner.reconnect_url_index.load(Ordering::SeqCst) % inner.urls.len();
        let url = inner.urls[url_index].clone();

        log::info!(
            "Connecting to WebSocket: url={}, reconnection={}, reconnect_times={}",
            url,
            is_reconnect,
            inner.reconnect_times.load(Ordering::SeqCst)
        );

        // 轮换到列表末尾仍在重连，计一次重连
        if is_reconnect && url_index == inner.urls.len() - 1 {
            inner.reconnect_times.fetch_add(1, Ordering::SeqCst);
        }

        *inner.status.write() = WsStatus::Connecting;

        let request = match build_request(&url, &inner.config.headers) {
            Ok(r) => r,
            Err(e) => {
                *inner.status.write() = WsStatus::Closed;
                return Err(e);
            }
        };

        match connect_async(request).await {
            Ok((ws_stream, _response)) => {
                let (sink, stream) = ws_stream.split();
                *inner.sink.lock().await = Some(sink);
                *inner.status.write() = WsStatus::Open;

                let cb = inner.callbacks.read().on_open.clone();
                if let Some(cb) = cb {
                    cb();
                }

                Self::flush_queue(&inner).await;

                tokio::spawn(Self::receive_loop(inner.clone(), stream));
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to connect WebSocket: url={}, err={}", url, e);
                *inner.status.write() = WsStatus::Closed;

                let cb = inner.callbacks.read().on_error.clone();
                if let Some(cb) = cb {
                    cb(e.to_string());
                }

                Self::handle_close(inner);
                Err(ClientError::TransportError(e.to_string()))
            }
        }
    }

    /// 连接是否就绪
    pub fn is_ready(&self) -> bool {
        *self.inner.status.read() == WsStatus::Open
    }

    /// 当前连接状态
    pub fn status(&self) -> WsStatus {
        *self.inner.status.read()
    }

    /// 关闭连接并停止自动重连
    pub async fn close(&self) {
        self.inner.reconnect.store(false, Ordering::SeqCst);
        *self.inner.status.write() = WsStatus::Closing;
        self.inner.shutdown.cancel();

        let mut sink = self.inner.sink.lock().await;
        if let Some(mut s) = sink.take() {
            let _ = s.send(Message::Close(None)).await;
            let _ = s.close().await;
        }
        *self.inner.status.write() = WsStatus::Closed;
    }

    // ========================================================================
    // 发送
    // ========================================================================

    /// 发送消息：连接就绪时直接写出，否则进 FIFO 队列
    ///
    /// 字符串原样发送，其他值序列化为 JSON。
    pub async fn send(&self, obj: &Value) -> Result<()> {
        let text = match obj {
            Value::String(s) => s.clone(),
            _ => serde_json::to_string(obj)?,
        };
        Self::send_text_inner(&self.inner, text).await
    }

    /// 把消息直接塞进发送队列（同步，供重连回调重放请求使用）
    pub fn enqueue(&self, obj: &Value) {
        let text = match obj {
            Value::String(s) => s.clone(),
            _ => match serde_json::to_string(obj) {
                Ok(t) => t,
                Err(_) => return,
            },
        };
        self.inner.queue.lock().push_back(text);
    }

    async fn send_text_inner(inner: &Arc<WsInner>, text: String) -> Result<()> {
        if *inner.status.read() == WsStatus::Open {
            let mut sink = inner.sink.lock().await;
            if let Some(sink) = sink.as_mut() {
                log::debug!("WebSocket sending message: {}", text);
                if let Err(e) = sink.send(Message::Text(text)).await {
                    log::error!("Failed to send message: {}", e);
                    return Err(ClientError::TransportError(e.to_string()));
                }
                return Ok(());
            }
        }

        log::debug!("WebSocket not ready, queueing message: {}", text);
        inner.queue.lock().push_back(text);
        Ok(())
    }

    /// 冲刷发送队列（按入队顺序）
    async fn flush_queue(inner: &Arc<WsInner>) {
        loop {
            let text = {
                let mut queue = inner.queue.lock();
                match queue.pop_front() {
                    Some(t) => t,
                    None => break,
                }
            };

            if *inner.status.read() != WsStatus::Open {
                inner.queue.lock().push_front(text);
                break;
            }

            let mut sink = inner.sink.lock().await;
            if let Some(sink) = sink.as_mut() {
                log::debug!("Flushing queued message: {}", text);
                if let Err(e) = sink.send(Message::Text(text)).await {
                    log::error!("Failed to flush queued message: {}", e);
                    break;
                }
            }
        }
    }

    // ========================================================================
    // 接收循环
    // ========================================================================

    async fn receive_loop(inner: Arc<WsInner>, mut stream: WsStream) {
        loop {
            let message = tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                msg = stream.next() => msg,
            };

            let message = match message {
                Some(Ok(m)) => m,
                Some(Err(e)) => {
                    log::error!("Failed to read message: {}", e);
                    let cb = inner.callbacks.read().on_error.clone();
                    if let Some(cb) = cb {
                        cb(e.to_string());
                    }
                    break;
                }
                None => break,
            };

            let text = match message {
                Message::Text(text) => text,
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => continue,
                },
                Message::Close(_) => break,
                _ => continue,
            };

            log::debug!("WebSocket received message: length={}", text.len());

            let data = match serde_json::from_str::<Value>(&text) {
                Ok(v @ Value::Object(_)) => v,
                Ok(_) | Err(_) => {
                    // 解析失败只丢这一帧，连接保留
                    log::error!("Failed to unmarshal message: {}", text);
                    continue;
                }
            };

            let cb = inner.callbacks.read().on_message.clone();
            if let Some(cb) = cb {
                cb(data);
            }

            // 流控：每处理完一帧，请求服务端发送下一批差分
            let _ =
                Self::send_text_inner(&inner, r#"{"aid":"peek_message"}"#.to_string()).await;
        }

        *inner.status.write() = WsStatus::Closed;
        Self::handle_close(inner);
    }

    // ========================================================================
    // 关闭与重连
    // ========================================================================

    fn handle_close(inner: Arc<WsInner>) {
        log::info!("WebSocket connection closed");

        let cb = inner.callbacks.read().on_close.clone();
        if let Some(cb) = cb {
            cb();
        }

        inner.queue.lock().clear();

        if !inner.reconnect.load(Ordering::SeqCst) {
            return;
        }

        let times = inner.reconnect_times.load(Ordering::SeqCst);
        if times >= inner.config.reconnect_max_times {
            log::error!("Max reconnect times reached: {}", inner.config.reconnect_max_times);
            let cb = inner.callbacks.read().on_death.clone();
            if let Some(cb) = cb {
                cb(format!("超过最大重连次数 {}", inner.config.reconnect_max_times));
            }
            return;
        }

        log::info!(
            "Scheduling reconnect: interval={:?}, times={}",
            inner.config.reconnect_interval,
            times
        );

        let task_inner = inner.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = task_inner.shutdown.cancelled() => return,
                _ = tokio::time::sleep(task_inner.config.reconnect_interval) => {}
            }

            let len = task_inner.urls.len().max(1);
            let next = (task_inner.reconnect_url_index.load(Ordering::SeqCst) + 1) % len;
            task_inner.reconnect_url_index.store(next, Ordering::SeqCst);

            // 重连回调先于重拨：上层重放的请求进入空队列，
            // 连接建立后先于任何新入站帧发出
            let cb = task_inner.callbacks.read().on_reconnect.clone();
            if let Some(cb) = cb {
                cb();
            }

            let _ = Self::init_inner(task_inner, true).await;
        });
    }

    /// 当前队列长度（测试用）
    #[cfg(test)]
    pub(crate) fn queue_len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// 取出队列内容（测试用）
    #[cfg(test)]
    pub(crate) fn queued_messages(&self) -> Vec<String> {
        self.inner.queue.lock().iter().cloned().collect()
    }
}

fn build_request(
    url: &str,
    headers: &[(String, String)],
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request> {
    let mut request = url
        .into_client_request()
        .map_err(|e| ClientError::TransportError(e.to_string()))?;

    for (key, value) in headers {
        let name = key
            .parse::<HeaderName>()
            .map_err(|e| ClientError::InvalidParameter(e.to_string()))?;
        let value = value
            .parse::<HeaderValue>()
            .map_err(|e| ClientError::InvalidParameter(e.to_string()))?;
        request.headers_mut().insert(name, value);
    }

    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_send_queues_when_closed() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let ws = DiffWebsocket::new(vec!["ws://127.0.0.1:1/ws".to_string()], WebsocketConfig::default());
        rt.block_on(async {
            ws.send(&json!({"aid": "subscribe_quote", "ins_list": "X"})).await.unwrap();
        });

        assert_eq!(ws.queue_len(), 1);
        assert!(ws.queued_messages()[0].contains("subscribe_quote"));
    }

    #[test]
    fn test_enqueue_preserves_order() {
        let ws = DiffWebsocket::new(vec!["ws://127.0.0.1:1/ws".to_string()], WebsocketConfig::default());
        ws.enqueue(&json!({"aid": "req_login"}));
        ws.enqueue(&json!({"aid": "subscribe_quote", "ins_list": "X"}));

        let queued = ws.queued_messages();
        assert!(queued[0].contains("req_login"));
        assert!(queued[1].contains("subscribe_quote"));
    }

    #[test]
    fn test_string_passthrough() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let ws = DiffWebsocket::new(vec!["ws://127.0.0.1:1/ws".to_string()], WebsocketConfig::default());
        rt.block_on(async {
            ws.send(&json!("raw string payload")).await.unwrap();
        });
        assert_eq!(ws.queued_messages()[0], "raw string payload");
    }

    #[test]
    fn test_status_initially_closed() {
        let ws = DiffWebsocket::new(vec![], WebsocketConfig::default());
        assert_eq!(ws.status(), WsStatus::Closed);
        assert!(!ws.is_ready());
    }
}
