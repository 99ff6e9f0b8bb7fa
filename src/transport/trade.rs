//! 交易通道
//!
//! 在 `DiffWebsocket` 之上叠加交易专用行为：
//!
//! - `rtn_data`: 先把差分元素里夹带的 `notify` 提取为通知事件
//!   （并从差分中删掉，避免污染业务快照），剩余部分再合并
//! - `rtn_brokers`: 期货公司列表逐条合并
//! - `qry_settlement_info`: 解析结算单文本，按交易日合并进
//!   `trade/<user>/his_settlements/<trading_day>`
//! - 出站 `req_login` 记录下来，重连时重放

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};

use super::websocket::{DiffWebsocket, WebsocketConfig};
use crate::protocol::diff::settlement::parse_settlement_content;
use crate::protocol::diff::snapshot::SnapshotManager;
use crate::protocol::diff::types::Notify;
use crate::Result;

type NotifyCallback = Arc<dyn Fn(Notify) + Send + Sync + 'static>;

/// 交易 WebSocket 通道
pub struct TradeChannel {
    ws: DiffWebsocket,
    dm: Arc<SnapshotManager>,
    /// 最近一次登录请求（重连重放用）
    req_login: Mutex<Option<Value>>,
    on_notify: RwLock<Option<NotifyCallback>>,
}

impl TradeChannel {
    /// 创建交易通道（连接由 `init` 触发）
    pub fn new(urls: Vec<String>, dm: Arc<SnapshotManager>, config: WebsocketConfig) -> Arc<Self> {
        let channel = Arc::new(Self {
            ws: DiffWebsocket::new(urls, config),
            dm,
            req_login: Mutex::new(None),
            on_notify: RwLock::new(None),
        });
        channel.init_handlers();
        channel
    }

    fn init_handlers(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.ws.on_message(move |data| {
            if let Some(channel) = weak.upgrade() {
                channel.handle_message(&data);
            }
        });

        let weak = Arc::downgrade(self);
        self.ws.on_reconnect(move || {
            if let Some(channel) = weak.upgrade() {
                let login = channel.req_login.lock().clone();
                if let Some(login) = login {
                    channel.ws.enqueue(&login);
                }
            }
        });
    }

    /// 注册通知回调
    pub fn on_notify<F: Fn(Notify) + Send + Sync + 'static>(&self, callback: F) {
        *self.on_notify.write() = Some(Arc::new(callback));
    }

    fn handle_message(&self, data: &Value) {
        let aid = match data.get("aid").and_then(Value::as_str) {
            Some(aid) => aid,
            None => return,
        };

        match aid {
            "rtn_data" => {
                if let Some(Value::Array(payload)) = data.get("data") {
                    let (notifies, residual) = separate_notifies(payload);

                    let callback = self.on_notify.read().clone();
                    if let Some(callback) = callback {
                        for notify in notifies {
                            callback(notify);
                        }
                    }

                    self.dm.merge_data(&Value::Array(residual), true, true);
                }
            }

            "rtn_brokers" => {
                if let Some(Value::Array(brokers)) = data.get("brokers") {
                    for broker in brokers {
                        if broker.is_object() {
                            self.dm.merge_data(broker, true, true);
                        }
                    }
                }
            }

            "qry_settlement_info" => {
                let settlement_info = data.get("settlement_info").and_then(Value::as_str);
                let user_name = data.get("user_name").and_then(Value::as_str);
                let trading_day = data.get("trading_day").and_then(Value::as_str);

                if let (Some(text), Some(user_name), Some(trading_day)) =
                    (settlement_info, user_name, trading_day)
                {
                    let mut settlement = parse_settlement_content(text);
                    settlement.trading_day = trading_day.to_string();

                    if let Ok(settlement) = serde_json::to_value(&settlement) {
                        self.dm.merge_data(
                            &json!({
                                "trade": {
                                    user_name: {
                                        "his_settlements": {
                                            trading_day: settlement
                                        }
                                    }
                                }
                            }),
                            true,
                            true,
                        );
                    }
                }
            }

            // 未知 aid 忽略
            _ => {}
        }
    }

    /// 发送请求，登录请求记录下来供重连重放
    pub async fn send(&self, obj: &Value) -> Result<()> {
        if obj.get("aid").and_then(Value::as_str) == Some("req_login") {
            *self.req_login.lock() = Some(obj.clone());
        }
        self.ws.send(obj).await
    }

    /// 发起连接
    pub async fn init(&self, is_reconnect: bool) -> Result<()> {
        self.ws.init(is_reconnect).await
    }

    /// 关闭通道
    pub async fn close(&self) {
        self.ws.close().await;
    }

    /// 底层 WebSocket
    pub fn websocket(&self) -> &DiffWebsocket {
        &self.ws
    }

    /// 交易快照
    pub fn snapshot(&self) -> &Arc<SnapshotManager> {
        &self.dm
    }
}

/// 提取差分元素里的 notify 通知
///
/// 返回 (通知列表, 剔除 notify 字段后的差分)。notify 字段本身
/// 是 `通知ID -> 通知体` 的映射。
pub(crate) fn separate_notifies(data: &[Value]) -> (Vec<Notify>, Vec<Value>) {
    let mut notifies = Vec::new();
    let mut residual = Vec::with_capacity(data.len());

    for item in data {
        let mut item = item.clone();

        if let Some(obj) = item.as_object_mut() {
            if let Some(notify_map) = obj.remove("notify") {
                if let Value::Object(notify_map) = notify_map {
                    for (_, notify_data) in notify_map {
                        if !notify_data.is_object() {
                            continue;
                        }
                        if let Ok(notify) = serde_json::from_value::<Notify>(notify_data) {
                            notifies.push(notify);
                        }
                    }
                }
            }
        }

        residual.push(item);
    }

    (notifies, residual)
}
