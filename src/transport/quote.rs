//! 行情通道
//!
//! 在 `DiffWebsocket` 之上叠加行情专用行为：
//!
//! - `rtn_data` 推送合并进行情快照（epoch 自增 + null 删除）
//! - 出站 `subscribe_quote` 按 ins_list 去重（重复订阅不转发）
//! - 出站 `set_chart` 按 chart_id 记录，view_width 为 0 时移除记录
//! - 重连时重放最近一次 `subscribe_quote` 和全部在订图表请求

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use super::websocket::{DiffWebsocket, WebsocketConfig};
use crate::protocol::diff::snapshot::SnapshotManager;
use crate::Result;

/// 行情 WebSocket 通道
pub struct QuoteChannel {
    ws: DiffWebsocket,
    dm: Arc<SnapshotManager>,
    /// 最近一次 subscribe_quote 请求
    subscribe_quote: Mutex<Option<Value>>,
    /// chart_id -> 最近一次 set_chart 请求
    charts: RwLock<HashMap<String, Value>>,
}

impl QuoteChannel {
    /// 创建行情通道（连接由 `init` 触发）
    pub fn new(urls: Vec<String>, dm: Arc<SnapshotManager>, config: WebsocketConfig) -> Arc<Self> {
        let channel = Arc::new(Self {
            ws: DiffWebsocket::new(urls, config),
            dm,
            subscribe_quote: Mutex::new(None),
            charts: RwLock::new(HashMap::new()),
        });
        channel.init_handlers();
        channel
    }

    fn init_handlers(self: &Arc<Self>) {
        let dm = self.dm.clone();
        self.ws.on_message(move |data| {
            let aid = data.get("aid").and_then(Value::as_str);
            if aid == Some("rtn_data") {
                if let Some(payload) = data.get("data") {
                    dm.merge_data(payload, true, true);
                }
            }
        });

        let weak = Arc::downgrade(self);
        self.ws.on_reconnect(move || {
            if let Some(channel) = weak.upgrade() {
                channel.replay_requests();
            }
        });
    }

    /// 重连重放：最近一次订阅 + 所有在订图表（view_width > 0）
    ///
    /// 在 on_reconnect 时机入队，重拨成功后先于任何新入站帧冲刷出去。
    fn replay_requests(&self) {
        let subscribe = self.subscribe_quote.lock().clone();
        if let Some(subscribe) = subscribe {
            self.ws.enqueue(&subscribe);
        }

        for chart in self.charts.read().values() {
            if view_width_of(chart) > 0 {
                self.ws.enqueue(chart);
            }
        }
    }

    /// 发送请求，附带订阅/图表的记录与去重
    pub async fn send(&self, obj: &Value) -> Result<()> {
        if !self.record_outbound(obj) {
            return Ok(());
        }
        self.ws.send(obj).await
    }

    /// 记录出站请求；返回 false 表示请求冗余，应丢弃
    fn record_outbound(&self, obj: &Value) -> bool {
        let aid = match obj.get("aid").and_then(Value::as_str) {
            Some(aid) => aid,
            None => return true,
        };

        match aid {
            "subscribe_quote" => {
                let mut recorded = self.subscribe_quote.lock();
                let changed = match recorded.as_ref() {
                    Some(prev) => prev.get("ins_list") != obj.get("ins_list"),
                    None => true,
                };
                if changed {
                    *recorded = Some(obj.clone());
                }
                changed
            }

            "set_chart" => {
                if let Some(chart_id) = obj.get("chart_id").and_then(Value::as_str) {
                    let mut charts = self.charts.write();
                    if view_width_of(obj) == 0 {
                        charts.remove(chart_id);
                    } else {
                        charts.insert(chart_id.to_string(), obj.clone());
                    }
                }
                true
            }

            _ => true,
        }
    }

    /// 发起连接
    pub async fn init(&self, is_reconnect: bool) -> Result<()> {
        self.ws.init(is_reconnect).await
    }

    /// 关闭通道
    pub async fn close(&self) {
        self.ws.close().await;
    }

    /// 底层 WebSocket（注册 on_error / on_death 等）
    pub fn websocket(&self) -> &DiffWebsocket {
        &self.ws
    }

    /// 行情快照
    pub fn snapshot(&self) -> &Arc<SnapshotManager> {
        &self.dm
    }
}

fn view_width_of(obj: &Value) -> i64 {
    match obj.get("view_width") {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn channel() -> Arc<QuoteChannel> {
        let dm = Arc::new(SnapshotManager::new(SnapshotManager::market_skeleton()));
        QuoteChannel::new(
            vec!["ws://127.0.0.1:1/md".to_string()],
            dm,
            WebsocketConfig::default(),
        )
    }

    #[test]
    fn test_subscribe_quote_dedupe() {
        let ch = channel();

        let sub = json!({"aid": "subscribe_quote", "ins_list": "SHFE.au2602"});
        assert!(ch.record_outbound(&sub));
        // 相同 ins_list 不再转发
        assert!(!ch.record_outbound(&sub));
        // ins_list 变化后转发并更新记录
        let sub2 = json!({"aid": "subscribe_quote", "ins_list": "SHFE.au2602,SHFE.ag2512"});
        assert!(ch.record_outbound(&sub2));
        assert_eq!(
            ch.subscribe_quote.lock().as_ref().unwrap()["ins_list"],
            "SHFE.au2602,SHFE.ag2512"
        );
    }

    #[test]
    fn test_set_chart_record_and_unsubscribe() {
        let ch = channel();

        let chart = json!({"aid": "set_chart", "chart_id": "c1",
                           "ins_list": "X", "duration": 60_000_000_000i64, "view_width": 500});
        assert!(ch.record_outbound(&chart));
        assert!(ch.charts.read().contains_key("c1"));

        // view_width 0 为退订，移除记录但仍转发
        let unsub = json!({"aid": "set_chart", "chart_id": "c1",
                           "ins_list": "", "duration": 60_000_000_000i64, "view_width": 0});
        assert!(ch.record_outbound(&unsub));
        assert!(!ch.charts.read().contains_key("c1"));
    }

    #[test]
    fn test_replay_after_reconnect() {
        let ch = channel();

        ch.record_outbound(&json!({"aid": "subscribe_quote", "ins_list": "X"}));
        ch.record_outbound(&json!({"aid": "set_chart", "chart_id": "c1",
                                   "ins_list": "X", "duration": 60_000_000_000i64, "view_width": 500}));
        ch.record_outbound(&json!({"aid": "set_chart", "chart_id": "c2",
                                   "ins_list": "Y", "duration": 0, "view_width": 0}));

        ch.replay_requests();

        let queued = ch.ws.queued_messages();
        // 退订过的 c2 不重放
        assert_eq!(queued.len(), 2);
        assert!(queued.iter().any(|m| m.contains("subscribe_quote") && m.contains("\"X\"")));
        assert!(queued.iter().any(|m| m.contains("set_chart") && m.contains("c1")));
        assert!(!queued.iter().any(|m| m.contains("c2")));
    }

    #[test]
    fn test_other_aids_pass_through() {
        let ch = channel();
        assert!(ch.record_outbound(&json!({"aid": "peek_message"})));
        assert!(ch.record_outbound(&json!({"no_aid": true})));
    }
}
