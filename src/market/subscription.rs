//! Quote 全局订阅
//!
//! 一个客户端只有一份 Quote 订阅：新增/移除合约都会把并集重新发给
//! 服务端（`subscribe_quote` 的 ins_list 是全量语义），去重由行情
//! 通道负责。更新按 Channel + Callback 双通路投递，不区分合约，
//! 订阅方自行过滤。

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::protocol::diff::snapshot::SnapshotManager;
use crate::protocol::diff::types::Quote;
use crate::protocol::messages::DiffClientMessage;
use crate::transport::QuoteChannel;
use crate::utils::Emitter;
use crate::Result;

/// Quote 更新通道容量
const QUOTE_CHANNEL_CAPACITY: usize = 100;

/// Quote 订阅（全局）
pub struct QuoteSubscription {
    dm: Arc<SnapshotManager>,
    channel: Arc<QuoteChannel>,
    /// 订阅的合约集合（有序，保证 ins_list 稳定以便通道去重）
    symbols: RwLock<BTreeSet<String>>,
    emitter: Emitter<Quote>,
    closed: AtomicBool,
}

impl QuoteSubscription {
    pub(crate) fn new(dm: Arc<SnapshotManager>, channel: Arc<QuoteChannel>) -> Arc<Self> {
        let subscription = Arc::new(Self {
            dm: dm.clone(),
            channel,
            symbols: RwLock::new(BTreeSet::new()),
            emitter: Emitter::new(QUOTE_CHANNEL_CAPACITY),
            closed: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&subscription);
        dm.on_data(move || {
            if let Some(subscription) = weak.upgrade() {
                subscription.process_update();
            }
        });

        subscription
    }

    /// 添加订阅合约并重发全量订阅
    pub async fn add_symbols(&self, symbols: &[String]) -> Result<()> {
        if symbols.is_empty() {
            return Ok(());
        }

        {
            let mut set = self.symbols.write();
            for symbol in symbols {
                set.insert(symbol.clone());
            }
        }

        self.send_subscribe().await
    }

    /// 移除订阅合约并重发全量订阅
    pub async fn remove_symbols(&self, symbols: &[String]) -> Result<()> {
        if symbols.is_empty() {
            return Ok(());
        }

        {
            let mut set = self.symbols.write();
            for symbol in symbols {
                set.remove(symbol);
            }
        }

        self.send_subscribe().await
    }

    /// 当前订阅的合约集合
    pub fn symbols(&self) -> Vec<String> {
        self.symbols.read().iter().cloned().collect()
    }

    async fn send_subscribe(&self) -> Result<()> {
        let ins_list = {
            let set = self.symbols.read();
            set.iter().cloned().collect::<Vec<_>>().join(",")
        };

        log::info!("Sending quote subscription: ins_list={}", ins_list);

        let request = DiffClientMessage::SubscribeQuote { ins_list };
        self.channel.send(&request.to_value()).await
    }

    /// 获取 Quote 更新流（不区分合约）
    pub fn quote_channel(&self) -> mpsc::Receiver<Quote> {
        self.emitter.subscribe()
    }

    /// 注册 Quote 回调（不区分合约，用户自行过滤）
    pub fn on_quote<F: Fn(Quote) + Send + Sync + 'static>(&self, handler: F) {
        self.emitter.on(handler);
    }

    /// 每次 epoch 自增合并后，把发生变化的订阅合约 Quote 扇出
    fn process_update(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let symbols = self.symbols();
        for symbol in symbols {
            if !self.dm.is_changing(&["quotes", &symbol]) {
                continue;
            }
            match self.dm.get_quote(&symbol) {
                Ok(quote) => self.emitter.emit(quote),
                Err(_) => continue,
            }
        }
    }

    /// 关闭订阅（停止投递；不向服务端发退订，合约集保留给通道重放）
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::WebsocketConfig;
    use serde_json::json;

    fn setup() -> (Arc<SnapshotManager>, Arc<QuoteSubscription>) {
        let dm = Arc::new(SnapshotManager::new(SnapshotManager::market_skeleton()));
        let channel = QuoteChannel::new(
            vec!["ws://127.0.0.1:1/md".to_string()],
            dm.clone(),
            WebsocketConfig::default(),
        );
        let subscription = QuoteSubscription::new(dm.clone(), channel);
        (dm, subscription)
    }

    #[tokio::test]
    async fn test_symbol_union() {
        let (_dm, subscription) = setup();

        subscription
            .add_symbols(&["SHFE.au2602".to_string(), "SHFE.ag2512".to_string()])
            .await
            .unwrap();
        subscription.add_symbols(&["SHFE.au2602".to_string()]).await.unwrap();

        assert_eq!(
            subscription.symbols(),
            vec!["SHFE.ag2512".to_string(), "SHFE.au2602".to_string()]
        );

        subscription
            .remove_symbols(&["SHFE.ag2512".to_string()])
            .await
            .unwrap();
        assert_eq!(subscription.symbols(), vec!["SHFE.au2602".to_string()]);
    }

    #[tokio::test]
    async fn test_quote_delivery_on_change() {
        let (dm, subscription) = setup();
        subscription.add_symbols(&["SHFE.au2602".to_string()]).await.unwrap();

        let mut rx = subscription.quote_channel();

        dm.merge_data(
            &json!({"quotes": {"SHFE.au2602": {"instrument_id": "SHFE.au2602", "last_price": 500.0}}}),
            true,
            true,
        );

        let quote = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert_eq!(quote.instrument_id, "SHFE.au2602");
        assert_eq!(quote.last_price, 500.0);

        // 其他合约的更新不触发投递
        dm.merge_data(
            &json!({"quotes": {"SHFE.cu2603": {"last_price": 70000.0}}}),
            true,
            true,
        );
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_subscription_stops_delivery() {
        let (dm, subscription) = setup();
        subscription.add_symbols(&["SHFE.au2602".to_string()]).await.unwrap();
        let mut rx = subscription.quote_channel();

        subscription.close();
        dm.merge_data(
            &json!({"quotes": {"SHFE.au2602": {"last_price": 500.0}}}),
            true,
            true,
        );
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }
}
