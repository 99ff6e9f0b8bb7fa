//! 交易会话
//!
//! 每个期货账户一个会话：独立的业务快照 + 独立的交易通道。
//!
//! # 数据流
//!
//! ```text
//! TradeChannel (rtn_data) ──merge──▶ SnapshotManager
//!                                        │ on_data
//!                                        ▼
//!                                  process_update
//!             ┌──────────┬──────────┬────┴─────┬──────────┐
//!          accounts   positions   orders    trades   notifications
//!          (cap 10)   (cap 10)   (cap 100) (cap 100)  (cap 10)
//! ```
//!
//! 每条通路都是 Channel + Callback 双投递，满了丢弃（状态幂等，
//! 订阅方下次总能拿到最新快照）。本地乐观落单（insert_order 的
//! ALIVE 种子）走不增 epoch 的合并，不触发任何投递。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use crate::protocol::diff::snapshot::SnapshotManager;
use crate::protocol::diff::types::{
    Account, HisSettlement, InsertOrderRequest, Notify, Order, Position, PositionUpdate, Trade,
    ORDER_STATUS_ALIVE, PRICE_TYPE_ANY,
};
use crate::protocol::messages::DiffClientMessage;
use crate::transport::{TradeChannel, WebsocketConfig};
use crate::utils::{random_str, Emitter};
use crate::{ClientError, Result};

/// 订单 ID 前缀
const ORDER_ID_PREFIX: &str = "QADIFF_";

/// 交易会话配置
#[derive(Debug, Clone, Default)]
pub struct TradeSessionConfig {
    pub client_app_id: Option<String>,
    pub client_system_info: Option<String>,
    pub ws_config: WebsocketConfig,
}

impl TradeSessionConfig {
    /// 仅指定 WebSocket 配置，其余取默认
    pub fn with_ws_config(ws_config: WebsocketConfig) -> Self {
        Self {
            client_app_id: None,
            client_system_info: None,
            ws_config,
        }
    }
}

/// 交易会话
pub struct TradeSession {
    broker: String,
    user_id: String,
    password: String,
    config: TradeSessionConfig,

    dm: Arc<SnapshotManager>,
    channel: Arc<TradeChannel>,

    // 事件扇出
    accounts: Emitter<Account>,
    positions_single: Emitter<PositionUpdate>,
    positions_all: Emitter<HashMap<String, Position>>,
    orders: Emitter<Order>,
    trades: Emitter<Trade>,
    notifications: Emitter<Notify>,

    logged_in: AtomicBool,
    connected: AtomicBool,
    settlement_confirmed: AtomicBool,
    closed: AtomicBool,
}

impl TradeSession {
    /// 创建交易会话（不连接，连接由 `connect` 触发）
    pub fn new(
        broker: &str,
        user_id: &str,
        password: &str,
        urls: Vec<String>,
        config: TradeSessionConfig,
    ) -> Result<Arc<Self>> {
        if broker.is_empty() || user_id.is_empty() || password.is_empty() {
            return Err(ClientError::InvalidParameter(
                "broker, user_id, password cannot be empty".to_string(),
            ));
        }

        let dm = Arc::new(SnapshotManager::new(SnapshotManager::trade_skeleton(user_id)));
        let channel = TradeChannel::new(urls, dm.clone(), config.ws_config.clone());

        let session = Arc::new(Self {
            broker: broker.to_string(),
            user_id: user_id.to_string(),
            password: password.to_string(),
            config,
            dm: dm.clone(),
            channel: channel.clone(),
            accounts: Emitter::new(10),
            positions_single: Emitter::new(10),
            positions_all: Emitter::new(10),
            orders: Emitter::new(100),
            trades: Emitter::new(100),
            notifications: Emitter::new(10),
            logged_in: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            settlement_confirmed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        // 通知事件补全账户标识后扇出
        {
            let weak = Arc::downgrade(&session);
            let broker = broker.to_string();
            let user_id = user_id.to_string();
            channel.on_notify(move |mut notify| {
                if let Some(session) = weak.upgrade() {
                    notify.bid = broker.clone();
                    notify.user_id = user_id.clone();
                    session.notifications.emit(notify);
                }
            });
        }

        // 数据监听
        {
            let weak = Arc::downgrade(&session);
            dm.on_data(move || {
                if let Some(session) = weak.upgrade() {
                    session.process_update();
                }
            });
        }

        Ok(session)
    }

    /// 连接并登录交易服务器（幂等，可用于重连场景）
    pub async fn connect(&self) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }

        if !self.connected.swap(true, Ordering::SeqCst) {
            if let Err(e) = self.channel.init(false).await {
                self.connected.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }

        let request = DiffClientMessage::ReqLogin {
            bid: self.broker.clone(),
            user_name: self.user_id.clone(),
            password: self.password.clone(),
            client_app_id: self.config.client_app_id.clone(),
            client_system_info: self.config.client_system_info.clone(),
        };
        self.channel.send(&request.to_value()).await?;

        log::info!("Sent login request: broker={}, user_id={}", self.broker, self.user_id);
        Ok(())
    }

    /// 会话是否就绪（服务端已下发非空 trading_day）
    pub fn is_ready(&self) -> bool {
        let session = self
            .dm
            .get_by_path(&["trade", &self.user_id, "session", "trading_day"]);
        matches!(session, Some(Value::String(day)) if !day.is_empty())
    }

    /// 期货公司
    pub fn broker(&self) -> &str {
        &self.broker
    }

    /// 账户 ID
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// 会话的业务快照
    pub fn snapshot(&self) -> &Arc<SnapshotManager> {
        &self.dm
    }

    // ========================================================================
    // 交易操作
    // ========================================================================

    /// 下单
    ///
    /// 市价单 (`price_type == ANY`) 用 IOC，限价单用 GFD。
    /// 发出请求后立即在本地快照里种一条 ALIVE 委托（不增 epoch，
    /// 不触发订阅投递），等服务端回报覆盖。
    pub async fn insert_order(&self, req: &InsertOrderRequest) -> Result<Order> {
        if !self.is_ready() {
            return Err(ClientError::NotLoggedIn(format!(
                "{}/{}",
                self.broker, self.user_id
            )));
        }

        let (exchange_id, instrument_id) = split_symbol(&req.symbol)?;
        let order_id = format!("{}{}", ORDER_ID_PREFIX, random_str(8));

        let time_condition = if req.price_type == PRICE_TYPE_ANY {
            "IOC"
        } else {
            "GFD"
        };

        let request = DiffClientMessage::InsertOrder {
            user_id: self.user_id.clone(),
            order_id: order_id.clone(),
            exchange_id: exchange_id.to_string(),
            instrument_id: instrument_id.to_string(),
            direction: req.direction.clone(),
            offset: req.offset.clone(),
            volume: req.volume,
            price_type: req.price_type.clone(),
            limit_price: req.limit_price,
            volume_condition: "ANY".to_string(),
            time_condition: time_condition.to_string(),
        };
        self.channel.send(&request.to_value()).await?;

        // 本地乐观状态：可见但不扇出
        self.dm.merge_data(
            &json!({
                "trade": {
                    self.user_id.as_str(): {
                        "orders": {
                            order_id.as_str(): {
                                "user_id": &self.user_id,
                                "order_id": &order_id,
                                "exchange_id": exchange_id,
                                "instrument_id": instrument_id,
                                "direction": &req.direction,
                                "offset": &req.offset,
                                "price_type": &req.price_type,
                                "limit_price": req.limit_price,
                                "volume_condition": "ANY",
                                "time_condition": time_condition,
                                "volume_orign": req.volume,
                                "volume_left": req.volume,
                                "status": ORDER_STATUS_ALIVE
                            }
                        }
                    }
                }
            }),
            false,
            false,
        );

        log::info!(
            "Inserted order: order_id={}, symbol={}, direction={}, offset={}, price={}, volume={}",
            order_id,
            req.symbol,
            req.direction,
            req.offset,
            req.limit_price,
            req.volume
        );

        Ok(Order {
            order_id,
            exchange_id: exchange_id.to_string(),
            instrument_id: instrument_id.to_string(),
            direction: req.direction.clone(),
            offset: req.offset.clone(),
            volume_orign: req.volume,
            volume_left: req.volume,
            price_type: req.price_type.clone(),
            limit_price: req.limit_price,
            volume_condition: "ANY".to_string(),
            time_condition: time_condition.to_string(),
            status: ORDER_STATUS_ALIVE.to_string(),
            ..Default::default()
        })
    }

    /// 撤销委托单
    pub async fn cancel_order(&self, order_id: &str) -> Result<()> {
        if !self.is_ready() {
            return Err(ClientError::NotLoggedIn(format!(
                "{}/{}",
                self.broker, self.user_id
            )));
        }

        let request = DiffClientMessage::CancelOrder {
            user_id: self.user_id.clone(),
            order_id: order_id.to_string(),
        };
        self.channel.send(&request.to_value()).await?;

        log::info!("Cancelled order: order_id={}, user_id={}", order_id, self.user_id);
        Ok(())
    }

    /// 确认结算单（每个会话只发一次）
    pub async fn confirm_settlement(&self) -> Result<()> {
        if self.settlement_confirmed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.channel
            .send(&DiffClientMessage::ConfirmSettlement.to_value())
            .await
    }

    /// 查询指定交易日的历史结算单（已缓存则不重复查询）
    pub async fn query_his_settlement(&self, trading_day: &str) -> Result<()> {
        let cached = self
            .dm
            .get_by_path(&["trade", &self.user_id, "his_settlements", trading_day]);
        if cached.is_some() {
            return Ok(());
        }

        let request = DiffClientMessage::QrySettlementInfo {
            trading_day: trading_day.to_string(),
        };
        self.channel.send(&request.to_value()).await
    }

    // ========================================================================
    // 同步查询
    // ========================================================================

    /// 获取账户资金信息（CNY）
    pub fn get_account(&self) -> Result<Account> {
        self.dm.get_account(&self.user_id, "CNY")
    }

    /// 获取指定合约的持仓
    pub fn get_position(&self, symbol: &str) -> Result<Position> {
        self.dm.get_position(&self.user_id, symbol)
    }

    /// 获取所有持仓
    pub fn get_positions(&self) -> Result<HashMap<String, Position>> {
        self.decode_map(&["trade", &self.user_id, "positions"])
    }

    /// 获取所有委托单
    pub fn get_orders(&self) -> Result<HashMap<String, Order>> {
        self.decode_map(&["trade", &self.user_id, "orders"])
    }

    /// 获取所有成交记录
    pub fn get_trades(&self) -> Result<HashMap<String, Trade>> {
        self.decode_map(&["trade", &self.user_id, "trades"])
    }

    /// 获取指定交易日的历史结算单
    pub fn get_his_settlement(&self, trading_day: &str) -> Result<HisSettlement> {
        let data = self
            .dm
            .get_by_path(&["trade", &self.user_id, "his_settlements", trading_day])
            .ok_or_else(|| {
                ClientError::NotFound(format!("settlement not found: {}", trading_day))
            })?;
        SnapshotManager::convert_to(data)
    }

    fn decode_map<T: serde::de::DeserializeOwned>(
        &self,
        path: &[&str],
    ) -> Result<HashMap<String, T>> {
        let mut result = HashMap::new();
        let data = match self.dm.get_by_path(path) {
            Some(Value::Object(m)) => m,
            _ => return Ok(result),
        };

        for (key, value) in data {
            if key == "_epoch" {
                continue;
            }
            // 单条解码失败静默跳过
            if let Ok(item) = serde_json::from_value::<T>(value) {
                result.insert(key, item);
            }
        }
        Ok(result)
    }

    // ========================================================================
    // 流式接口（Channel-based）
    // ========================================================================

    /// 账户更新流
    pub fn account_channel(&self) -> tokio::sync::mpsc::Receiver<Account> {
        self.accounts.subscribe()
    }

    /// 单个持仓更新流
    pub fn position_channel(&self) -> tokio::sync::mpsc::Receiver<PositionUpdate> {
        self.positions_single.subscribe()
    }

    /// 全量持仓快照流
    pub fn positions_channel(&self) -> tokio::sync::mpsc::Receiver<HashMap<String, Position>> {
        self.positions_all.subscribe()
    }

    /// 委托单更新流
    pub fn order_channel(&self) -> tokio::sync::mpsc::Receiver<Order> {
        self.orders.subscribe()
    }

    /// 成交更新流
    pub fn trade_channel(&self) -> tokio::sync::mpsc::Receiver<Trade> {
        self.trades.subscribe()
    }

    /// 通知流
    pub fn notification_channel(&self) -> tokio::sync::mpsc::Receiver<Notify> {
        self.notifications.subscribe()
    }

    // ========================================================================
    // 回调接口（Callback-based）
    // ========================================================================

    pub fn on_account<F: Fn(Account) + Send + Sync + 'static>(&self, handler: F) {
        self.accounts.on(handler);
    }

    pub fn on_position<F: Fn(PositionUpdate) + Send + Sync + 'static>(&self, handler: F) {
        self.positions_single.on(handler);
    }

    pub fn on_positions<F: Fn(HashMap<String, Position>) + Send + Sync + 'static>(&self, handler: F) {
        self.positions_all.on(handler);
    }

    pub fn on_order<F: Fn(Order) + Send + Sync + 'static>(&self, handler: F) {
        self.orders.on(handler);
    }

    pub fn on_trade<F: Fn(Trade) + Send + Sync + 'static>(&self, handler: F) {
        self.trades.on(handler);
    }

    pub fn on_notification<F: Fn(Notify) + Send + Sync + 'static>(&self, handler: F) {
        self.notifications.on(handler);
    }

    // ========================================================================
    // 更新处理
    // ========================================================================

    /// 每次 epoch 自增合并后扇出变化的业务数据
    fn process_update(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        // 登录态迁移
        if self.is_ready() && !self.logged_in.swap(true, Ordering::SeqCst) {
            log::info!(
                "Trade session logged in: broker={}, user_id={}",
                self.broker,
                self.user_id
            );
        }

        let user = self.user_id.as_str();

        if self.dm.is_changing(&["trade", user, "accounts", "CNY"]) {
            if let Ok(account) = self.dm.get_account(user, "CNY") {
                self.accounts.emit(account);
            }
        }

        if self.dm.is_changing(&["trade", user, "positions"]) {
            if let Ok(positions) = self.get_positions() {
                for (symbol, position) in &positions {
                    self.positions_single.emit(PositionUpdate {
                        symbol: symbol.clone(),
                        position: position.clone(),
                    });
                }
                self.positions_all.emit(positions);
            }
        }

        if self.dm.is_changing(&["trade", user, "orders"]) {
            if let Some(Value::Object(orders)) = self.dm.get_by_path(&["trade", user, "orders"]) {
                for (order_id, order_data) in orders {
                    if order_id == "_epoch" {
                        continue;
                    }
                    if !self.dm.is_changing(&["trade", user, "orders", &order_id]) {
                        continue;
                    }
                    if let Ok(order) = serde_json::from_value::<Order>(order_data) {
                        self.orders.emit(order);
                    }
                }
            }
        }

        if self.dm.is_changing(&["trade", user, "trades"]) {
            if let Some(Value::Object(trades)) = self.dm.get_by_path(&["trade", user, "trades"]) {
                for (trade_id, trade_data) in trades {
                    if trade_id == "_epoch" {
                        continue;
                    }
                    if !self.dm.is_changing(&["trade", user, "trades", &trade_id]) {
                        continue;
                    }
                    if let Ok(trade) = serde_json::from_value::<Trade>(trade_data) {
                        self.trades.emit(trade);
                    }
                }
            }
        }
    }

    /// 关闭会话
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.channel.close().await;
    }
}

/// 拆分 `EXCHANGE.INSTRUMENT` 形式的合约代码
fn split_symbol(symbol: &str) -> Result<(&str, &str)> {
    let mut parts = symbol.splitn(2, '.');
    match (parts.next(), parts.next()) {
        (Some(exchange), Some(instrument)) if !exchange.is_empty() && !instrument.is_empty() => {
            Ok((exchange, instrument))
        }
        _ => Err(ClientError::InvalidParameter(format!(
            "invalid symbol format: {}",
            symbol
        ))),
    }
}
