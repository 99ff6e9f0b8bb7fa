//! 客户端组合层
//!
//! `Client` 把各组件拼装成对外入口：
//!
//! - 认证器 (auth) + 解析出的行情服务器地址
//! - 行情快照 + 行情通道 + SeriesApi
//! - Quote 全局订阅（单例，增量合并合约集）
//! - 交易会话注册表（`broker:user_id` 为键，登录幂等）
//! - 合约目录（后台加载，带本地文件缓存；加载未完成不阻塞任何订阅）

mod symbols;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::auth::{Authenticator, ShinnyAuth};
use crate::market::{QuoteSubscription, SeriesApi};
use crate::protocol::diff::snapshot::SnapshotManager;
use crate::trade::session::{TradeSession, TradeSessionConfig};
use crate::transport::{QuoteChannel, WebsocketConfig};
use crate::{ClientError, Result};

/// 合约信息缓存策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolsCacheStrategy {
    /// 总是从网络获取
    AlwaysNetwork,
    /// 优先使用本地缓存，失败再回落到网络
    PreferLocal,
    /// 本地缓存超过有效期则自动刷新
    AutoRefresh,
}

/// 客户端配置
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // 认证信息
    pub username: String,
    pub password: String,

    // 服务器地址
    pub symbols_server_url: String,

    // 客户端信息
    pub client_app_id: String,
    pub client_system_info: String,

    // 合约缓存配置
    pub symbols_cache_dir: PathBuf,
    pub symbols_cache_strategy: SymbolsCacheStrategy,
    /// 缓存最大有效期（秒）
    pub symbols_cache_max_age: u64,

    // 日志配置
    pub log_level: String,
    pub development: bool,

    // WebSocket 配置
    pub ws_config: WebsocketConfig,

    // 数据配置
    pub default_view_width: i32,
}

impl ClientConfig {
    pub fn new(username: &str, password: &str) -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());

        Self {
            username: username.to_string(),
            password: password.to_string(),
            symbols_server_url: "https://openmd.shinnytech.com/t/md/symbols/latest.json"
                .to_string(),
            client_app_id: String::new(),
            client_system_info: String::new(),
            symbols_cache_dir: PathBuf::from(home).join(".tqsdk"),
            symbols_cache_strategy: SymbolsCacheStrategy::AutoRefresh,
            symbols_cache_max_age: 86400,
            log_level: "info".to_string(),
            development: false,
            ws_config: WebsocketConfig::default(),
            default_view_width: 10000,
        }
    }

    pub fn with_view_width(mut self, width: i32) -> Self {
        self.default_view_width = width;
        self
    }

    pub fn with_client_info(mut self, app_id: &str, system_info: &str) -> Self {
        self.client_app_id = app_id.to_string();
        self.client_system_info = system_info.to_string();
        self
    }

    pub fn with_log_level(mut self, level: &str) -> Self {
        self.log_level = level.to_string();
        self
    }

    pub fn with_development(mut self, development: bool) -> Self {
        self.development = development;
        self
    }

    pub fn with_symbols_cache_dir(mut self, dir: PathBuf) -> Self {
        self.symbols_cache_dir = dir;
        self
    }

    pub fn with_symbols_cache_strategy(mut self, strategy: SymbolsCacheStrategy) -> Self {
        self.symbols_cache_strategy = strategy;
        self
    }

    pub fn with_symbols_cache_max_age(mut self, max_age_secs: u64) -> Self {
        self.symbols_cache_max_age = max_age_secs;
        self
    }
}

/// DIFF 协议客户端
pub struct Client {
    config: ClientConfig,
    auth: Arc<dyn Authenticator>,

    dm: Arc<SnapshotManager>,
    quote_channel: RwLock<Option<Arc<QuoteChannel>>>,
    series: RwLock<Option<Arc<SeriesApi>>>,

    /// 合约目录（symbol -> 合约信息）
    quotes_info: RwLock<HashMap<String, Value>>,

    quote_subscription: Mutex<Option<Arc<QuoteSubscription>>>,
    trade_sessions: DashMap<String, Arc<TradeSession>>,

    shutdown: CancellationToken,
}

impl Client {
    /// 创建客户端并完成认证（不建立行情连接，行情由 `init_market` 触发）
    pub async fn new(mut config: ClientConfig) -> Result<Arc<Self>> {
        let auth: Arc<dyn Authenticator> =
            Arc::new(ShinnyAuth::new(&config.username, &config.password));
        auth.login().await?;

        config.ws_config.headers = auth.base_headers();

        Ok(Arc::new(Self {
            config,
            auth,
            dm: Arc::new(SnapshotManager::new(SnapshotManager::market_skeleton())),
            quote_channel: RwLock::new(None),
            series: RwLock::new(None),
            quotes_info: RwLock::new(HashMap::new()),
            quote_subscription: Mutex::new(None),
            trade_sessions: DashMap::new(),
            shutdown: CancellationToken::new(),
        }))
    }

    /// 用默认配置创建客户端
    pub async fn connect(username: &str, password: &str) -> Result<Arc<Self>> {
        Self::new(ClientConfig::new(username, password)).await
    }

    /// 使用自定义认证器创建客户端（测试/私有部署用）
    pub fn with_authenticator(config: ClientConfig, auth: Arc<dyn Authenticator>) -> Arc<Self> {
        Arc::new(Self {
            config,
            auth,
            dm: Arc::new(SnapshotManager::new(SnapshotManager::market_skeleton())),
            quote_channel: RwLock::new(None),
            series: RwLock::new(None),
            quotes_info: RwLock::new(HashMap::new()),
            quote_subscription: Mutex::new(None),
            trade_sessions: DashMap::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// 初始化行情功能（WebSocket + SeriesApi）
    ///
    /// 合约目录在后台加载，不阻塞行情订阅（合约信息是补充数据，
    /// 不是订阅的前置条件）。
    pub async fn init_market(self: &Arc<Self>) -> Result<()> {
        if self.quote_channel.read().is_some() {
            log::warn!("Market already initialized");
            return Ok(());
        }

        // 后台加载合约目录
        let loader = self.clone();
        tokio::spawn(async move {
            loader.load_symbols().await;
        });

        let md_url = self.auth.get_md_url(true, false).await?;
        log::info!("Resolved md url: {}", md_url);

        let channel = QuoteChannel::new(
            vec![md_url],
            self.dm.clone(),
            self.config.ws_config.clone(),
        );
        channel.init(false).await?;

        *self.series.write() = Some(Arc::new(SeriesApi::new(
            self.dm.clone(),
            channel.clone(),
            self.config.default_view_width,
        )));
        *self.quote_channel.write() = Some(channel);

        log::info!("Market initialized");
        Ok(())
    }

    /// 序列数据 API（需先 `init_market`）
    pub fn series(&self) -> Result<Arc<SeriesApi>> {
        self.series.read().clone().ok_or(ClientError::NotConnected)
    }

    /// 行情快照
    pub fn snapshot(&self) -> &Arc<SnapshotManager> {
        &self.dm
    }

    /// 认证器
    pub fn auth(&self) -> &Arc<dyn Authenticator> {
        &self.auth
    }

    /// 订阅 Quote（全局单例订阅，合约集增量合并）
    pub async fn subscribe_quote(self: &Arc<Self>, symbols: &[&str]) -> Result<Arc<QuoteSubscription>> {
        let channel = self
            .quote_channel
            .read()
            .clone()
            .ok_or(ClientError::NotConnected)?;

        self.auth.has_md_grants(symbols)?;

        let subscription = {
            let mut guard = self.quote_subscription.lock();
            match guard.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let created = QuoteSubscription::new(self.dm.clone(), channel);
                    *guard = Some(created.clone());
                    created
                }
            }
        };

        let owned: Vec<String> = symbols.iter().map(|s| s.to_string()).collect();
        subscription.add_symbols(&owned).await?;
        Ok(subscription)
    }

    /// 登录交易账户，创建交易会话（按 `broker:user_id` 幂等）
    pub async fn login_trade(
        &self,
        broker: &str,
        user_id: &str,
        password: &str,
    ) -> Result<Arc<TradeSession>> {
        if broker.is_empty() || user_id.is_empty() || password.is_empty() {
            return Err(ClientError::InvalidParameter(
                "broker, user_id, password cannot be empty".to_string(),
            ));
        }

        let key = format!("{}:{}", broker, user_id);
        if let Some(existing) = self.trade_sessions.get(&key) {
            return Ok(existing.clone());
        }

        let broker_info = self.auth.get_td_url(broker, user_id).await?;

        let session_config = TradeSessionConfig {
            client_app_id: non_empty(&self.config.client_app_id),
            client_system_info: non_empty(&self.config.client_system_info),
            ws_config: self.config.ws_config.clone(),
        };

        let session = TradeSession::new(
            broker,
            user_id,
            password,
            vec![broker_info.url],
            session_config,
        )?;
        session.connect().await?;

        let session = self.trade_sessions.entry(key).or_insert(session).clone();

        log::info!("Added trade session: broker={}, user_id={}", broker, user_id);
        Ok(session)
    }

    /// 获取合约信息
    pub fn get_quote_info(&self, symbol: &str) -> Option<Value> {
        self.quotes_info.read().get(symbol).cloned()
    }

    /// 已加载的合约数量
    pub fn symbols_count(&self) -> usize {
        self.quotes_info.read().len()
    }

    /// 按输入模糊查询合约列表
    ///
    /// 默认只匹配未下市的期货（FUTURE），`filter_option` 可按类别覆盖：
    /// `symbol`/`pinyin` 控制匹配途径，`include_expired` 控制是否含已下市，
    /// `FUTURE`/`FUTURE_INDEX`/`FUTURE_CONT`/`OPTION`/`COMBINE` 控制类别。
    pub fn get_quotes_by_input(
        &self,
        input: &str,
        filter_option: &HashMap<String, bool>,
    ) -> Vec<String> {
        if input.is_empty() {
            return Vec::new();
        }

        let mut option: HashMap<&str, bool> = HashMap::from([
            ("symbol", true),
            ("pinyin", true),
            ("include_expired", false),
            ("FUTURE", true),
            ("FUTURE_INDEX", false),
            ("FUTURE_CONT", false),
            ("OPTION", false),
            ("COMBINE", false),
        ]);
        for (key, value) in filter_option {
            option.insert(key.as_str(), *value);
        }

        let input = input.to_lowercase();
        let quotes_info = self.quotes_info.read();

        let mut result: Vec<String> = quotes_info
            .iter()
            .filter(|(_, quote)| filter_symbol(&option, &input, quote))
            .map(|(symbol, _)| symbol.clone())
            .collect();
        result.sort();
        result
    }

    /// 关闭客户端：行情订阅、行情通道、全部交易会话
    pub async fn close(&self) {
        self.shutdown.cancel();

        if let Some(subscription) = self.quote_subscription.lock().as_ref() {
            subscription.close();
        }

        let channel = self.quote_channel.read().clone();
        if let Some(channel) = channel {
            channel.close().await;
        }

        let sessions: Vec<Arc<TradeSession>> = self
            .trade_sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for session in sessions {
            session.close().await;
        }
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn quotes_info_mut(&self) -> &RwLock<HashMap<String, Value>> {
        &self.quotes_info
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// 单个合约是否命中查询条件
fn filter_symbol(option: &HashMap<&str, bool>, input: &str, quote: &Value) -> bool {
    let class = quote.get("class").and_then(Value::as_str).unwrap_or_default();
    let class_filter = option.get(class).copied().unwrap_or(false);
    if !class_filter {
        return false;
    }

    let expired = quote.get("expired").and_then(Value::as_bool).unwrap_or(false);
    let include_expired = option.get("include_expired").copied().unwrap_or(false);
    if !include_expired && expired {
        return false;
    }

    let symbol_filter = option.get("symbol").copied().unwrap_or(false);
    let pinyin_filter = option.get("pinyin").copied().unwrap_or(false);

    if symbol_filter {
        if let Some(underlying_product) = quote.get("underlying_product").and_then(Value::as_str) {
            let lowered = underlying_product.to_lowercase();
            let parts: Vec<&str> = lowered.split('.').collect();
            if parts.len() >= 2 && (parts[0] == input || parts[1] == input) {
                return true;
            }
        } else if let Some(product_id) = quote.get("product_id").and_then(Value::as_str) {
            if product_id.to_lowercase() == input {
                return true;
            }
        } else if let Some(instrument_id) = quote.get("instrument_id").and_then(Value::as_str) {
            if input.len() > 2 && instrument_id.to_lowercase().contains(input) {
                return true;
            }
        }
    }

    if pinyin_filter {
        if let Some(py) = quote.get("py").and_then(Value::as_str) {
            if py.split(',').any(|p| p.contains(input)) {
                return true;
            }
        }
    }

    false
}
