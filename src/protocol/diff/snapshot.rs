//! 业务快照管理器
//!
//! 维护 DIFF 协议在客户端侧合并出的完整业务快照，是整个 SDK 的数据中枢。
//!
//! # 核心功能
//!
//! - **差分合并**: `merge_data` 把 `rtn_data` 推送的差分合并进快照，
//!   epoch 自增并为修改到的节点打版本标记
//! - **变更检测**: `is_changing` 沿路径检查 `_epoch` 是否等于当前版本
//! - **路径访问**: `get_by_path` / `set_default` / `dump`
//! - **路径监听**: `watch` / `unwatch`，有界通道推送当前值快照
//! - **类型化视图**: Quote / K线序列 / Tick序列 / 账户 / 持仓 / 委托 / 成交
//!
//! # 架构设计
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     SnapshotManager                          │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │ inner: RwLock<SnapshotInner>                           │  │
//! │  │   ├─ epoch: i64            数据版本号                   │  │
//! │  │   ├─ data:  Map            业务快照                     │  │
//! │  │   └─ diffs: Vec<Value>     最近一批差分                 │  │
//! │  ├────────────────────────────────────────────────────────┤  │
//! │  │ callbacks: RwLock<Vec<Arc<dyn Fn()>>>   数据更新回调    │  │
//! │  │ watchers:  Mutex<HashMap<path, tx>>     路径监听器      │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # 锁策略
//!
//! 合并路径持 `inner` 写锁；回调和监听器推送都在写锁释放之后进行，
//! 监听器注册走独立的 `watchers` 锁，避免与合并路径互锁。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::merge::{merge_object, node_epoch, EPOCH_KEY};
use super::types::{
    Account, AlignedKlineSet, Kline, KlineMetadata, KlineSeriesData, MultiKlineSeriesData, Order,
    Position, Quote, Tick, TickSeriesData, Trade,
};
use crate::{ClientError, Result};

/// 监听器通道容量（满了丢弃本次更新）
const WATCHER_CHANNEL_CAPACITY: usize = 10;

/// 快照管理器配置
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// 默认视图宽度
    pub default_view_width: i32,
    /// 最大数据保留时间（None 表示不清理）
    pub max_data_retention: Option<Duration>,
    /// 启用自动清理
    pub enable_auto_cleanup: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            default_view_width: 10000,
            max_data_retention: None,
            enable_auto_cleanup: true,
        }
    }
}

struct SnapshotInner {
    /// 数据版本号
    epoch: i64,
    /// 业务快照
    data: Map<String, Value>,
    /// 最近一批差分
    diffs: Vec<Value>,
}

struct PathWatcher {
    path: Vec<String>,
    tx: mpsc::Sender<Value>,
}

type OnDataCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// 业务快照管理器
///
/// 线程安全：多读单写。行情连接与交易连接各持有一份独立实例。
pub struct SnapshotManager {
    inner: RwLock<SnapshotInner>,
    config: RwLock<SnapshotConfig>,
    callbacks: RwLock<Vec<OnDataCallback>>,
    watchers: Mutex<HashMap<String, PathWatcher>>,
}

impl SnapshotManager {
    /// 创建快照管理器
    ///
    /// `initial_data` 为初始快照骨架（非对象时按空对象处理）。
    pub fn new(initial_data: Value) -> Self {
        Self::with_config(initial_data, SnapshotConfig::default())
    }

    /// 使用自定义配置创建快照管理器
    pub fn with_config(initial_data: Value, config: SnapshotConfig) -> Self {
        let data = match initial_data {
            Value::Object(m) => m,
            _ => Map::new(),
        };

        Self {
            inner: RwLock::new(SnapshotInner {
                epoch: 0,
                data,
                diffs: Vec::new(),
            }),
            config: RwLock::new(config),
            callbacks: RwLock::new(Vec::new()),
            watchers: Mutex::new(HashMap::new()),
        }
    }

    /// 行情快照骨架
    pub fn market_skeleton() -> Value {
        serde_json::json!({
            "klines": {},
            "quotes": {},
            "charts": {},
            "ticks": {},
            "trade": {}
        })
    }

    /// 交易快照骨架
    pub fn trade_skeleton(user_id: &str) -> Value {
        serde_json::json!({
            "trade": {
                user_id: {
                    "accounts": { "CNY": {} },
                    "trades": {},
                    "positions": {},
                    "orders": {},
                    "his_settlements": {}
                }
            }
        })
    }

    // ========================================================================
    // 合并与回调
    // ========================================================================

    /// 注册数据更新回调
    ///
    /// 每次 epoch 自增的合并完成（且确有数据写入）后触发；
    /// 回调在写锁释放后异步投递，实现方需容忍并发调用。
    pub fn on_data<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks.write().push(Arc::new(callback));
    }

    /// 合并差分数据
    ///
    /// `source` 接受单个对象、对象数组（数组里的非对象元素被过滤）。
    /// 其他形态一律忽略。`epoch_increase` 为 true 时 epoch 自增一次，
    /// 并把这批差分记录为最近差分；`delete_null_obj` 控制 null 是否删除键。
    pub fn merge_data(&self, source: &Value, epoch_increase: bool, delete_null_obj: bool) {
        let source_arr: Vec<Map<String, Value>> = match source {
            Value::Object(m) => vec![m.clone()],
            Value::Array(items) => items
                .iter()
                .filter_map(|item| item.as_object().cloned())
                .collect(),
            _ => return,
        };

        let should_fire = {
            let mut inner = self.inner.write();

            if epoch_increase {
                inner.epoch += 1;
                inner.diffs = source_arr
                    .iter()
                    .map(|m| Value::Object(m.clone()))
                    .collect();
            }

            let epoch = inner.epoch;
            for item in &source_arr {
                if item.is_empty() {
                    continue;
                }
                merge_object(&mut inner.data, item, epoch, delete_null_obj);
            }

            // 只有根节点确实被本轮标记时才触发回调
            epoch_increase
                && inner
                    .data
                    .get(EPOCH_KEY)
                    .and_then(Value::as_i64)
                    .map(|e| e == epoch)
                    .unwrap_or(false)
        };

        if should_fire {
            let callbacks: Vec<OnDataCallback> = self.callbacks.read().clone();
            for cb in callbacks {
                crate::utils::spawn_or_call(move || cb());
            }
            self.notify_watchers();
        }
    }

    /// 合并任意可序列化的值（经 JSON 规整后走 `merge_data`）
    pub fn merge<T: Serialize>(&self, source: &T, epoch_increase: bool, delete_null_obj: bool) {
        if let Ok(value) = serde_json::to_value(source) {
            self.merge_data(&value, epoch_increase, delete_null_obj);
        }
    }

    // ========================================================================
    // 路径访问
    // ========================================================================

    /// 判断指定路径的数据是否在最近一次合并中发生了变化
    pub fn is_changing(&self, path: &[&str]) -> bool {
        let inner = self.inner.read();

        let mut node = &inner.data;
        for (i, key) in path.iter().enumerate() {
            let val = match node.get(*key) {
                Some(v) => v,
                None => return false,
            };

            if let Some(epoch) = node_epoch(val) {
                if epoch == inner.epoch {
                    return true;
                }
            }

            if i < path.len() - 1 {
                match val.as_object() {
                    Some(m) => node = m,
                    None => return false,
                }
            }
        }

        false
    }

    /// 根据路径获取数据（深拷贝）
    pub fn get_by_path(&self, path: &[&str]) -> Option<Value> {
        let inner = self.inner.read();

        let mut node = &inner.data;
        for (i, key) in path.iter().enumerate() {
            let val = node.get(*key)?;

            if i == path.len() - 1 {
                return Some(val.clone());
            }

            node = val.as_object()?;
        }

        Some(Value::Object(node.clone()))
    }

    /// 根据路径获取数据，缺失时返回错误
    pub fn get(&self, path: &[&str]) -> Result<Value> {
        self.get_by_path(path)
            .ok_or_else(|| ClientError::NotFound(format!("data not found at path: {:?}", path)))
    }

    /// 设置默认值：路径缺失时创建并写入默认值，已存在时返回现值
    ///
    /// 中间节点缺失会按对象创建；途中撞上非对象节点时返回 None。
    pub fn set_default(&self, path: &[&str], default: Value) -> Option<Value> {
        let (last, prefix) = path.split_last()?;

        let mut inner = self.inner.write();
        let mut node = &mut inner.data;

        for key in prefix {
            if !node.contains_key(*key) {
                node.insert(key.to_string(), Value::Object(Map::new()));
            }
            node = node.get_mut(*key).and_then(Value::as_object_mut)?;
        }

        if !node.contains_key(*last) {
            node.insert(last.to_string(), default);
        }
        node.get(*last).cloned()
    }

    /// 当前数据版本号
    pub fn epoch(&self) -> i64 {
        self.inner.read().epoch
    }

    /// 最近一批差分
    pub fn diffs(&self) -> Vec<Value> {
        self.inner.read().diffs.clone()
    }

    /// 深拷贝任意值
    pub fn clone_value(value: &Value) -> Value {
        value.clone()
    }

    /// 导出完整快照（用于调试）
    pub fn dump(&self) -> Value {
        Value::Object(self.inner.read().data.clone())
    }

    // ========================================================================
    // 路径监听
    // ========================================================================

    /// 监听指定路径的数据变化
    ///
    /// 每次 epoch 自增合并后，路径变化且当前值非 null 时推送值快照；
    /// 通道容量 10，满时丢弃本次更新。同一路径只允许一个监听器。
    pub fn watch(&self, path: &[&str]) -> Result<mpsc::Receiver<Value>> {
        let path_key = path.join(".");

        let mut watchers = self.watchers.lock();
        if watchers.contains_key(&path_key) {
            return Err(ClientError::AlreadyWatched(path_key));
        }

        let (tx, rx) = mpsc::channel(WATCHER_CHANNEL_CAPACITY);
        watchers.insert(
            path_key,
            PathWatcher {
                path: path.iter().map(|s| s.to_string()).collect(),
                tx,
            },
        );

        Ok(rx)
    }

    /// 取消路径监听
    pub fn unwatch(&self, path: &[&str]) -> Result<()> {
        let path_key = path.join(".");

        let mut watchers = self.watchers.lock();
        match watchers.remove(&path_key) {
            Some(_) => Ok(()),
            None => Err(ClientError::NotWatched(path_key)),
        }
    }

    /// 向所有命中的监听器推送当前值
    fn notify_watchers(&self) {
        let mut watchers = self.watchers.lock();
        let mut dead: Vec<String> = Vec::new();

        for (key, watcher) in watchers.iter() {
            let path: Vec<&str> = watcher.path.iter().map(String::as_str).collect();
            if !self.is_changing(&path) {
                continue;
            }

            let value = match self.get_by_path(&path) {
                Some(v) if !v.is_null() => v,
                _ => continue,
            };

            match watcher.tx.try_send(value) {
                Ok(_) => {}
                // 通道满了，丢弃本次更新
                Err(TrySendError::Full(_)) => {}
                // 接收端已释放，回收监听器
                Err(TrySendError::Closed(_)) => dead.push(key.clone()),
            }
        }

        for key in dead {
            watchers.remove(&key);
        }
    }

    // ========================================================================
    // 类型化视图
    // ========================================================================

    /// 把子树解码为指定类型
    pub fn convert_to<T: DeserializeOwned>(value: Value) -> Result<T> {
        Ok(serde_json::from_value(value)?)
    }

    /// 获取行情数据
    pub fn get_quote(&self, symbol: &str) -> Result<Quote> {
        let data = self
            .get_by_path(&["quotes", symbol])
            .ok_or_else(|| ClientError::NotFound(format!("quote not found: {}", symbol)))?;
        Self::convert_to(data)
    }

    /// 获取K线序列数据（数组形式，id 升序）
    ///
    /// 服务端会在数据末尾附带一根 last_id 的实时K线；历史订阅场景下
    /// 按匹配 Chart 的 right_id 把越界的K线过滤掉，再按视图宽度裁剪尾部。
    pub fn get_klines_data(
        &self,
        symbol: &str,
        duration_ns: i64,
        view_width: Option<i32>,
    ) -> Result<KlineSeriesData> {
        let duration_key = duration_ns.to_string();
        let data = self
            .get_by_path(&["klines", symbol, &duration_key])
            .ok_or_else(|| {
                ClientError::NotFound(format!("klines not found: {}/{}", symbol, duration_ns))
            })?;

        let data_map = data
            .as_object()
            .ok_or_else(|| ClientError::InternalError("invalid klines data format".to_string()))?;

        let mut series = KlineSeriesData {
            symbol: symbol.to_string(),
            duration_ns,
            last_id: to_i64(data_map.get("last_id")),
            trading_day_start_id: to_i64(data_map.get("trading_day_start_id")),
            trading_day_end_id: to_i64(data_map.get("trading_day_end_id")),
            ..Default::default()
        };

        let mut klines: Vec<Kline> = Vec::new();
        if let Some(Value::Object(bars)) = data_map.get("data") {
            klines.reserve(bars.len());
            for (id_str, bar) in bars {
                if id_str == EPOCH_KEY {
                    continue;
                }
                let id: i64 = match id_str.parse() {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                let mut kline: Kline = match serde_json::from_value(bar.clone()) {
                    Ok(k) => k,
                    Err(_) => continue,
                };
                kline.id = id;
                klines.push(kline);
            }
        }
        klines.sort_by_key(|k| k.id);

        let right_id = self.find_chart_right_id(symbol, duration_ns);
        if right_id > 0 {
            // 二分查找第一个 id > right_id 的位置，截掉实时更新用的越界K线
            let idx = klines.partition_point(|k| k.id <= right_id);
            klines.truncate(idx);
        }

        let vw = self.effective_view_width(view_width);
        if vw > 0 && klines.len() > vw {
            let excess = klines.len() - vw;
            klines.drain(..excess);
        }

        series.data = klines;
        Ok(series)
    }

    /// 获取多合约对齐的K线数据
    ///
    /// 主合约（第一个合约）定义时间轴，其余合约按主合约K线序列里的
    /// binding 映射取对应 id 的K线；binding 缺失的槽位留空。
    pub fn get_multi_klines_data(
        &self,
        symbols: &[String],
        duration_ns: i64,
        chart_id: &str,
        view_width: i32,
    ) -> Result<MultiKlineSeriesData> {
        let main_symbol = symbols
            .first()
            .ok_or_else(|| ClientError::InvalidParameter("no symbols provided".to_string()))?;

        let mut left_id: i64 = -1;
        let mut right_id: i64 = -1;
        if let Some(Value::Object(chart)) = self.get_by_path(&["charts", chart_id]) {
            left_id = to_i64_or(chart.get("left_id"), -1);
            right_id = to_i64_or(chart.get("right_id"), -1);
        }

        let mut result = MultiKlineSeriesData {
            chart_id: chart_id.to_string(),
            duration_ns,
            main_symbol: main_symbol.clone(),
            symbols: symbols.to_vec(),
            left_id,
            right_id,
            view_width,
            ..Default::default()
        };

        let duration_key = duration_ns.to_string();

        // 每个合约的序列元数据
        for symbol in symbols {
            if let Some(Value::Object(kline_map)) =
                self.get_by_path(&["klines", symbol, &duration_key])
            {
                result.metadata.insert(
                    symbol.clone(),
                    KlineMetadata {
                        symbol: symbol.clone(),
                        last_id: to_i64(kline_map.get("last_id")),
                        trading_day_start_id: to_i64(kline_map.get("trading_day_start_id")),
                        trading_day_end_id: to_i64(kline_map.get("trading_day_end_id")),
                    },
                );
            }
        }

        let main_series = match self.get_by_path(&["klines", main_symbol, &duration_key]) {
            Some(Value::Object(m)) => m,
            _ => return Ok(result),
        };

        let main_bars = match main_series.get("data") {
            Some(Value::Object(m)) => m.clone(),
            _ => return Ok(result),
        };

        // binding: symbol -> (main_id -> other_id)
        let mut bindings: HashMap<String, HashMap<i64, i64>> = HashMap::new();
        if let Some(Value::Object(binding_map)) = main_series.get("binding") {
            for (symbol, binding_info) in binding_map {
                if symbol == EPOCH_KEY {
                    continue;
                }
                let mut ids = HashMap::new();
                if let Value::Object(binding_ids) = binding_info {
                    for (main_id_str, other_id) in binding_ids {
                        if let Ok(main_id) = main_id_str.parse::<i64>() {
                            ids.insert(main_id, to_i64(Some(other_id)));
                        }
                    }
                }
                bindings.insert(symbol.clone(), ids);
            }
        }

        let mut main_ids: Vec<i64> = main_bars
            .keys()
            .filter_map(|id_str| id_str.parse::<i64>().ok())
            .collect();
        main_ids.sort_unstable();

        if right_id > 0 {
            let idx = main_ids.partition_point(|id| *id <= right_id);
            main_ids.truncate(idx);
        }

        if view_width > 0 && main_ids.len() > view_width as usize {
            let excess = main_ids.len() - view_width as usize;
            main_ids.drain(..excess);
            result.left_id = main_ids[0];
            result.right_id = main_ids[main_ids.len() - 1];
        }

        for main_id in main_ids {
            let mut set = AlignedKlineSet {
                main_id,
                ..Default::default()
            };

            if let Some(bar) = main_bars.get(&main_id.to_string()) {
                if let Ok(mut kline) = serde_json::from_value::<Kline>(bar.clone()) {
                    kline.id = main_id;
                    set.datetime = kline.datetime;
                    set.klines.insert(main_symbol.clone(), kline);
                }
            }

            for symbol in &symbols[1..] {
                let mapped_id = match bindings.get(symbol).and_then(|b| b.get(&main_id)) {
                    Some(id) => *id,
                    None => continue,
                };
                let bar = self.get_by_path(&[
                    "klines",
                    symbol,
                    &duration_key,
                    "data",
                    &mapped_id.to_string(),
                ]);
                if let Some(bar) = bar {
                    if let Ok(mut kline) = serde_json::from_value::<Kline>(bar) {
                        kline.id = mapped_id;
                        set.klines.insert(symbol.clone(), kline);
                    }
                }
            }

            result.data.push(set);
        }

        Ok(result)
    }

    /// 获取Tick序列数据（数组形式，id 升序）
    pub fn get_ticks_data(&self, symbol: &str, view_width: Option<i32>) -> Result<TickSeriesData> {
        let data = self
            .get_by_path(&["ticks", symbol])
            .ok_or_else(|| ClientError::NotFound(format!("ticks not found: {}", symbol)))?;

        let data_map = data
            .as_object()
            .ok_or_else(|| ClientError::InternalError("invalid ticks data format".to_string()))?;

        let mut series = TickSeriesData {
            symbol: symbol.to_string(),
            last_id: to_i64(data_map.get("last_id")),
            ..Default::default()
        };

        let mut ticks: Vec<Tick> = Vec::new();
        if let Some(Value::Object(bars)) = data_map.get("data") {
            ticks.reserve(bars.len());
            for (id_str, bar) in bars {
                if id_str == EPOCH_KEY {
                    continue;
                }
                let id: i64 = match id_str.parse() {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                let mut tick: Tick = match serde_json::from_value(bar.clone()) {
                    Ok(t) => t,
                    Err(_) => continue,
                };
                tick.id = id;
                ticks.push(tick);
            }
        }
        ticks.sort_by_key(|t| t.id);

        // Tick 订阅在 Chart state 里的 duration 为 0
        let right_id = self.find_chart_right_id(symbol, 0);
        if right_id > 0 {
            let idx = ticks.partition_point(|t| t.id <= right_id);
            ticks.truncate(idx);
        }

        let vw = self.effective_view_width(view_width);
        if vw > 0 && ticks.len() > vw {
            let excess = ticks.len() - vw;
            ticks.drain(..excess);
        }

        series.data = ticks;
        Ok(series)
    }

    /// 获取账户数据
    pub fn get_account(&self, user_id: &str, currency: &str) -> Result<Account> {
        let data = self
            .get_by_path(&["trade", user_id, "accounts", currency])
            .ok_or_else(|| {
                ClientError::NotFound(format!("account not found: {}/{}", user_id, currency))
            })?;
        Self::convert_to(data)
    }

    /// 获取持仓数据
    pub fn get_position(&self, user_id: &str, symbol: &str) -> Result<Position> {
        let data = self
            .get_by_path(&["trade", user_id, "positions", symbol])
            .ok_or_else(|| {
                ClientError::NotFound(format!("position not found: {}/{}", user_id, symbol))
            })?;
        Self::convert_to(data)
    }

    /// 获取委托单数据
    pub fn get_order(&self, user_id: &str, order_id: &str) -> Result<Order> {
        let data = self
            .get_by_path(&["trade", user_id, "orders", order_id])
            .ok_or_else(|| {
                ClientError::NotFound(format!("order not found: {}/{}", user_id, order_id))
            })?;
        Self::convert_to(data)
    }

    /// 获取成交数据
    pub fn get_trade(&self, user_id: &str, trade_id: &str) -> Result<Trade> {
        let data = self
            .get_by_path(&["trade", user_id, "trades", trade_id])
            .ok_or_else(|| {
                ClientError::NotFound(format!("trade not found: {}/{}", user_id, trade_id))
            })?;
        Self::convert_to(data)
    }

    /// 在 charts 里找到覆盖该合约且周期匹配的 Chart，返回它的 right_id
    ///
    /// 匹配条件：state.ins_list 包含该合约且 state.duration 等于周期
    /// （Tick 用 0）。取第一个命中的 Chart；找不到返回 -1（禁用过滤）。
    fn find_chart_right_id(&self, symbol: &str, duration_ns: i64) -> i64 {
        let charts = match self.get_by_path(&["charts"]) {
            Some(Value::Object(m)) => m,
            _ => return -1,
        };

        for (chart_key, chart_data) in &charts {
            if chart_key == EPOCH_KEY {
                continue;
            }
            let chart = match chart_data.as_object() {
                Some(m) => m,
                None => continue,
            };
            let state = match chart.get("state").and_then(Value::as_object) {
                Some(m) => m,
                None => continue,
            };
            let ins_list = match state.get("ins_list").and_then(Value::as_str) {
                Some(s) => s,
                None => continue,
            };
            if !ins_list.contains(symbol) {
                continue;
            }
            if to_i64(state.get("duration")) != duration_ns {
                continue;
            }
            return to_i64_or(chart.get("right_id"), -1);
        }

        -1
    }

    fn effective_view_width(&self, view_width: Option<i32>) -> usize {
        let vw = match view_width {
            Some(v) if v > 0 => v,
            _ => self.config.read().default_view_width,
        };
        vw.max(0) as usize
    }

    // ========================================================================
    // 动态配置
    // ========================================================================

    /// 设置默认视图宽度（非正数重置为 500）
    pub fn set_view_width(&self, width: i32) {
        let width = if width <= 0 { 500 } else { width };
        self.config.write().default_view_width = width;
    }

    /// 当前默认视图宽度
    pub fn view_width(&self) -> i32 {
        self.config.read().default_view_width
    }

    /// 设置数据保留时间
    pub fn set_data_retention(&self, retention: Duration) {
        self.config.write().max_data_retention = Some(retention);
    }

    /// 当前数据保留时间
    pub fn data_retention(&self) -> Option<Duration> {
        self.config.read().max_data_retention
    }

    /// 清理过期的K线/Tick数据
    pub fn cleanup(&self) {
        let (enabled, retention) = {
            let config = self.config.read();
            (config.enable_auto_cleanup, config.max_data_retention)
        };
        let retention = match retention {
            Some(r) if enabled => r,
            _ => return,
        };

        let now_ns = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
        let cutoff_ns = now_ns - retention.as_nanos() as i64;

        let mut inner = self.inner.write();

        if let Some(Value::Object(klines)) = inner.data.get_mut("klines") {
            for (_, symbol_data) in klines.iter_mut() {
                if let Value::Object(durations) = symbol_data {
                    for (_, duration_data) in durations.iter_mut() {
                        if let Some(Value::Object(bars)) =
                            duration_data.as_object_mut().and_then(|m| m.get_mut("data"))
                        {
                            cleanup_bars(bars, cutoff_ns);
                        }
                    }
                }
            }
        }

        if let Some(Value::Object(ticks)) = inner.data.get_mut("ticks") {
            for (_, symbol_data) in ticks.iter_mut() {
                if let Some(Value::Object(bars)) =
                    symbol_data.as_object_mut().and_then(|m| m.get_mut("data"))
                {
                    cleanup_bars(bars, cutoff_ns);
                }
            }
        }
    }
}

/// 丢弃 datetime 早于 cutoff 的数据条目
fn cleanup_bars(bars: &mut Map<String, Value>, cutoff_ns: i64) {
    bars.retain(|key, bar| {
        if key == EPOCH_KEY {
            return true;
        }
        match bar.as_object().and_then(|m| m.get("datetime")) {
            Some(dt) => to_i64(Some(dt)) >= cutoff_ns,
            None => true,
        }
    });
}

/// 宽松取 i64（整数/浮点都接受，缺失为 0）
fn to_i64(value: Option<&Value>) -> i64 {
    to_i64_or(value, 0)
}

fn to_i64_or(value: Option<&Value>, default: i64) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(default),
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn market_manager() -> SnapshotManager {
        SnapshotManager::new(SnapshotManager::market_skeleton())
    }

    #[test]
    fn test_merge_and_change_detection() {
        let dm = market_manager();

        dm.merge_data(
            &json!({"quotes": {"SHFE.au2602": {"last_price": 500.0, "volume": 1000}}}),
            true,
            true,
        );

        assert_eq!(dm.epoch(), 1);
        assert_eq!(
            dm.get_by_path(&["quotes", "SHFE.au2602", "last_price"]),
            Some(json!(500.0))
        );
        assert!(dm.is_changing(&["quotes", "SHFE.au2602"]));
        assert!(!dm.is_changing(&["quotes", "SHFE.ag2512"]));
    }

    #[test]
    fn test_epoch_stamping_across_merges() {
        let dm = market_manager();

        dm.merge_data(
            &json!({"quotes": {"SHFE.au2602": {"last_price": 500.0, "volume": 1000}}}),
            true,
            true,
        );
        dm.merge_data(&json!({"quotes": {"SHFE.au2602": {"volume": 1200}}}), true, true);

        assert_eq!(dm.epoch(), 2);
        assert_eq!(
            dm.get_by_path(&["quotes", "SHFE.au2602", "volume"]),
            Some(json!(1200))
        );
        assert_eq!(
            dm.get_by_path(&["quotes", "SHFE.au2602", "last_price"]),
            Some(json!(500.0))
        );
        assert!(dm.is_changing(&["quotes", "SHFE.au2602"]));
        assert!(!dm.is_changing(&["ticks"]));
    }

    #[test]
    fn test_delete_on_null() {
        let dm = market_manager();

        dm.merge_data(
            &json!({"quotes": {"SHFE.au2602": {"last_price": 500.0}}}),
            true,
            true,
        );
        dm.merge_data(&json!({"quotes": {"SHFE.au2602": null}}), true, true);

        assert_eq!(dm.get_by_path(&["quotes", "SHFE.au2602"]), None);
    }

    #[test]
    fn test_null_kept_without_delete() {
        let dm = market_manager();

        dm.merge_data(&json!({"x": {"y": 1}}), true, false);
        dm.merge_data(&json!({"x": null}), true, false);

        assert_eq!(dm.get_by_path(&["x", "y"]), Some(json!(1)));
    }

    #[test]
    fn test_nan_sentinel_stored_as_null() {
        let dm = market_manager();

        dm.merge_data(&json!({"quotes": {"A": {"last_price": "NaN"}}}), true, true);
        assert_eq!(dm.get_by_path(&["quotes", "A", "last_price"]), Some(Value::Null));
    }

    #[test]
    fn test_set_default_idempotent() {
        let dm = market_manager();

        let first = dm.set_default(&["quotes", "A", "x"], json!(1));
        assert_eq!(first, Some(json!(1)));
        let second = dm.set_default(&["quotes", "A", "x"], json!(2));
        assert_eq!(second, Some(json!(1)));
    }

    #[test]
    fn test_set_default_blocked_by_scalar() {
        let dm = market_manager();
        dm.merge_data(&json!({"a": 1}), false, false);
        assert_eq!(dm.set_default(&["a", "b", "c"], json!(1)), None);
    }

    #[test]
    fn test_dump_is_isolated_copy() {
        let dm = market_manager();
        dm.merge_data(&json!({"quotes": {"A": {"x": 1}}}), true, true);

        let mut copy = dm.dump();
        copy["quotes"]["A"]["x"] = json!(999);

        assert_eq!(dm.get_by_path(&["quotes", "A", "x"]), Some(json!(1)));
    }

    #[test]
    fn test_merge_array_source() {
        let dm = market_manager();
        dm.merge_data(
            &json!([
                {"quotes": {"A": {"x": 1}}},
                "not an object",
                {"quotes": {"B": {"y": 2}}}
            ]),
            true,
            true,
        );
        assert_eq!(dm.epoch(), 1);
        assert_eq!(dm.get_by_path(&["quotes", "A", "x"]), Some(json!(1)));
        assert_eq!(dm.get_by_path(&["quotes", "B", "y"]), Some(json!(2)));
        assert_eq!(dm.diffs().len(), 2);
    }

    #[test]
    fn test_non_epoch_merge_keeps_old_marks() {
        let dm = market_manager();
        dm.merge_data(&json!({"quotes": {"A": {"x": 1}}}), true, true);
        assert!(dm.is_changing(&["quotes", "A"]));

        // 不增 epoch 的本地合并会把节点标成旧版本号，变更检测不触发
        dm.merge_data(&json!({"quotes": {"B": {"y": 2}}}), false, true);
        assert_eq!(dm.epoch(), 1);
        assert_eq!(dm.get_by_path(&["quotes", "B", "y"]), Some(json!(2)));
    }

    #[test]
    fn test_get_klines_data_filter_and_trim() {
        let dm = market_manager();

        let mut bars = Map::new();
        for id in 100..=110 {
            bars.insert(
                id.to_string(),
                json!({"datetime": id * 60_000_000_000i64, "open": 1.0, "close": 2.0,
                       "high": 3.0, "low": 0.5, "volume": 10, "open_oi": 1, "close_oi": 1}),
            );
        }

        dm.merge_data(
            &json!({
                "klines": {"SHFE.au2602": {"60000000000": {
                    "last_id": 110,
                    "trading_day_start_id": 100,
                    "trading_day_end_id": 110,
                    "data": bars
                }}},
                "charts": {"chart1": {
                    "left_id": 100,
                    "right_id": 105,
                    "state": {"ins_list": "SHFE.au2602", "duration": 60000000000i64}
                }}
            }),
            true,
            true,
        );

        let series = dm.get_klines_data("SHFE.au2602", 60_000_000_000, Some(4)).unwrap();
        let ids: Vec<i64> = series.data.iter().map(|k| k.id).collect();
        assert_eq!(ids, vec![102, 103, 104, 105]);
        assert_eq!(series.last_id, 110);
    }

    #[test]
    fn test_get_multi_klines_alignment() {
        let dm = market_manager();

        dm.merge_data(
            &json!({
                "klines": {
                    "A": {"60000000000": {
                        "last_id": 12,
                        "data": {
                            "10": {"datetime": 10, "close": 1.0},
                            "11": {"datetime": 11, "close": 1.1},
                            "12": {"datetime": 12, "close": 1.2}
                        },
                        "binding": {"B": {"10": 20, "12": 22}}
                    }},
                    "B": {"60000000000": {
                        "last_id": 22,
                        "data": {
                            "20": {"datetime": 10, "close": 2.0},
                            "22": {"datetime": 12, "close": 2.2}
                        }
                    }}
                },
                "charts": {"c1": {"left_id": 10, "right_id": 12,
                                   "state": {"ins_list": "A,B", "duration": 60000000000i64}}}
            }),
            true,
            true,
        );

        let symbols = vec!["A".to_string(), "B".to_string()];
        let multi = dm
            .get_multi_klines_data(&symbols, 60_000_000_000, "c1", 3)
            .unwrap();

        assert_eq!(multi.data.len(), 3);

        let slot10 = &multi.data[0];
        assert_eq!(slot10.main_id, 10);
        assert!(slot10.klines.contains_key("A"));
        assert_eq!(slot10.klines.get("B").map(|k| k.id), Some(20));

        let slot11 = &multi.data[1];
        assert_eq!(slot11.main_id, 11);
        assert!(slot11.klines.contains_key("A"));
        assert!(!slot11.klines.contains_key("B"));

        let slot12 = &multi.data[2];
        assert_eq!(slot12.main_id, 12);
        assert_eq!(slot12.klines.get("B").map(|k| k.id), Some(22));
    }

    #[test]
    fn test_get_ticks_data() {
        let dm = market_manager();

        dm.merge_data(
            &json!({
                "ticks": {"A": {
                    "last_id": 5,
                    "data": {
                        "3": {"datetime": 3, "last_price": 1.0},
                        "4": {"datetime": 4, "last_price": 2.0},
                        "5": {"datetime": 5, "last_price": 3.0}
                    }
                }},
                "charts": {"t1": {"right_id": 4,
                                   "state": {"ins_list": "A", "duration": 0}}}
            }),
            true,
            true,
        );

        let series = dm.get_ticks_data("A", Some(10)).unwrap();
        let ids: Vec<i64> = series.data.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![3, 4]);
    }

    #[test]
    fn test_typed_account_getter() {
        let dm = SnapshotManager::new(SnapshotManager::trade_skeleton("user1"));
        dm.merge_data(
            &json!({"trade": {"user1": {"accounts": {"CNY": {
                "balance": 100000.0, "available": 95000
            }}}}}),
            true,
            true,
        );

        let account = dm.get_account("user1", "CNY").unwrap();
        assert_eq!(account.balance, 100000.0);
        assert_eq!(account.available, 95000.0);
    }

    #[test]
    fn test_view_width_reset() {
        let dm = market_manager();
        dm.set_view_width(0);
        assert_eq!(dm.view_width(), 500);
        dm.set_view_width(2000);
        assert_eq!(dm.view_width(), 2000);
    }

    #[tokio::test]
    async fn test_on_data_callback_fires() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let dm = Arc::new(market_manager());
        let counter = Arc::new(AtomicUsize::new(0));

        let c = counter.clone();
        dm.on_data(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        dm.merge_data(&json!({"quotes": {"A": {"x": 1}}}), true, true);
        // 不增 epoch 的合并不触发回调
        dm.merge_data(&json!({"quotes": {"A": {"x": 2}}}), false, true);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
