//! 序列数据 API
//!
//! 管理 K线/Tick 订阅的完整生命周期：
//!
//! 1. 发送 `set_chart` 请求（单/多合约、实时/历史锚点）
//! 2. 跟踪每次差分合并后的序列状态（新K线、末根更新、Chart 范围变化、
//!    分片历史数据是否传输完成）
//! 3. 物化类型化视图：id 升序、按 Chart right_id 过滤越界实时K线、
//!    按视图宽度裁剪；多合约按 binding 对齐到主合约时间轴
//!
//! # Start 契约
//!
//! 订阅创建后不投递任何回调，直到调用 `start()`；`start()` 幂等，
//! 首次调用立即把当前快照作为初始数据投递（创建到 start 之间收到的
//! 数据被合并进这份快照）。`*_and_start` 入口把两步并成一步。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::protocol::diff::snapshot::SnapshotManager;
use crate::protocol::diff::types::{
    ChartInfo, SeriesData, SeriesOptions, UpdateInfo,
};
use crate::protocol::messages::DiffClientMessage;
use crate::transport::QuoteChannel;
use crate::utils::spawn_or_call;
use crate::{ClientError, Result};

/// 视图宽度硬上限
const MAX_VIEW_WIDTH: i32 = 10000;

/// 序列数据 API
pub struct SeriesApi {
    dm: Arc<SnapshotManager>,
    channel: Arc<QuoteChannel>,
    default_view_width: i32,
    subscriptions: Mutex<HashMap<String, Arc<SeriesSubscription>>>,
}

impl SeriesApi {
    pub fn new(dm: Arc<SnapshotManager>, channel: Arc<QuoteChannel>, default_view_width: i32) -> Self {
        Self {
            dm,
            channel,
            default_view_width,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// 订阅单个合约的 K线
    pub async fn kline(
        &self,
        symbol: &str,
        duration_ns: i64,
        view_width: i32,
    ) -> Result<Arc<SeriesSubscription>> {
        self.subscribe(SeriesOptions {
            symbols: vec![symbol.to_string()],
            duration_ns,
            view_width,
            ..Default::default()
        })
        .await
    }

    /// 订阅多个合约的 K线（同一个 Chart，按主合约对齐）
    pub async fn kline_multi(
        &self,
        symbols: Vec<String>,
        duration_ns: i64,
        view_width: i32,
    ) -> Result<Arc<SeriesSubscription>> {
        if symbols.is_empty() {
            return Err(ClientError::InvalidParameter("no symbols provided".to_string()));
        }
        self.subscribe(SeriesOptions {
            symbols,
            duration_ns,
            view_width,
            ..Default::default()
        })
        .await
    }

    /// 订阅单个合约的 Tick
    pub async fn tick(&self, symbol: &str, view_width: i32) -> Result<Arc<SeriesSubscription>> {
        self.subscribe(SeriesOptions {
            symbols: vec![symbol.to_string()],
            duration_ns: 0,
            view_width,
            ..Default::default()
        })
        .await
    }

    /// 订阅历史 K线（以 left_kline_id 为左边界）
    pub async fn kline_history(
        &self,
        symbol: &str,
        duration_ns: i64,
        view_width: i32,
        left_kline_id: i64,
    ) -> Result<Arc<SeriesSubscription>> {
        self.subscribe(SeriesOptions {
            symbols: vec![symbol.to_string()],
            duration_ns,
            view_width,
            left_kline_id: Some(left_kline_id),
            ..Default::default()
        })
        .await
    }

    /// 订阅历史 K线（以焦点时间 + 方向定位）
    ///
    /// `focus_position` 取 -1/+1，原样转发，方向语义以服务端约定为准。
    pub async fn kline_history_with_focus(
        &self,
        symbol: &str,
        duration_ns: i64,
        view_width: i32,
        focus_datetime_ns: i64,
        focus_position: i32,
    ) -> Result<Arc<SeriesSubscription>> {
        self.subscribe(SeriesOptions {
            symbols: vec![symbol.to_string()],
            duration_ns,
            view_width,
            focus_datetime: Some(focus_datetime_ns),
            focus_position: Some(focus_position),
            ..Default::default()
        })
        .await
    }

    /// 订阅历史 Tick（以 left_kline_id 为左边界）
    pub async fn tick_history(
        &self,
        symbol: &str,
        view_width: i32,
        left_kline_id: i64,
    ) -> Result<Arc<SeriesSubscription>> {
        self.subscribe(SeriesOptions {
            symbols: vec![symbol.to_string()],
            duration_ns: 0,
            view_width,
            left_kline_id: Some(left_kline_id),
            ..Default::default()
        })
        .await
    }

    /// 通用订阅入口
    ///
    /// 同一 chart_id 重复订阅返回已有订阅。
    pub async fn subscribe(&self, mut options: SeriesOptions) -> Result<Arc<SeriesSubscription>> {
        if options.symbols.is_empty() {
            return Err(ClientError::InvalidParameter("no symbols provided".to_string()));
        }

        if options.view_width <= 0 {
            options.view_width = self.default_view_width;
        }

        let chart_id = match &options.chart_id {
            Some(id) => id.clone(),
            None => {
                let id = generate_chart_id(&options);
                options.chart_id = Some(id.clone());
                id
            }
        };

        if let Some(existing) = self.subscriptions.lock().get(&chart_id) {
            return Ok(existing.clone());
        }

        let subscription =
            SeriesSubscription::new(self.dm.clone(), self.channel.clone(), options).await?;

        self.subscriptions.lock().insert(chart_id, subscription.clone());
        Ok(subscription)
    }

    /// 订阅并立即开始投递
    pub async fn subscribe_and_start(&self, options: SeriesOptions) -> Result<Arc<SeriesSubscription>> {
        let subscription = self.subscribe(options).await?;
        subscription.start();
        Ok(subscription)
    }

    /// 订阅单合约 K线并立即开始投递
    pub async fn kline_and_start(
        &self,
        symbol: &str,
        duration_ns: i64,
        view_width: i32,
    ) -> Result<Arc<SeriesSubscription>> {
        let subscription = self.kline(symbol, duration_ns, view_width).await?;
        subscription.start();
        Ok(subscription)
    }

    /// 订阅 Tick 并立即开始投递
    pub async fn tick_and_start(&self, symbol: &str, view_width: i32) -> Result<Arc<SeriesSubscription>> {
        let subscription = self.tick(symbol, view_width).await?;
        subscription.start();
        Ok(subscription)
    }
}

/// 生成 Chart ID（UUID 后缀保证唯一）
fn generate_chart_id(options: &SeriesOptions) -> String {
    let uid = Uuid::new_v4();
    if options.duration_ns == 0 {
        format!("QADIFF_tick_{}", uid)
    } else {
        format!("QADIFF_kline_{}", uid)
    }
}

// ============================================================================
// SeriesSubscription
// ============================================================================

type UpdateCallback = Arc<dyn Fn(SeriesData, UpdateInfo) + Send + Sync + 'static>;
type DataCallback = Arc<dyn Fn(SeriesData) + Send + Sync + 'static>;
type SeriesErrorCallback = Arc<dyn Fn(ClientError) + Send + Sync + 'static>;

#[derive(Default)]
struct SeriesCallbacks {
    on_update: Option<UpdateCallback>,
    on_new_bar: Option<DataCallback>,
    on_bar_update: Option<DataCallback>,
    on_error: Option<SeriesErrorCallback>,
}

struct TrackerState {
    /// symbol -> 已见到的最新序列 id
    last_ids: HashMap<String, i64>,
    last_left_id: i64,
    last_right_id: i64,
    chart_ready: bool,
}

/// 序列订阅
pub struct SeriesSubscription {
    dm: Arc<SnapshotManager>,
    channel: Arc<QuoteChannel>,
    options: SeriesOptions,
    chart_id: String,
    state: Mutex<TrackerState>,
    callbacks: RwLock<SeriesCallbacks>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl SeriesSubscription {
    async fn new(
        dm: Arc<SnapshotManager>,
        channel: Arc<QuoteChannel>,
        options: SeriesOptions,
    ) -> Result<Arc<Self>> {
        let chart_id = options
            .chart_id
            .clone()
            .ok_or_else(|| ClientError::InvalidParameter("chart_id not resolved".to_string()))?;

        let mut last_ids = HashMap::new();
        for symbol in &options.symbols {
            last_ids.insert(symbol.clone(), -1);
        }

        let subscription = Arc::new(Self {
            dm: dm.clone(),
            channel,
            options,
            chart_id,
            state: Mutex::new(TrackerState {
                last_ids,
                last_left_id: -1,
                last_right_id: -1,
                chart_ready: false,
            }),
            callbacks: RwLock::new(SeriesCallbacks::default()),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        subscription.send_set_chart().await?;

        let weak = Arc::downgrade(&subscription);
        dm.on_data(move || {
            if let Some(subscription) = weak.upgrade() {
                subscription.process_update(false);
            }
        });

        Ok(subscription)
    }

    async fn send_set_chart(&self) -> Result<()> {
        let mut view_width = self.options.view_width;
        if view_width > MAX_VIEW_WIDTH {
            log::warn!(
                "view_width {} exceeds maximum limit, adjusted to {}",
                view_width,
                MAX_VIEW_WIDTH
            );
            view_width = MAX_VIEW_WIDTH;
        }

        // 历史锚点优先级: left_kline_id > focus_datetime + focus_position
        let (left_kline_id, focus_datetime, focus_position) = match self.options.left_kline_id {
            Some(id) => (Some(id), None, None),
            None => match (self.options.focus_datetime, self.options.focus_position) {
                (Some(datetime), Some(position)) => (None, Some(datetime), Some(position)),
                _ => (None, None, None),
            },
        };

        let request = DiffClientMessage::SetChart {
            chart_id: self.chart_id.clone(),
            ins_list: self.options.symbols.join(","),
            duration: self.options.duration_ns,
            view_width,
            left_kline_id,
            focus_datetime,
            focus_position,
        };

        self.channel.send(&request.to_value()).await?;

        log::info!(
            "Sent set_chart request: chart_id={}, symbols={:?}, view_width={}",
            self.chart_id,
            self.options.symbols,
            view_width
        );
        Ok(())
    }

    /// 图表 ID
    pub fn chart_id(&self) -> &str {
        &self.chart_id
    }

    // ========================================================================
    // 回调注册
    // ========================================================================

    /// 注册通用更新回调（附带详细的更新信息）
    pub fn on_update<F: Fn(SeriesData, UpdateInfo) + Send + Sync + 'static>(&self, handler: F) {
        self.callbacks.write().on_update = Some(Arc::new(handler));
    }

    /// 注册新 K线/Tick 回调（收到完整序列数据，便于计算指标）
    pub fn on_new_bar<F: Fn(SeriesData) + Send + Sync + 'static>(&self, handler: F) {
        self.callbacks.write().on_new_bar = Some(Arc::new(handler));
    }

    /// 注册末根 K线/Tick 盘中更新回调
    pub fn on_bar_update<F: Fn(SeriesData) + Send + Sync + 'static>(&self, handler: F) {
        self.callbacks.write().on_bar_update = Some(Arc::new(handler));
    }

    /// 注册错误回调
    pub fn on_error<F: Fn(ClientError) + Send + Sync + 'static>(&self, handler: F) {
        self.callbacks.write().on_error = Some(Arc::new(handler));
    }

    // ========================================================================
    // 生命周期
    // ========================================================================

    /// 开始投递回调（幂等）
    ///
    /// 首次调用立即投递一份当前快照；之前到达的数据已合并在这份快照里。
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.process_update(true);
    }

    /// 关闭订阅：发送空 ins_list + 零视图宽度的 set_chart 退订
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let request = DiffClientMessage::SetChart {
            chart_id: self.chart_id.clone(),
            ins_list: String::new(),
            duration: self.options.duration_ns,
            view_width: 0,
            left_kline_id: None,
            focus_datetime: None,
            focus_position: None,
        };
        self.channel.send(&request.to_value()).await
    }

    // ========================================================================
    // 更新处理
    // ========================================================================

    /// 处理一次数据更新；`force` 跳过变更检查（start 的初始快照）
    fn process_update(&self, force: bool) {
        if self.closed.load(Ordering::SeqCst) || !self.started.load(Ordering::SeqCst) {
            return;
        }

        let is_multi = self.options.symbols.len() > 1;
        let is_tick = self.options.duration_ns == 0;
        let main_symbol = &self.options.symbols[0];
        let duration_key = self.options.duration_ns.to_string();

        if !force {
            let data_changing = if is_tick {
                self.dm.is_changing(&["ticks", main_symbol])
            } else {
                self.dm.is_changing(&["klines", main_symbol, &duration_key])
            };
            let chart_changing = self.dm.is_changing(&["charts", &self.chart_id]);

            if !data_changing && !chart_changing {
                return;
            }
        }

        let series_data = if is_tick {
            self.tick_data()
        } else if is_multi {
            self.multi_kline_data()
        } else {
            self.single_kline_data()
        };

        let series_data = match series_data {
            Ok(data) => data,
            Err(e) => {
                let callback = self.callbacks.read().on_error.clone();
                if let Some(callback) = callback {
                    spawn_or_call(move || callback(e));
                }
                return;
            }
        };

        let mut info = UpdateInfo::default();
        self.detect_new_bars(&series_data, &mut info);
        self.detect_chart_range_change(&series_data, &mut info);

        let callbacks = {
            let guard = self.callbacks.read();
            (
                guard.on_update.clone(),
                guard.on_new_bar.clone(),
                guard.on_bar_update.clone(),
            )
        };

        if let Some(on_update) = callbacks.0 {
            let data = series_data.clone();
            let info_copy = info.clone();
            spawn_or_call(move || on_update(data, info_copy));
        }

        if info.has_new_bar {
            if let Some(on_new_bar) = callbacks.1 {
                let data = series_data.clone();
                spawn_or_call(move || on_new_bar(data));
            }
        } else if info.has_bar_update {
            if let Some(on_bar_update) = callbacks.2 {
                let data = series_data;
                spawn_or_call(move || on_bar_update(data));
            }
        }
    }

    /// 检测新K线：任一合约的序列 last_id 超过已跟踪值
    fn detect_new_bars(&self, data: &SeriesData, info: &mut UpdateInfo) {
        let mut state = self.state.lock();

        for symbol in &self.options.symbols {
            let current_id = if data.is_tick {
                data.tick_data.as_ref().map(|t| t.last_id).unwrap_or(0)
            } else if data.is_multi {
                data.multi
                    .as_ref()
                    .and_then(|m| m.metadata.get(symbol))
                    .map(|m| m.last_id)
                    .unwrap_or(0)
            } else {
                data.single.as_ref().map(|s| s.last_id).unwrap_or(0)
            };

            let last_id = state.last_ids.get(symbol).copied().unwrap_or(-1);
            if current_id > last_id && last_id != -1 {
                info.has_new_bar = true;
                info.new_bar_ids.insert(symbol.clone(), current_id);
            }
            state.last_ids.insert(symbol.clone(), current_id);
        }

        if !info.has_new_bar {
            let duration_key = self.options.duration_ns.to_string();
            for symbol in &self.options.symbols {
                let changing = if data.is_tick {
                    self.dm.is_changing(&["ticks", symbol])
                } else {
                    self.dm.is_changing(&["klines", symbol, &duration_key])
                };
                if changing {
                    info.has_bar_update = true;
                    break;
                }
            }
        }
    }

    /// 检测 Chart 范围变化与分片传输完成
    fn detect_chart_range_change(&self, data: &SeriesData, info: &mut UpdateInfo) {
        let chart: Option<ChartInfo> = if let Some(single) = &data.single {
            single.chart.clone()
        } else if let Some(tick) = &data.tick_data {
            tick.chart.clone()
        } else {
            self.fetch_chart_info()
        };

        let chart = match chart {
            Some(c) => c,
            None => return,
        };

        let mut state = self.state.lock();

        if chart.left_id != state.last_left_id || chart.right_id != state.last_right_id {
            if state.last_left_id != -1 || state.last_right_id != -1 {
                info.chart_range_changed = true;
                info.old_left_id = state.last_left_id;
                info.old_right_id = state.last_right_id;
                info.new_left_id = chart.left_id;
                info.new_right_id = chart.right_id;
            }
            state.last_left_id = chart.left_id;
            state.last_right_id = chart.right_id;
        }

        if chart.ready && !state.chart_ready {
            info.has_chart_sync = true;
            state.chart_ready = true;
        }

        // ready 且无剩余分片：初始/历史数据的分片传输全部完成
        if chart.ready && !chart.more_data {
            info.chart_ready = true;
            log::info!(
                "Chart data transfer completed: chart_id={}, left_id={}, right_id={}",
                self.chart_id,
                chart.left_id,
                chart.right_id
            );
        }
    }

    fn fetch_chart_info(&self) -> Option<ChartInfo> {
        let chart_data = self.dm.get_by_path(&["charts", &self.chart_id])?;
        let mut chart: ChartInfo = serde_json::from_value(chart_data).ok()?;
        chart.chart_id = self.chart_id.clone();
        Some(chart)
    }

    // ========================================================================
    // 数据物化
    // ========================================================================

    fn single_kline_data(&self) -> Result<SeriesData> {
        let symbol = &self.options.symbols[0];
        let mut series = self.dm.get_klines_data(
            symbol,
            self.options.duration_ns,
            Some(self.options.view_width),
        )?;

        series.chart_id = self.chart_id.clone();
        series.chart = self.fetch_chart_info();

        Ok(SeriesData {
            is_multi: false,
            is_tick: false,
            symbols: vec![symbol.clone()],
            single: Some(series),
            ..Default::default()
        })
    }

    fn multi_kline_data(&self) -> Result<SeriesData> {
        let multi = self.dm.get_multi_klines_data(
            &self.options.symbols,
            self.options.duration_ns,
            &self.chart_id,
            self.options.view_width,
        )?;

        Ok(SeriesData {
            is_multi: true,
            is_tick: false,
            symbols: self.options.symbols.clone(),
            multi: Some(multi),
            ..Default::default()
        })
    }

    fn tick_data(&self) -> Result<SeriesData> {
        let symbol = &self.options.symbols[0];
        let mut series = self
            .dm
            .get_ticks_data(symbol, Some(self.options.view_width))?;

        series.chart_id = self.chart_id.clone();
        series.chart = self.fetch_chart_info();

        Ok(SeriesData {
            is_multi: false,
            is_tick: true,
            symbols: vec![symbol.clone()],
            tick_data: Some(series),
            ..Default::default()
        })
    }
}
