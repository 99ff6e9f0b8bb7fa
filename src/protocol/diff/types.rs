//! DIFF 协议数据类型定义
//!
//! 包含两部分：
//! - **QIFI 数据层**: Account, Position, Order, Trade（交易业务数据）
//! - **DIFF 扩展层**: Quote, Kline, Tick, Chart, Notify（行情与图表数据）
//!
//! 类型化视图由业务快照的子树深拷贝后解码得到，解码器必须容忍：
//! 未知字段、缺失字段、null（合并时 `"NaN"`/`"-"` 已落地为 null）、
//! 以及整数/浮点的数值表示差异。因此所有数值字段都走 `de` 模块里的
//! 宽松反序列化函数。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 宽松数值反序列化
///
/// 服务端推送的数值可能是整数、浮点或 null，字段也可能整体缺失。
/// 解码失败一律落回零值，不让单个字段毁掉整条记录。
pub(crate) mod de {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn f64_lossy<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        let v = Option::<Value>::deserialize(d)?;
        Ok(match v {
            Some(Value::Number(n)) => n.as_f64().unwrap_or_default(),
            Some(Value::String(s)) => s.parse().unwrap_or_default(),
            _ => 0.0,
        })
    }

    pub fn i64_lossy<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        let v = Option::<Value>::deserialize(d)?;
        Ok(match v {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or_default(),
            Some(Value::String(s)) => s.parse().unwrap_or_default(),
            _ => 0,
        })
    }

    pub fn i32_lossy<'de, D: Deserializer<'de>>(d: D) -> Result<i32, D::Error> {
        i64_lossy(d).map(|v| v as i32)
    }

    pub fn bool_lossy<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        let v = Option::<Value>::deserialize(d)?;
        Ok(matches!(v, Some(Value::Bool(true))))
    }

    pub fn string_lossy<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        let v = Option::<Value>::deserialize(d)?;
        Ok(match v {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        })
    }
}

fn neg_one() -> i64 {
    -1
}

// ============================================================================
// 常量定义
// ============================================================================

/// 买卖方向
pub const DIRECTION_BUY: &str = "BUY";
pub const DIRECTION_SELL: &str = "SELL";

/// 开平标志
pub const OFFSET_OPEN: &str = "OPEN";
pub const OFFSET_CLOSE: &str = "CLOSE";
pub const OFFSET_CLOSETODAY: &str = "CLOSETODAY";

/// 价格类型
pub const PRICE_TYPE_LIMIT: &str = "LIMIT";
pub const PRICE_TYPE_ANY: &str = "ANY";

/// 委托单状态
pub const ORDER_STATUS_ALIVE: &str = "ALIVE";
pub const ORDER_STATUS_FINISHED: &str = "FINISHED";

// ============================================================================
// DIFF 扩展层：行情数据
// ============================================================================

/// 行情报价数据
///
/// 实时行情 + 合约服务下发的静态合约信息（乘数、最小变动价位等）。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Quote {
    // 基本信息
    #[serde(deserialize_with = "de::string_lossy")]
    pub instrument_id: String,
    #[serde(deserialize_with = "de::string_lossy")]
    pub datetime: String,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub last_price: f64,

    // 卖盘五档
    #[serde(deserialize_with = "de::f64_lossy")]
    pub ask_price1: f64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub ask_volume1: i64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub ask_price2: f64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub ask_volume2: i64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub ask_price3: f64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub ask_volume3: i64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub ask_price4: f64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub ask_volume4: i64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub ask_price5: f64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub ask_volume5: i64,

    // 买盘五档
    #[serde(deserialize_with = "de::f64_lossy")]
    pub bid_price1: f64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub bid_volume1: i64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub bid_price2: f64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub bid_volume2: i64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub bid_price3: f64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub bid_volume3: i64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub bid_price4: f64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub bid_volume4: i64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub bid_price5: f64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub bid_volume5: i64,

    // 当日统计
    #[serde(deserialize_with = "de::f64_lossy")]
    pub highest: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub lowest: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub open: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub close: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub average: f64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub volume: i64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub amount: f64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub open_interest: i64,

    // 涨跌停
    #[serde(deserialize_with = "de::f64_lossy")]
    pub lower_limit: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub upper_limit: f64,

    // 结算价
    #[serde(deserialize_with = "de::f64_lossy")]
    pub settlement: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub pre_settlement: f64,

    // 涨跌
    #[serde(deserialize_with = "de::f64_lossy")]
    pub change: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub change_percent: f64,

    // 期权相关
    #[serde(deserialize_with = "de::f64_lossy")]
    pub strike_price: f64,

    // 昨日数据
    #[serde(deserialize_with = "de::i64_lossy")]
    pub pre_open_interest: i64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub pre_close: f64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub pre_volume: i64,

    // 保证金和手续费
    #[serde(deserialize_with = "de::f64_lossy")]
    pub margin: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub commission: f64,

    // 合约信息（从合约服务获取）
    #[serde(deserialize_with = "de::string_lossy")]
    pub class: String,
    #[serde(deserialize_with = "de::string_lossy")]
    pub exchange_id: String,
    #[serde(deserialize_with = "de::string_lossy")]
    pub product_id: String,
    #[serde(deserialize_with = "de::string_lossy")]
    pub product_short_name: String,
    #[serde(deserialize_with = "de::string_lossy")]
    pub underlying_product: String,
    #[serde(deserialize_with = "de::string_lossy")]
    pub underlying_symbol: String,
    #[serde(deserialize_with = "de::i32_lossy")]
    pub delivery_year: i32,
    #[serde(deserialize_with = "de::i32_lossy")]
    pub delivery_month: i32,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub expire_datetime: i64,
    #[serde(deserialize_with = "de::i32_lossy")]
    pub volume_multiple: i32,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub price_tick: f64,
    #[serde(deserialize_with = "de::i32_lossy")]
    pub price_decs: i32,
    #[serde(deserialize_with = "de::i32_lossy")]
    pub max_market_order_volume: i32,
    #[serde(deserialize_with = "de::i32_lossy")]
    pub min_market_order_volume: i32,
    #[serde(deserialize_with = "de::i32_lossy")]
    pub max_limit_order_volume: i32,
    #[serde(deserialize_with = "de::i32_lossy")]
    pub min_limit_order_volume: i32,
    #[serde(deserialize_with = "de::bool_lossy")]
    pub expired: bool,
    #[serde(deserialize_with = "de::string_lossy")]
    pub py: String,
}

impl Quote {
    /// 按昨结算价刷新涨跌和涨跌幅
    pub fn update_change(&mut self) {
        if self.last_price.is_finite() && self.pre_settlement.is_finite() && self.pre_settlement != 0.0
        {
            self.change = self.last_price - self.pre_settlement;
            self.change_percent = self.change / self.pre_settlement * 100.0;
        }
    }
}

/// K线柱
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Kline {
    /// K线 ID（来自 data map 的键，解码后回填）
    #[serde(deserialize_with = "de::i64_lossy")]
    pub id: i64,
    /// K线起点时间（纳秒）
    #[serde(deserialize_with = "de::i64_lossy")]
    pub datetime: i64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub open: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub close: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub high: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub low: f64,
    /// 起始持仓量
    #[serde(deserialize_with = "de::i64_lossy")]
    pub open_oi: i64,
    /// 结束持仓量
    #[serde(deserialize_with = "de::i64_lossy")]
    pub close_oi: i64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub volume: i64,
}

/// Tick 数据
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Tick {
    #[serde(deserialize_with = "de::i64_lossy")]
    pub id: i64,
    /// tick 时间（纳秒）
    #[serde(deserialize_with = "de::i64_lossy")]
    pub datetime: i64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub last_price: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub average: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub highest: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub lowest: f64,

    #[serde(deserialize_with = "de::f64_lossy")]
    pub ask_price1: f64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub ask_volume1: i64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub ask_price2: f64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub ask_volume2: i64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub ask_price3: f64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub ask_volume3: i64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub ask_price4: f64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub ask_volume4: i64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub ask_price5: f64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub ask_volume5: i64,

    #[serde(deserialize_with = "de::f64_lossy")]
    pub bid_price1: f64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub bid_volume1: i64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub bid_price2: f64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub bid_volume2: i64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub bid_price3: f64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub bid_volume3: i64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub bid_price4: f64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub bid_volume4: i64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub bid_price5: f64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub bid_volume5: i64,

    #[serde(deserialize_with = "de::i64_lossy")]
    pub volume: i64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub amount: f64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub open_interest: i64,
}

/// Chart 信息（图表状态的类型化视图）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartInfo {
    #[serde(deserialize_with = "de::string_lossy")]
    pub chart_id: String,
    /// 左边界K线 ID（-1 表示未设置）
    #[serde(default = "neg_one", deserialize_with = "de::i64_lossy")]
    pub left_id: i64,
    /// 右边界K线 ID（-1 表示未设置）
    #[serde(default = "neg_one", deserialize_with = "de::i64_lossy")]
    pub right_id: i64,
    /// 服务端是否还有分片数据未发完
    #[serde(deserialize_with = "de::bool_lossy")]
    pub more_data: bool,
    /// 数据是否已准备好（分片传输完成）
    #[serde(deserialize_with = "de::bool_lossy")]
    pub ready: bool,
    #[serde(deserialize_with = "de::i32_lossy")]
    pub view_width: i32,
}

impl Default for ChartInfo {
    fn default() -> Self {
        Self {
            chart_id: String::new(),
            left_id: -1,
            right_id: -1,
            more_data: false,
            ready: false,
            view_width: 0,
        }
    }
}

// ============================================================================
// QIFI 数据层：交易业务数据
// ============================================================================

/// 账户资金信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Account {
    #[serde(deserialize_with = "de::f64_lossy")]
    pub curr_margin: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub frozen_margin: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub frozen_commission: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub frozen_premium: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub available: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub balance: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub pre_balance: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub deposit: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub withdraw: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub close_profit: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub position_profit: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub commission: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub premium: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub static_balance: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub risk_ratio: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub market_value: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub cash_assets: f64,
}

/// 持仓信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Position {
    #[serde(deserialize_with = "de::string_lossy")]
    pub exchange_id: String,
    #[serde(deserialize_with = "de::string_lossy")]
    pub instrument_id: String,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub volume_short_today: i64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub volume_short_his: i64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub volume_long_today: i64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub volume_long_his: i64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub volume_long_frozen: i64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub volume_short_frozen: i64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub open_price_long: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub open_price_short: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub open_cost_long: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub open_cost_short: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub position_price_long: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub position_price_short: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub position_cost_long: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub position_cost_short: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub float_profit_long: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub float_profit_short: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub float_profit: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub position_profit_long: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub position_profit_short: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub position_profit: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub margin_long: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub margin_short: f64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub margin: f64,
}

/// 委托单信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Order {
    #[serde(deserialize_with = "de::string_lossy")]
    pub order_id: String,
    #[serde(deserialize_with = "de::string_lossy")]
    pub exchange_id: String,
    #[serde(deserialize_with = "de::string_lossy")]
    pub instrument_id: String,
    /// BUY/SELL
    #[serde(deserialize_with = "de::string_lossy")]
    pub direction: String,
    /// OPEN/CLOSE/CLOSETODAY
    #[serde(deserialize_with = "de::string_lossy")]
    pub offset: String,
    /// 总报单手数
    #[serde(deserialize_with = "de::i64_lossy")]
    pub volume_orign: i64,
    /// 未成交手数
    #[serde(deserialize_with = "de::i64_lossy")]
    pub volume_left: i64,
    /// LIMIT/ANY
    #[serde(deserialize_with = "de::string_lossy")]
    pub price_type: String,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub limit_price: f64,
    /// ANY/MIN/ALL
    #[serde(deserialize_with = "de::string_lossy")]
    pub volume_condition: String,
    /// IOC/GFS/GFD/GTC/GFA
    #[serde(deserialize_with = "de::string_lossy")]
    pub time_condition: String,
    /// 下单时间（纳秒）
    #[serde(deserialize_with = "de::i64_lossy")]
    pub insert_date_time: i64,
    /// ALIVE/FINISHED
    #[serde(deserialize_with = "de::string_lossy")]
    pub status: String,
}

/// 成交记录
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Trade {
    #[serde(deserialize_with = "de::string_lossy")]
    pub trade_id: String,
    #[serde(deserialize_with = "de::string_lossy")]
    pub order_id: String,
    #[serde(deserialize_with = "de::string_lossy")]
    pub exchange_id: String,
    #[serde(deserialize_with = "de::string_lossy")]
    pub instrument_id: String,
    #[serde(deserialize_with = "de::string_lossy")]
    pub direction: String,
    #[serde(deserialize_with = "de::string_lossy")]
    pub offset: String,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub price: f64,
    #[serde(deserialize_with = "de::i64_lossy")]
    pub volume: i64,
    /// 成交时间（纳秒）
    #[serde(deserialize_with = "de::i64_lossy")]
    pub trade_date_time: i64,
    #[serde(deserialize_with = "de::f64_lossy")]
    pub commission: f64,
}

/// 会话信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    #[serde(deserialize_with = "de::string_lossy")]
    pub trading_day: String,
}

/// 历史结算单
///
/// 结算单正文保持字符串形态（map + 表格行），不做数值转换。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HisSettlement {
    pub trading_day: String,
    /// 资金状况：标签 -> 带符号的十进制字符串
    pub account: HashMap<String, String>,
    /// 平仓明细表格行
    pub position_closed: Vec<HashMap<String, String>>,
    /// 成交记录表格行
    pub transaction_records: Vec<HashMap<String, String>>,
}

/// 通知事件
///
/// 服务端夹带在 `rtn_data` 差分元素 `notify` 字段里的带外事件，
/// 合并前被提取并从差分中移除。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Notify {
    #[serde(deserialize_with = "de::string_lossy")]
    pub code: String,
    #[serde(deserialize_with = "de::string_lossy")]
    pub level: String,
    #[serde(rename = "type", deserialize_with = "de::string_lossy")]
    pub kind: String,
    #[serde(deserialize_with = "de::string_lossy")]
    pub content: String,
    #[serde(deserialize_with = "de::string_lossy")]
    pub bid: String,
    #[serde(deserialize_with = "de::string_lossy")]
    pub user_id: String,
}

/// 单个持仓更新
#[derive(Debug, Clone, Serialize)]
pub struct PositionUpdate {
    pub symbol: String,
    pub position: Position,
}

// ============================================================================
// 序列数据（SeriesApi 的输出）
// ============================================================================

/// K线序列数据（带 Chart 信息）
#[derive(Debug, Clone, Default, Serialize)]
pub struct KlineSeriesData {
    pub symbol: String,
    /// K线周期（纳秒）
    pub duration_ns: i64,
    pub chart_id: String,
    pub chart: Option<ChartInfo>,
    pub last_id: i64,
    pub trading_day_start_id: i64,
    pub trading_day_end_id: i64,
    /// K线数组（仅保留视图宽度长度，按 id 升序）
    pub data: Vec<Kline>,
}

/// Tick 序列数据
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickSeriesData {
    pub symbol: String,
    pub chart_id: String,
    pub chart: Option<ChartInfo>,
    pub last_id: i64,
    pub data: Vec<Tick>,
}

/// K线元数据（多合约场景下每个合约一份）
#[derive(Debug, Clone, Default, Serialize)]
pub struct KlineMetadata {
    pub symbol: String,
    pub last_id: i64,
    pub trading_day_start_id: i64,
    pub trading_day_end_id: i64,
}

/// 对齐的K线集合（一个时间槽位上的多个合约）
#[derive(Debug, Clone, Default, Serialize)]
pub struct AlignedKlineSet {
    /// 主合约的K线 ID
    pub main_id: i64,
    /// 主合约K线起点时间（纳秒）
    pub datetime: i64,
    /// symbol -> Kline（binding 缺失的槽位没有对应合约的K线）
    pub klines: HashMap<String, Kline>,
}

/// 多合约对齐的K线序列数据
///
/// 主合约（第一个合约）定义时间轴，其余合约按服务端下发的 binding
/// 映射对齐到主合约的K线 ID 上。
#[derive(Debug, Clone, Default, Serialize)]
pub struct MultiKlineSeriesData {
    pub chart_id: String,
    pub duration_ns: i64,
    pub main_symbol: String,
    pub symbols: Vec<String>,
    pub left_id: i64,
    pub right_id: i64,
    pub view_width: i32,
    pub data: Vec<AlignedKlineSet>,
    pub metadata: HashMap<String, KlineMetadata>,
}

/// 序列数据（统一接口）
#[derive(Debug, Clone, Default, Serialize)]
pub struct SeriesData {
    pub is_multi: bool,
    pub is_tick: bool,
    pub symbols: Vec<String>,
    pub single: Option<KlineSeriesData>,
    pub multi: Option<MultiKlineSeriesData>,
    pub tick_data: Option<TickSeriesData>,
}

impl SeriesData {
    /// 提取指定合约的K线序列
    pub fn symbol_klines(&self, symbol: &str) -> Option<KlineSeriesData> {
        if self.is_multi {
            let multi = self.multi.as_ref()?;
            let mut result = KlineSeriesData {
                symbol: symbol.to_string(),
                duration_ns: multi.duration_ns,
                chart_id: multi.chart_id.clone(),
                ..Default::default()
            };
            if let Some(meta) = multi.metadata.get(symbol) {
                result.last_id = meta.last_id;
                result.trading_day_start_id = meta.trading_day_start_id;
                result.trading_day_end_id = meta.trading_day_end_id;
            }
            for set in &multi.data {
                if let Some(kline) = set.klines.get(symbol) {
                    result.data.push(kline.clone());
                }
            }
            Some(result)
        } else {
            self.single.clone()
        }
    }
}

/// 数据更新信息
#[derive(Debug, Clone, Default)]
pub struct UpdateInfo {
    /// 是否有新 K线/Tick
    pub has_new_bar: bool,
    /// 新 K线的 ID（symbol -> id）
    pub new_bar_ids: HashMap<String, i64>,
    /// 是否有 K线更新（最后一根）
    pub has_bar_update: bool,
    /// Chart 范围是否变化
    pub chart_range_changed: bool,
    pub old_left_id: i64,
    pub old_right_id: i64,
    pub new_left_id: i64,
    pub new_right_id: i64,
    /// Chart 是否首次同步完成
    pub has_chart_sync: bool,
    /// Chart 数据传输是否完成（ready 且无剩余分片）
    pub chart_ready: bool,
}

// ============================================================================
// 请求参数
// ============================================================================

/// 下单请求
#[derive(Debug, Clone)]
pub struct InsertOrderRequest {
    /// 合约代码（格式 EXCHANGE.INSTRUMENT，如 SHFE.au2512）
    pub symbol: String,
    /// BUY/SELL
    pub direction: String,
    /// OPEN/CLOSE/CLOSETODAY
    pub offset: String,
    /// LIMIT/ANY
    pub price_type: String,
    pub limit_price: f64,
    pub volume: i64,
}

/// 序列订阅选项
#[derive(Debug, Clone, Default)]
pub struct SeriesOptions {
    /// 合约列表（第一个为主合约）
    pub symbols: Vec<String>,
    /// K线周期（纳秒），0 表示 Tick
    pub duration_ns: i64,
    /// 视图宽度（最大 10000，<=0 使用默认）
    pub view_width: i32,
    /// 图表 ID（缺省时自动生成）
    pub chart_id: Option<String>,

    // 历史数据订阅参数（left_kline_id 优先）
    pub left_kline_id: Option<i64>,
    /// 焦点时间（纳秒），需配合 focus_position
    pub focus_datetime: Option<i64>,
    /// 焦点方向（-1/+1，原样转发，以服务端约定为准）
    pub focus_position: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quote_lossy_decode() {
        // 整数/浮点混写 + null + 未知字段都不应使解码失败
        let quote: Quote = serde_json::from_value(json!({
            "instrument_id": "SHFE.au2602",
            "last_price": 500,
            "volume": 1000.0,
            "ask_price1": null,
            "bid_volume1": "12",
            "_epoch": 3,
            "unknown_field": {"x": 1}
        }))
        .unwrap();

        assert_eq!(quote.instrument_id, "SHFE.au2602");
        assert_eq!(quote.last_price, 500.0);
        assert_eq!(quote.volume, 1000);
        assert_eq!(quote.ask_price1, 0.0);
        assert_eq!(quote.bid_volume1, 12);
    }

    #[test]
    fn test_chart_info_defaults() {
        let chart: ChartInfo = serde_json::from_value(json!({})).unwrap();
        assert_eq!(chart.left_id, -1);
        assert_eq!(chart.right_id, -1);
        assert!(!chart.ready);

        let chart: ChartInfo = serde_json::from_value(json!({
            "left_id": 100, "right_id": 105.0, "ready": true, "more_data": false
        }))
        .unwrap();
        assert_eq!(chart.left_id, 100);
        assert_eq!(chart.right_id, 105);
        assert!(chart.ready);
    }

    #[test]
    fn test_order_decode_missing_fields() {
        let order: Order = serde_json::from_value(json!({
            "order_id": "QADIFF_abc", "status": "ALIVE", "volume_left": 3
        }))
        .unwrap();
        assert_eq!(order.order_id, "QADIFF_abc");
        assert_eq!(order.status, ORDER_STATUS_ALIVE);
        assert_eq!(order.volume_left, 3);
        assert_eq!(order.limit_price, 0.0);
    }

    #[test]
    fn test_notify_type_rename() {
        let notify: Notify = serde_json::from_value(json!({
            "code": "0", "level": "INFO", "type": "MESSAGE", "content": "ok"
        }))
        .unwrap();
        assert_eq!(notify.kind, "MESSAGE");
    }

    #[test]
    fn test_quote_update_change() {
        let mut quote = Quote {
            last_price: 505.0,
            pre_settlement: 500.0,
            ..Default::default()
        };
        quote.update_change();
        assert_eq!(quote.change, 5.0);
        assert_eq!(quote.change_percent, 1.0);
    }

    #[test]
    fn test_series_data_symbol_klines_multi() {
        let mut set = AlignedKlineSet {
            main_id: 10,
            datetime: 0,
            klines: HashMap::new(),
        };
        set.klines.insert("A".to_string(), Kline { id: 10, ..Default::default() });
        set.klines.insert("B".to_string(), Kline { id: 20, ..Default::default() });

        let mut metadata = HashMap::new();
        metadata.insert(
            "B".to_string(),
            KlineMetadata { symbol: "B".to_string(), last_id: 20, ..Default::default() },
        );

        let data = SeriesData {
            is_multi: true,
            symbols: vec!["A".to_string(), "B".to_string()],
            multi: Some(MultiKlineSeriesData {
                main_symbol: "A".to_string(),
                data: vec![set],
                metadata,
                ..Default::default()
            }),
            ..Default::default()
        };

        let b = data.symbol_klines("B").unwrap();
        assert_eq!(b.last_id, 20);
        assert_eq!(b.data.len(), 1);
        assert_eq!(b.data[0].id, 20);
    }
}
