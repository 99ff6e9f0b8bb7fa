//! DIFF 协议消息定义
//!
//! DIFF (Differential Information Flow for Finance) 协议消息类型，
//! 客户端与服务端消息都以 `aid` 字段区分。
//!
//! # 消息类型
//!
//! - 客户端: `DiffClientMessage` (aid-based，出站请求)
//! - 服务端: `DiffServerMessage` (aid-based，入站推送)
//!
//! 入站帧在传输层先解析为 `serde_json::Value`（未知 aid 直接忽略），
//! 本模块的枚举主要用于构造出站请求和测试断言。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// DIFF 协议客户端消息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "aid", rename_all = "snake_case")]
pub enum DiffClientMessage {
    /// 业务信息截面更新请求（流控信号，每收到一帧发一次）
    PeekMessage,

    /// 登录请求
    ReqLogin {
        bid: String,
        user_name: String,
        password: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        client_app_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        client_system_info: Option<String>,
    },

    /// 订阅行情（逗号分隔的合约列表，空串退订全部）
    SubscribeQuote { ins_list: String },

    /// 订阅图表数据（view_width 为 0 表示退订）
    SetChart {
        chart_id: String,
        ins_list: String,
        /// 周期(ns)，tick=0
        duration: i64,
        view_width: i32,
        /// 历史数据左边界（优先于 focus_datetime）
        #[serde(skip_serializing_if = "Option::is_none")]
        left_kline_id: Option<i64>,
        /// 焦点时间(ns)
        #[serde(skip_serializing_if = "Option::is_none")]
        focus_datetime: Option<i64>,
        /// 焦点方向（-1/+1）
        #[serde(skip_serializing_if = "Option::is_none")]
        focus_position: Option<i32>,
    },

    /// 下单
    InsertOrder {
        user_id: String,
        order_id: String,
        exchange_id: String,
        instrument_id: String,
        /// BUY/SELL
        direction: String,
        /// OPEN/CLOSE/CLOSETODAY
        offset: String,
        volume: i64,
        /// LIMIT/ANY
        price_type: String,
        limit_price: f64,
        /// ANY/MIN/ALL
        volume_condition: String,
        /// IOC/GFD
        time_condition: String,
    },

    /// 撤单
    CancelOrder { user_id: String, order_id: String },

    /// 确认结算单
    ConfirmSettlement,

    /// 查询历史结算单
    QrySettlementInfo { trading_day: String },
}

impl DiffClientMessage {
    /// 转为出站 JSON 值
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// DIFF 协议服务端消息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "aid", rename_all = "snake_case")]
pub enum DiffServerMessage {
    /// 业务信息截面更新（JSON Merge Patch 数组）
    RtnData { data: Vec<Value> },

    /// 期货公司列表
    RtnBrokers { brokers: Vec<Value> },

    /// 历史结算单正文
    QrySettlementInfo {
        settlement_info: String,
        user_name: String,
        trading_day: String,
    },
}
