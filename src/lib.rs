//! # QADIFF-RS
//!
//! DIFF 协议客户端 - 期货行情/交易实时差分同步 SDK
//!
//! ## 核心能力
//!
//! - **差分合并引擎**: 服务端以 JSON Merge Patch 推送业务截面，本地合并出
//!   带版本号 (epoch) 的完整业务快照
//! - **行情订阅**: Quote 实时订阅 / K线·Tick 序列订阅（含多合约对齐）
//! - **图表生命周期**: set_chart 请求、分片历史数据接收、视图宽度裁剪
//! - **交易会话**: 登录/下单/撤单/结算单查询，账户·持仓·委托·成交实时推送
//! - **传输层**: 自动重连的 WebSocket 客户端（URL 轮换、请求重放、
//!   peek_message 流控）
//!
//! ## 架构设计
//!
//! ```text
//! 用户代码 (Channel / Callback)
//!     ↓
//! Client (client/)
//!     ├── SeriesApi / QuoteSubscription (market/)
//!     ├── TradeSession (trade/)
//!     ↓
//! QuoteChannel / TradeChannel (transport/)
//!     ↓
//! SnapshotManager (protocol/diff/) ← rtn_data 差分合并 + epoch 标记
//!     ↓
//! DiffWebsocket (transport/websocket.rs) ← peek_message 流控
//! ```
//!
//! ## 协议层级
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      DIFF 协议                               │
//! │  (差分推送 + 行情数据 + K线 + 通知)                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │                      TIFI 协议                               │
//! │  (peek_message + rtn_data 传输机制)                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                      QIFI 协议                               │
//! │  (Account, Position, Order 数据结构)                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![allow(dead_code)]

// ============================================================================
// 外部依赖
// ============================================================================

// 异步运行时
pub use futures;
pub use tokio;

// 并发工具
pub use dashmap;
pub use parking_lot;

// 序列化
pub use serde;
pub use serde_json;

// 时间
pub use chrono;

// 日志
pub use log;

// 错误处理
pub use anyhow;
pub use thiserror;

// UUID
pub use uuid;

// ============================================================================
// 内部模块
// ============================================================================

/// 协议层 (DIFF 消息 + 差分合并 + 数据类型)
pub mod protocol;

/// 传输层 (WebSocket 客户端 + 行情/交易通道)
pub mod transport;

/// 行情订阅 (Quote / K线 / Tick 序列)
pub mod market;

/// 交易会话
pub mod trade;

/// 认证 (天勤账户登录 + 权限)
pub mod auth;

/// 客户端组合层
pub mod client;

/// 工具模块
pub mod utils;

// ============================================================================
// 重导出常用类型
// ============================================================================

pub use client::{Client, ClientConfig, SymbolsCacheStrategy};
pub use market::{QuoteSubscription, SeriesApi, SeriesSubscription};
pub use protocol::diff::snapshot::SnapshotManager;
pub use protocol::diff::types::{
    Account, ChartInfo, InsertOrderRequest, Kline, Notify, Order, Position, Quote, SeriesData,
    SeriesOptions, Tick, Trade, UpdateInfo,
};
pub use trade::TradeSession;

// ============================================================================
// 全局错误类型
// ============================================================================

/// SDK 错误类型
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Not logged in: {0}")]
    NotLoggedIn(String),

    #[error("Path already watched: {0}")]
    AlreadyWatched(String),

    #[error("Path not watched: {0}")]
    NotWatched(String),

    #[error("Subscription closed")]
    SubscriptionClosed,

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Connection dead: {0}")]
    ConnectionDead(String),

    #[error("Data not found: {0}")]
    NotFound(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
