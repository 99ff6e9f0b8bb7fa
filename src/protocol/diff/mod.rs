//! DIFF 协议实现（客户端侧）
//!
//! Differential Information Flow for Finance (DIFF) 协议是在 QIFI+TIFI 基础上扩展的
//! 实时差分推送协议。服务端通过 `rtn_data` 推送 JSON Merge Patch，客户端在本地
//! 合并出一份带版本号 (epoch) 的完整业务快照。
//!
//! # 协议层级
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
//!
//! # 核心模块
//!
//! - `merge`: 带 epoch 标记的差分合并算法
//! - `snapshot`: 业务快照管理器（版本号、路径查询、监听器、类型化视图）
//! - `types`: DIFF 协议数据类型定义
//! - `settlement`: 历史结算单文本解析

pub mod merge;
pub mod settlement;
pub mod snapshot;
pub mod types;
