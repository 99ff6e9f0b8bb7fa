//! 协议层
//!
//! - `messages`: aid 标签的 DIFF 协议消息定义
//! - `diff`: 差分合并引擎 + 业务快照 + 数据类型

pub mod diff;
pub mod messages;
