//! 行情订阅层
//!
//! - `series`: K线/Tick 序列订阅与图表生命周期
//! - `subscription`: Quote 全局订阅

pub mod series;
pub mod subscription;

pub use series::{SeriesApi, SeriesSubscription};
pub use subscription::QuoteSubscription;
