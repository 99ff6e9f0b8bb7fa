//! 传输层
//!
//! - `websocket`: 自动重连的双工 JSON WebSocket 客户端
//! - `quote`: 行情通道（rtn_data 合并 + 订阅/图表请求重放）
//! - `trade`: 交易通道（通知提取 + 结算单解析 + 登录重放）

pub mod quote;
pub mod trade;
pub mod websocket;

pub use quote::QuoteChannel;
pub use trade::TradeChannel;
pub use websocket::{DiffWebsocket, WebsocketConfig, WsStatus};
