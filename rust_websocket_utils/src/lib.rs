//! `rust_websocket_utils` 提供消息服务两端共用的 WebSocket 通信工具。
//!
//! 主要模块：
//! - `message`: 统一的消息信封 `WsMessage`。
//! - `error`: 库内统一错误类型 `WsError`。
//! - `server`: 基于 axum WebSocket 的服务端传输层。
//! - `client`: 基于 tokio-tungstenite 的客户端传输层。

pub mod client;
pub mod error;
pub mod message;
pub mod server;

pub use error::WsError;
pub use message::WsMessage;
