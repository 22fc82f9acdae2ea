// rust_websocket_utils/src/client/mod.rs

//! WebSocket 客户端模块。
//!
//! 基于 `tokio-tungstenite` 连接消息服务，握手时可携带 bearer token。
//! 集成测试和命令行工具通过它模拟租户或物业经理的连接。

pub mod transport;
