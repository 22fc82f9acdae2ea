// rust_websocket_utils/src/server/mod.rs

//! WebSocket 服务端模块。
//!
//! 在 axum 完成 HTTP 升级之后接管连接：拆分收发两端、把文本帧解析为 `WsMessage`、
//! 区分业务消息与心跳控制帧。鉴权和路由由上层服务负责。

pub mod transport;
