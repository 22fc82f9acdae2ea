// rust_websocket_utils/src/error.rs

//! 定义 WebSocket 工具库相关的错误类型。

use thiserror::Error;

/// WebSocket 工具库的统一错误类型。
#[derive(Error, Debug)]
pub enum WsError {
    /// 当 serde 序列化失败时返回。
    #[error("序列化错误: {0}")]
    SerializationError(String),

    /// 当 serde 反序列化失败时返回。
    #[error("反序列化错误: {0}")]
    DeserializationError(String),

    /// 客户端侧 tungstenite 协议错误，握手被拒绝（如 HTTP 401）也归入此类。
    #[error("WebSocket协议错误: {0}")]
    WebSocketProtocolError(#[from] tokio_tungstenite::tungstenite::Error),

    /// 服务端侧 axum WebSocket 错误。
    #[error("WebSocket连接错误: {0}")]
    ServerConnectionError(#[from] axum::Error),

    /// 收到了二进制帧等非预期的帧类型。
    #[error("非预期的帧类型: {0}")]
    UnexpectedFrame(String),

    /// 无效的 URL 格式。
    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    /// 无法构造握手请求头（例如 token 中含有非法字符）。
    #[error("无效的请求头: {0}")]
    InvalidHeader(String),
}
