// rust_websocket_utils/src/message.rs

//! 定义 WebSocket 通信中使用的消息信封结构。
//!
//! `WsMessage` 是客户端与服务端之间所有 WebSocket 文本帧的统一格式：
//! `message_type` 携带事件名（例如 `"message:send"`），`payload` 携带该事件的 JSON 载荷。

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::Utc;
use crate::error::WsError;

/// 在客户端与 WebSocket 服务器之间交换的标准消息信封。
///
/// # 字段
/// - `message_id`: UUID v4 字符串，用于追踪和区分每一条消息。客户端发送时可以省略。
/// - `message_type`: 事件名，接收方据此决定如何解释 `payload`。
/// - `payload`: 事件的 JSON 载荷，其结构由 `message_type` 决定。
/// - `timestamp`: 消息创建时的 UTC 毫秒时间戳。客户端发送时可以省略。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WsMessage {
    #[serde(default)]
    pub message_id: String,

    pub message_type: String,

    #[serde(default)]
    pub payload: serde_json::Value,

    #[serde(default)]
    pub timestamp: i64,
}

impl WsMessage {
    /// 创建一个新的 `WsMessage`，自动生成 `message_id` 和当前时间戳。
    ///
    /// `payload_data` 会被序列化为 JSON 值；序列化失败时返回 `WsError::SerializationError`。
    pub fn new<T: Serialize>(message_type: impl Into<String>, payload_data: &T) -> Result<WsMessage, WsError> {
        let payload = serde_json::to_value(payload_data)
            .map_err(|e| WsError::SerializationError(format!("创建 WsMessage 时序列化载荷失败: {}", e)))?;
        Ok(Self::from_value(message_type, payload))
    }

    /// 用已经是 JSON 值的载荷创建消息，不会失败。
    pub fn from_value(message_type: impl Into<String>, payload: serde_json::Value) -> WsMessage {
        WsMessage {
            message_id: Uuid::new_v4().to_string(),
            message_type: message_type.into(),
            payload,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// 把载荷反序列化为目标类型 `T`。
    pub fn deserialize_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, WsError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| WsError::DeserializationError(format!("WsMessage 载荷反序列化为目标类型失败: {}, 原始载荷: '{}'", e, self.payload)))
    }

    /// 把整个信封序列化为 JSON 文本，用于写入 WebSocket 文本帧。
    pub fn to_text(&self) -> Result<String, WsError> {
        serde_json::to_string(self)
            .map_err(|e| WsError::SerializationError(format!("消息序列化为JSON失败: {}", e)))
    }

    /// 从 WebSocket 文本帧解析信封。
    pub fn from_text(text: &str) -> Result<WsMessage, WsError> {
        serde_json::from_str::<WsMessage>(text)
            .map_err(|e| WsError::DeserializationError(format!("收到的文本消息反序列化为 WsMessage 失败: {}, 原始文本: '{}'", e, text)))
    }
}
