//! WebSocket 事件名称与各事件的 Payload 结构体定义。
//!
//! 线上每条消息都带有一个事件名（`message_type`）和一个 JSON 载荷。
//! 客户端发往服务端的事件统一解析为 [`ClientEvent`]，未知事件名会被拒绝；
//! 服务端发往客户端的事件统一由 [`ServerEvent`] 表示。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::conversation::{ConversationId, Message, MessageId};

// --- 客户端 -> 服务端 ---
pub const CONVERSATION_JOIN: &str = "conversation:join";
pub const CONVERSATION_LEAVE: &str = "conversation:leave";
pub const MESSAGE_SEND: &str = "message:send";
pub const TYPING_START: &str = "typing:start";
pub const TYPING_STOP: &str = "typing:stop";
pub const MESSAGES_READ: &str = "messages:read";

// --- 服务端 -> 客户端 ---
pub const USER_ONLINE: &str = "user:online";
pub const MESSAGE_NEW: &str = "message:new";
pub const MESSAGE_NOTIFICATION: &str = "message:notification";
pub const TYPING_UPDATE: &str = "typing:update";
pub const MESSAGES_READ_UPDATE: &str = "messages:read:update";
pub const MESSAGE_ERROR: &str = "message:error";
/// 加入会话房间成功后的确认，客户端可据此得知后续广播一定会送达。
pub const CONVERSATION_JOINED: &str = "conversation:joined";

/// `message:send` 的载荷。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub conversation_id: ConversationId,
    pub content: String,
    /// 客户端声明的接收方。服务端以会话中的另一方为准。
    #[serde(default)]
    pub receiver_id: Option<String>,
}

/// `typing:start` / `typing:stop` 的载荷。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub receiver_id: Option<String>,
}

/// `messages:read` 的载荷。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadMessagesPayload {
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub message_ids: Vec<MessageId>,
}

/// 客户端事件解析失败的原因。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventParseError {
    /// 不支持的事件名。
    #[error("不支持的事件类型: '{0}'")]
    UnknownEvent(String),
    /// 事件名合法，但载荷缺字段、类型不对或 ID 非正数。
    #[error("事件 '{event}' 的载荷无效: {reason}")]
    InvalidPayload { event: String, reason: String },
}

/// 经过校验的客户端事件。
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    JoinConversation(ConversationId),
    LeaveConversation(ConversationId),
    SendMessage(SendMessagePayload),
    TypingStart(TypingPayload),
    TypingStop(TypingPayload),
    MarkRead(ReadMessagesPayload),
}

impl ClientEvent {
    /// 根据事件名和 JSON 载荷解析出强类型事件。
    ///
    /// `conversation:join` / `conversation:leave` 的载荷可以是裸数字、数字字符串
    /// 或 `{"conversationId": n}`。所有会话 ID 必须为正整数。
    pub fn parse(event: &str, payload: &Value) -> Result<Self, EventParseError> {
        let invalid = |reason: String| EventParseError::InvalidPayload {
            event: event.to_string(),
            reason,
        };

        match event {
            CONVERSATION_JOIN | CONVERSATION_LEAVE => {
                let conversation_id = parse_conversation_id(payload)
                    .ok_or_else(|| invalid(format!("无法识别的会话 ID: {}", payload)))?;
                if event == CONVERSATION_JOIN {
                    Ok(ClientEvent::JoinConversation(conversation_id))
                } else {
                    Ok(ClientEvent::LeaveConversation(conversation_id))
                }
            }
            MESSAGE_SEND => {
                let data: SendMessagePayload =
                    serde_json::from_value(payload.clone()).map_err(|e| invalid(e.to_string()))?;
                ensure_positive_id(data.conversation_id).map_err(invalid)?;
                Ok(ClientEvent::SendMessage(data))
            }
            TYPING_START | TYPING_STOP => {
                let data: TypingPayload =
                    serde_json::from_value(payload.clone()).map_err(|e| invalid(e.to_string()))?;
                ensure_positive_id(data.conversation_id).map_err(invalid)?;
                if event == TYPING_START {
                    Ok(ClientEvent::TypingStart(data))
                } else {
                    Ok(ClientEvent::TypingStop(data))
                }
            }
            MESSAGES_READ => {
                let data: ReadMessagesPayload =
                    serde_json::from_value(payload.clone()).map_err(|e| invalid(e.to_string()))?;
                ensure_positive_id(data.conversation_id).map_err(invalid)?;
                Ok(ClientEvent::MarkRead(data))
            }
            other => Err(EventParseError::UnknownEvent(other.to_string())),
        }
    }

    /// 该事件对应的线上事件名。
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinConversation(_) => CONVERSATION_JOIN,
            ClientEvent::LeaveConversation(_) => CONVERSATION_LEAVE,
            ClientEvent::SendMessage(_) => MESSAGE_SEND,
            ClientEvent::TypingStart(_) => TYPING_START,
            ClientEvent::TypingStop(_) => TYPING_STOP,
            ClientEvent::MarkRead(_) => MESSAGES_READ,
        }
    }
}

fn ensure_positive_id(id: ConversationId) -> Result<(), String> {
    if id > 0 {
        Ok(())
    } else {
        Err(format!("会话 ID 必须为正整数，实际为 {}", id))
    }
}

/// 从宽松格式中提取会话 ID。
pub fn parse_conversation_id(value: &Value) -> Option<ConversationId> {
    let id = match value {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        Value::Object(map) => return map.get("conversationId").and_then(parse_conversation_id),
        _ => return None,
    };
    (id > 0).then_some(id)
}

/// `user:online` 的载荷。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub user_id: String,
    pub online: bool,
}

/// `message:notification` 的载荷，发给不在会话房间内的在线接收方。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageNotificationPayload {
    pub conversation_id: ConversationId,
    pub message: Message,
}

/// `typing:update` 的载荷。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdatePayload {
    pub user_id: String,
    pub conversation_id: ConversationId,
    pub is_typing: bool,
}

/// `messages:read:update` 的载荷。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadUpdatePayload {
    pub conversation_id: ConversationId,
    pub message_ids: Vec<MessageId>,
    pub read_by: String,
    pub read_at: DateTime<Utc>,
}

/// `message:error` 的载荷，只发给触发错误的连接。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub error: String,
    /// 引发错误的客户端事件名（如果能确定）。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_message_type: Option<String>,
}

/// `conversation:joined` 的载荷。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinedPayload {
    pub conversation_id: ConversationId,
}

/// 服务端推送给客户端的事件。
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    UserOnline(PresencePayload),
    MessageNew(Message),
    MessageNotification(MessageNotificationPayload),
    TypingUpdate(TypingUpdatePayload),
    MessagesReadUpdate(ReadUpdatePayload),
    MessageError(ErrorPayload),
    ConversationJoined(JoinedPayload),
}

impl ServerEvent {
    /// 构造一个 `message:error` 事件。
    pub fn error(error: impl Into<String>, original_message_type: Option<&str>) -> Self {
        ServerEvent::MessageError(ErrorPayload {
            error: error.into(),
            original_message_type: original_message_type.map(str::to_string),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::UserOnline(_) => USER_ONLINE,
            ServerEvent::MessageNew(_) => MESSAGE_NEW,
            ServerEvent::MessageNotification(_) => MESSAGE_NOTIFICATION,
            ServerEvent::TypingUpdate(_) => TYPING_UPDATE,
            ServerEvent::MessagesReadUpdate(_) => MESSAGES_READ_UPDATE,
            ServerEvent::MessageError(_) => MESSAGE_ERROR,
            ServerEvent::ConversationJoined(_) => CONVERSATION_JOINED,
        }
    }

    /// 把事件载荷序列化为 JSON 值。
    pub fn to_payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            ServerEvent::UserOnline(p) => serde_json::to_value(p),
            ServerEvent::MessageNew(m) => serde_json::to_value(m),
            ServerEvent::MessageNotification(p) => serde_json::to_value(p),
            ServerEvent::TypingUpdate(p) => serde_json::to_value(p),
            ServerEvent::MessagesReadUpdate(p) => serde_json::to_value(p),
            ServerEvent::MessageError(p) => serde_json::to_value(p),
            ServerEvent::ConversationJoined(p) => serde_json::to_value(p),
        }
    }
}
