//! 会话与消息的核心数据模型。
//!
//! 这些结构体既是持久化存储的记录格式，也是 REST 响应与 WebSocket 事件中的载荷，
//! 因此统一采用 camelCase 的 JSON 字段名。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{MessageStatus, UserRole};

/// 会话 ID，由存储层自增分配。
pub type ConversationId = i64;
/// 消息 ID，由存储层单调递增分配，同时作为分页游标。
pub type MessageId = i64;

/// 租户与物业经理之间的一对一会话。
///
/// `(tenant_cognito_id, manager_cognito_id, property_id)` 三元组唯一，
/// `property_id` 为 `None` 时表示不关联具体房源的一般会话。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub tenant_cognito_id: String,
    pub manager_cognito_id: String,
    pub property_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    /// 最近一条消息的时间；会话刚创建时等于 `created_at`。
    pub last_message_at: DateTime<Utc>,
}

impl Conversation {
    /// 判断用户是否为该会话的参与方之一。
    pub fn is_party(&self, user_id: &str) -> bool {
        self.tenant_cognito_id == user_id || self.manager_cognito_id == user_id
    }

    /// 返回会话中另一方的用户 ID。`user_id` 不是参与方时返回 `None`。
    pub fn other_party(&self, user_id: &str) -> Option<&str> {
        if self.tenant_cognito_id == user_id {
            Some(&self.manager_cognito_id)
        } else if self.manager_cognito_id == user_id {
            Some(&self.tenant_cognito_id)
        } else {
            None
        }
    }

    /// 返回会话中担任 `role` 的一方。
    pub fn party_for_role(&self, role: UserRole) -> &str {
        match role {
            UserRole::Tenant => &self.tenant_cognito_id,
            UserRole::Manager => &self.manager_cognito_id,
        }
    }
}

/// 一条聊天消息。
///
/// 创建后内容不可修改，唯一允许的变更是通过 [`Message::advance_status`] 推进状态。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_cognito_id: String,
    pub sender_role: UserRole,
    pub content: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    /// 仅当 `status` 变为 `Read` 时设置。
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    /// 尝试把消息状态推进到 `next`。
    ///
    /// 只有向前推进才会生效，返回 `true`；相同或更早的状态被拒绝并返回 `false`，
    /// 消息保持不变。推进到 `Read` 时同时写入 `read_at`。
    pub fn advance_status(&mut self, next: MessageStatus, at: DateTime<Utc>) -> bool {
        if !self.status.can_advance_to(next) {
            return false;
        }
        self.status = next;
        if next == MessageStatus::Read {
            self.read_at = Some(at);
        }
        true
    }

    /// 该消息是否计入 `reader_id` 的未读数。
    pub fn is_unread_for(&self, reader_id: &str) -> bool {
        self.sender_cognito_id != reader_id && self.status != MessageStatus::Read
    }
}

/// 会话列表中的一项：会话本身、最近一条消息以及当前用户的未读数。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub last_message: Option<Message>,
    pub unread_count: u64,
}

/// 历史消息分页结果。
///
/// `messages` 按从旧到新排列。`next_cursor` 为本页最旧一条消息的 ID，
/// 作为下一次请求的 `cursor`（严格小于）；没有更多数据时为 `None`。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub has_more: bool,
    pub next_cursor: Option<MessageId>,
}
