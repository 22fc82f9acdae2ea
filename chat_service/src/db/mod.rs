// chat_service/src/db/mod.rs

//! 消息存储适配层。
//!
//! [`MessageStore`] 描述了服务对持久化存储的全部需求：会话的查找或创建、消息追加、
//! 历史分页以及已送达/已读的状态推进。服务的其它部分只通过这个 trait 访问存储，
//! 因此可以替换为任意数据库实现。当前随服务提供的是内存实现 [`memory_store::InMemoryMessageStore`]。
//!
//! 存储层不做权限判断，调用方必须先确认操作者是会话的参与方。

pub mod memory_store;

use async_trait::async_trait;
use chat_models::{
    Conversation, ConversationId, ConversationSummary, Message, MessageId, MessagePage, UserRole,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

pub use memory_store::InMemoryMessageStore;

/// 存储层错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("数据校验失败: {0}")]
    Validation(String),

    #[error("记录不存在: {0}")]
    NotFound(String),

    /// 底层存储故障（连接断开、写入失败等）。
    #[error("存储后端错误: {0}")]
    Backend(String),
}

/// 一次标记已读的结果。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    /// 本次真正从未读变为已读的消息 ID，按升序排列。
    pub updated: Vec<MessageId>,
    pub read_at: DateTime<Utc>,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// 按 `(tenant, manager, property)` 三元组查找会话，不存在则创建。
    ///
    /// 并发调用同一三元组时只会创建一个会话。
    async fn find_or_create_conversation(
        &self,
        tenant_id: &str,
        manager_id: &str,
        property_id: Option<i64>,
    ) -> Result<Conversation, StoreError>;

    async fn get_conversation(&self, conversation_id: ConversationId) -> Result<Conversation, StoreError>;

    /// 列出 `user_id` 以 `role` 身份参与的会话，按 `last_message_at` 倒序，
    /// 附带最近一条消息和该用户的未读数。
    async fn list_conversations(&self, user_id: &str, role: UserRole) -> Result<Vec<ConversationSummary>, StoreError>;

    /// 追加一条状态为 `Sent` 的消息，并更新会话的 `last_message_at`。
    ///
    /// 内容去除首尾空白后为空时返回 `StoreError::Validation`。
    async fn append_message(
        &self,
        conversation_id: ConversationId,
        sender_id: &str,
        sender_role: UserRole,
        content: &str,
    ) -> Result<Message, StoreError>;

    /// 读取一页历史消息（从旧到新），`cursor` 为消息 ID 的开区间上界。
    ///
    /// 副作用：会话中所有不是 `reader_id` 发送的消息都被标记为已读。
    async fn list_messages(
        &self,
        conversation_id: ConversationId,
        reader_id: &str,
        cursor: Option<MessageId>,
        limit: usize,
    ) -> Result<MessagePage, StoreError>;

    /// 把消息推进到 `Delivered`。返回 `false` 表示状态已经不低于 `Delivered`。
    async fn mark_delivered(&self, message_id: MessageId) -> Result<bool, StoreError>;

    /// 把会话中指定的消息标记为已读。`reader_id` 自己发送的消息不会被修改。
    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        message_ids: &[MessageId],
        reader_id: &str,
    ) -> Result<ReadReceipt, StoreError>;

    /// `user_id` 以 `role` 身份参与的所有会话中的未读消息总数。
    async fn unread_count(&self, user_id: &str, role: UserRole) -> Result<u64, StoreError>;

    /// 删除会话及其全部消息。
    async fn delete_conversation(&self, conversation_id: ConversationId) -> Result<(), StoreError>;

    /// 健康检查：确认存储当前可用。
    async fn ping(&self) -> Result<(), StoreError>;
}
