// chat_service/src/db/memory_store.rs

//! `MessageStore` 的内存实现。
//!
//! 所有数据放在一个 `tokio::sync::RwLock` 保护的结构中。写操作持有写锁完成
//! "分配 ID + 写入" 的整个过程，因此同一会话内消息的 ID 顺序就是写入顺序，
//! 并发的 find-or-create 也不会产生重复会话。

use async_trait::async_trait;
use chat_models::{
    Conversation, ConversationId, ConversationSummary, Message, MessageId, MessagePage, MessageStatus,
    UserRole,
};
use chrono::Utc;
use log::{debug, info};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{MessageStore, ReadReceipt, StoreError};

type ConversationKey = (String, String, Option<i64>);

#[derive(Debug, Default)]
struct StoreInner {
    next_conversation_id: ConversationId,
    next_message_id: MessageId,
    conversations: BTreeMap<ConversationId, Conversation>,
    conversation_index: HashMap<ConversationKey, ConversationId>,
    /// 按 ID 升序存放的消息；ID 全局单调递增。
    messages: BTreeMap<MessageId, Message>,
    /// 每个会话的消息 ID，按升序排列。
    conversation_messages: HashMap<ConversationId, Vec<MessageId>>,
}

impl StoreInner {
    fn conversation(&self, conversation_id: ConversationId) -> Result<&Conversation, StoreError> {
        self.conversations
            .get(&conversation_id)
            .ok_or_else(|| StoreError::NotFound(format!("Conversation {} not found", conversation_id)))
    }

    fn message_ids(&self, conversation_id: ConversationId) -> &[MessageId] {
        self.conversation_messages
            .get(&conversation_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn unread_in(&self, conversation_id: ConversationId, reader_id: &str) -> u64 {
        self.message_ids(conversation_id)
            .iter()
            .filter_map(|id| self.messages.get(id))
            .filter(|m| m.is_unread_for(reader_id))
            .count() as u64
    }
}

/// 内存消息存储。进程重启后数据丢失。
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        info!("[消息存储] 已创建内存消息存储实例。");
        Self {
            inner: RwLock::new(StoreInner {
                next_conversation_id: 1,
                next_message_id: 1,
                ..StoreInner::default()
            }),
        }
    }

    /// 存储中的消息总数，主要供测试验证级联删除。
    pub async fn message_count(&self) -> usize {
        self.inner.read().await.messages.len()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn find_or_create_conversation(
        &self,
        tenant_id: &str,
        manager_id: &str,
        property_id: Option<i64>,
    ) -> Result<Conversation, StoreError> {
        if tenant_id.trim().is_empty() || manager_id.trim().is_empty() {
            return Err(StoreError::Validation("Both participants are required".to_string()));
        }
        if tenant_id == manager_id {
            return Err(StoreError::Validation("A conversation needs two distinct participants".to_string()));
        }

        let key = (tenant_id.to_string(), manager_id.to_string(), property_id);
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner
            .conversation_index
            .get(&key)
            .and_then(|id| inner.conversations.get(id))
        {
            return Ok(existing.clone());
        }

        let id = inner.next_conversation_id;
        inner.next_conversation_id += 1;
        let now = Utc::now();
        let conversation = Conversation {
            id,
            tenant_cognito_id: key.0.clone(),
            manager_cognito_id: key.1.clone(),
            property_id,
            created_at: now,
            last_message_at: now,
        };
        inner.conversations.insert(id, conversation.clone());
        inner.conversation_index.insert(key, id);
        debug!("[消息存储] 新建会话 {} (tenant={}, manager={}, property={:?})", id, tenant_id, manager_id, property_id);
        Ok(conversation)
    }

    async fn get_conversation(&self, conversation_id: ConversationId) -> Result<Conversation, StoreError> {
        self.inner.read().await.conversation(conversation_id).cloned()
    }

    async fn list_conversations(&self, user_id: &str, role: UserRole) -> Result<Vec<ConversationSummary>, StoreError> {
        let inner = self.inner.read().await;
        let mut summaries: Vec<ConversationSummary> = inner
            .conversations
            .values()
            .filter(|c| c.party_for_role(role) == user_id)
            .map(|c| ConversationSummary {
                conversation: c.clone(),
                last_message: inner
                    .message_ids(c.id)
                    .last()
                    .and_then(|id| inner.messages.get(id))
                    .cloned(),
                unread_count: inner.unread_in(c.id, user_id),
            })
            .collect();
        summaries.sort_by(|a, b| {
            b.conversation
                .last_message_at
                .cmp(&a.conversation.last_message_at)
                .then(b.conversation.id.cmp(&a.conversation.id))
        });
        Ok(summaries)
    }

    async fn append_message(
        &self,
        conversation_id: ConversationId,
        sender_id: &str,
        sender_role: UserRole,
        content: &str,
    ) -> Result<Message, StoreError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(StoreError::Validation("Message content cannot be empty".to_string()));
        }

        let mut inner = self.inner.write().await;
        inner.conversation(conversation_id)?;

        let id = inner.next_message_id;
        inner.next_message_id += 1;
        let now = Utc::now();
        let message = Message {
            id,
            conversation_id,
            sender_cognito_id: sender_id.to_string(),
            sender_role,
            content: content.to_string(),
            status: MessageStatus::Sent,
            created_at: now,
            read_at: None,
        };
        inner.messages.insert(id, message.clone());
        inner.conversation_messages.entry(conversation_id).or_default().push(id);
        if let Some(conversation) = inner.conversations.get_mut(&conversation_id) {
            conversation.last_message_at = now;
        }
        Ok(message)
    }

    async fn list_messages(
        &self,
        conversation_id: ConversationId,
        reader_id: &str,
        cursor: Option<MessageId>,
        limit: usize,
    ) -> Result<MessagePage, StoreError> {
        if limit == 0 {
            return Err(StoreError::Validation("limit must be at least 1".to_string()));
        }

        let mut inner = self.inner.write().await;
        inner.conversation(conversation_id)?;

        let now = Utc::now();
        let all_ids = inner.message_ids(conversation_id).to_vec();
        let mut newly_read = 0usize;
        for id in &all_ids {
            if let Some(message) = inner.messages.get_mut(id) {
                if message.sender_cognito_id != reader_id && message.advance_status(MessageStatus::Read, now) {
                    newly_read += 1;
                }
            }
        }
        if newly_read > 0 {
            debug!("[消息存储] 会话 {}: 读取历史时为 {} 标记了 {} 条已读", conversation_id, reader_id, newly_read);
        }

        // ID 升序，取游标之前的最后 limit + 1 条，多出的一条只用于判断 has_more。
        let eligible: Vec<MessageId> = all_ids
            .into_iter()
            .filter(|id| cursor.map_or(true, |c| *id < c))
            .collect();
        let has_more = eligible.len() > limit;
        let page_ids = &eligible[eligible.len().saturating_sub(limit)..];
        let messages: Vec<Message> = page_ids
            .iter()
            .filter_map(|id| inner.messages.get(id))
            .cloned()
            .collect();
        let next_cursor = if has_more { messages.first().map(|m| m.id) } else { None };

        Ok(MessagePage { messages, has_more, next_cursor })
    }

    async fn mark_delivered(&self, message_id: MessageId) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let message = inner
            .messages
            .get_mut(&message_id)
            .ok_or_else(|| StoreError::NotFound(format!("Message {} not found", message_id)))?;
        Ok(message.advance_status(MessageStatus::Delivered, Utc::now()))
    }

    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        message_ids: &[MessageId],
        reader_id: &str,
    ) -> Result<ReadReceipt, StoreError> {
        let mut inner = self.inner.write().await;
        inner.conversation(conversation_id)?;

        let read_at = Utc::now();
        let mut updated = Vec::new();
        for id in message_ids {
            if let Some(message) = inner.messages.get_mut(id) {
                if message.conversation_id == conversation_id
                    && message.sender_cognito_id != reader_id
                    && message.advance_status(MessageStatus::Read, read_at)
                {
                    updated.push(*id);
                }
            }
        }
        updated.sort_unstable();
        updated.dedup();
        Ok(ReadReceipt { updated, read_at })
    }

    async fn unread_count(&self, user_id: &str, role: UserRole) -> Result<u64, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .conversations
            .values()
            .filter(|c| c.party_for_role(role) == user_id)
            .map(|c| inner.unread_in(c.id, user_id))
            .sum())
    }

    async fn delete_conversation(&self, conversation_id: ConversationId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let conversation = inner
            .conversations
            .remove(&conversation_id)
            .ok_or_else(|| StoreError::NotFound(format!("Conversation {} not found", conversation_id)))?;
        inner.conversation_index.remove(&(
            conversation.tenant_cognito_id,
            conversation.manager_cognito_id,
            conversation.property_id,
        ));
        let removed = inner.conversation_messages.remove(&conversation_id).unwrap_or_default();
        for id in &removed {
            inner.messages.remove(id);
        }
        info!("[消息存储] 已删除会话 {} 及其 {} 条消息", conversation_id, removed.len());
        Ok(())
    }

    /// 内存存储总是可用；拿到一次读锁即可确认没有被长期占用的写锁。
    async fn ping(&self) -> Result<(), StoreError> {
        let _inner = self.inner.read().await;
        Ok(())
    }
}
