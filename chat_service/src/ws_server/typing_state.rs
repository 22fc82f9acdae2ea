// chat_service/src/ws_server/typing_state.rs

//! 会话的 "正在输入" 状态。只保存每个会话最后一次的输入事件，后写者为准。
//! 状态只在内存中，服务重启后清空。

use chat_models::ConversationId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct TypingEntry {
    pub user_id: String,
    pub is_typing: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct TypingStateManager {
    entries: DashMap<ConversationId, TypingEntry>,
}

impl TypingStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次输入状态变化并返回新的记录。
    pub fn set(&self, conversation_id: ConversationId, user_id: &str, is_typing: bool) -> TypingEntry {
        let entry = TypingEntry {
            user_id: user_id.to_string(),
            is_typing,
            updated_at: Utc::now(),
        };
        self.entries.insert(conversation_id, entry.clone());
        entry
    }

    pub fn get(&self, conversation_id: ConversationId) -> Option<TypingEntry> {
        self.entries.get(&conversation_id).map(|e| e.value().clone())
    }

    pub fn clear(&self, conversation_id: ConversationId) {
        self.entries.remove(&conversation_id);
    }

    /// 清除某个用户留下的输入状态（连接断开时调用），返回受影响的会话数。
    pub fn clear_user(&self, user_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.user_id != user_id);
        let cleared = before.saturating_sub(self.entries.len());
        if cleared > 0 {
            debug!("[输入状态] 已清除用户 {} 在 {} 个会话中的输入状态", user_id, cleared);
        }
        cleared
    }
}
