// chat_service/src/state.rs

//! 全局共享状态。
//!
//! `AppState` 在 axum 路由、WebSocket 连接任务和心跳监视器之间共享。内部全部是 `Arc`，
//! 克隆只增加引用计数。登记表、房间和输入状态都只在内存中，服务重启后为空。

use std::sync::Arc;
use std::time::{Duration, Instant};

use chat_models::{Conversation, ConversationId};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::api::rate_limit::RateLimiter;
use crate::auth::{JwtVerifier, TokenVerifier};
use crate::config::AppConfig;
use crate::db::{InMemoryMessageStore, MessageStore, StoreError};
use crate::error::AppError;
use crate::ws_server::connection_manager::ConnectionManager;
use crate::ws_server::room_manager::RoomManager;
use crate::ws_server::typing_state::TypingStateManager;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn MessageStore>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub connection_manager: Arc<ConnectionManager>,
    pub room_manager: Arc<RoomManager>,
    pub typing_state: Arc<TypingStateManager>,
    pub rate_limiter: Arc<RateLimiter>,
    pub started_at: Instant,
    /// 每个会话一把锁，保证 "写入存储 + 房间广播" 按写入顺序串行执行。
    conversation_locks: Arc<DashMap<ConversationId, Arc<Mutex<()>>>>,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn MessageStore>, verifier: Arc<dyn TokenVerifier>) -> Self {
        let rate_limiter = RateLimiter::new(config.server.rate_limit_per_minute, Duration::from_secs(60));
        Self {
            config: Arc::new(config),
            store,
            verifier,
            connection_manager: Arc::new(ConnectionManager::new()),
            room_manager: Arc::new(RoomManager::new()),
            typing_state: Arc::new(TypingStateManager::new()),
            rate_limiter: Arc::new(rate_limiter),
            started_at: Instant::now(),
            conversation_locks: Arc::new(DashMap::new()),
        }
    }

    /// 使用内存存储和配置中的 JWT 密钥构建状态。
    pub fn from_config(config: AppConfig) -> Self {
        let verifier = Arc::new(JwtVerifier::new(&config.auth.jwt_secret));
        Self::new(config, Arc::new(InMemoryMessageStore::new()), verifier)
    }

    /// 确认 `user_id` 是会话的参与方，并返回该会话。
    pub async fn authorize_party(&self, conversation_id: ConversationId, user_id: &str) -> Result<Conversation, AppError> {
        let conversation = match self.store.get_conversation(conversation_id).await {
            Ok(conversation) => conversation,
            Err(StoreError::NotFound(_)) => return Err(AppError::NotFound("Conversation not found".to_string())),
            Err(e) => return Err(e.into()),
        };
        if !conversation.is_party(user_id) {
            return Err(AppError::Forbidden("Access denied".to_string()));
        }
        Ok(conversation)
    }

    /// 返回会话的顺序锁。持有期间同一会话的其他发送会排队等待。
    pub fn conversation_lock(&self, conversation_id: ConversationId) -> Arc<Mutex<()>> {
        Arc::clone(&*self.conversation_locks.entry(conversation_id).or_default())
    }

    /// 会话删除后丢弃它的顺序锁。
    pub fn forget_conversation_lock(&self, conversation_id: ConversationId) {
        self.conversation_locks.remove(&conversation_id);
    }

    /// 去掉 `<`、`>` 与首尾空白，并检查消息内容的长度。
    pub fn normalize_content(&self, content: &str) -> Result<String, AppError> {
        let stripped: String = content.chars().filter(|c| !matches!(c, '<' | '>')).collect();
        let trimmed = stripped.trim();
        if trimmed.is_empty() {
            return Err(AppError::Validation("Message content cannot be empty".to_string()));
        }
        let max = self.config.messages.max_content_length;
        if trimmed.chars().count() > max {
            return Err(AppError::Validation(format!(
                "Message content exceeds {} characters",
                max
            )));
        }
        Ok(trimmed.to_string())
    }

    /// 解析分页大小：缺省使用默认值，超过上限时截断，小于 1 视为参数错误。
    pub fn resolve_page_size(&self, requested: Option<i64>) -> Result<usize, AppError> {
        let messages = &self.config.messages;
        match requested {
            None => Ok(messages.default_page_size.min(messages.max_page_size)),
            Some(limit) if limit < 1 => Err(AppError::Validation("limit must be at least 1".to_string())),
            Some(limit) => Ok(usize::try_from(limit).unwrap_or(usize::MAX).min(messages.max_page_size)),
        }
    }
}
