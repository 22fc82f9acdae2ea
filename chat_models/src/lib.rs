//! `chat_models` 公共模型库 crate。
//!
//! 本 crate 集中定义了消息服务 (`chat_service`)、WebSocket 工具库以及潜在的 Web 前端
//! （通过 TypeScript 类型对应）之间共享的核心数据结构和枚举类型。
//!
//! 主要包含：
//! - **会话与消息 (`conversation`)**: `Conversation`、`Message`、会话摘要与分页结果。
//! - **WebSocket 事件 (`ws_payloads`)**: 事件名常量、各事件载荷以及强类型的 `ClientEvent` / `ServerEvent`。
//! - **通用枚举 (`enums`)**: 用户角色 `UserRole` 与消息状态 `MessageStatus`。
//!
//! 所有模型都派生 `serde::Serialize` / `serde::Deserialize`，JSON 字段名采用 camelCase。

pub mod conversation;
pub mod enums;
pub mod ws_payloads;

pub use conversation::{Conversation, ConversationId, ConversationSummary, Message, MessageId, MessagePage};
pub use enums::{MessageStatus, UserRole};
