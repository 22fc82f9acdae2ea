// chat_service/src/api/conversation_handler.rs

//! `/messages` 下的 REST 回退接口。
//!
//! 所有路由都需要 bearer token。调用者必须是会话的参与方，否则返回 403。
//! 请求体、路径和查询参数的解析错误统一转换为 400。

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chat_models::{
    ws_payloads::ServerEvent, Conversation, ConversationId, ConversationSummary, Message, MessageId, MessagePage,
    UserRole,
};
use log::{debug, info};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::AuthUser;
use crate::error::AppError;
use crate::state::AppState;
use crate::ws_server::message_router;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/conversations", get(list_conversations).post(create_conversation))
        .route("/conversations/:conversation_id", delete(delete_conversation))
        .route("/conversations/:conversation_id/messages", get(list_messages))
        .route("/send", post(send_message))
        .route("/unread-count", get(unread_count))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub other_user_id: String,
    #[serde(default)]
    pub property_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub conversation_id: ConversationId,
    pub content: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct MessageQuery {
    pub cursor: Option<MessageId>,
    pub limit: Option<i64>,
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::Validation(rejection.body_text()))
}

fn conversation_path(path: Result<Path<ConversationId>, PathRejection>) -> Result<ConversationId, AppError> {
    let Path(conversation_id) = path.map_err(|rejection| AppError::Validation(rejection.body_text()))?;
    if conversation_id < 1 {
        return Err(AppError::Validation("Invalid conversation id".to_string()));
    }
    Ok(conversation_id)
}

/// `GET /messages/conversations`
async fn list_conversations(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<ConversationSummary>>, AppError> {
    let summaries = state.store.list_conversations(&user.user_id, user.role).await?;
    debug!("[会话接口] 用户 {} 共有 {} 个会话。", user.user_id, summaries.len());
    Ok(Json(summaries))
}

/// `POST /messages/conversations`：查找或创建与对方的会话。调用者的角色决定自己是哪一方。
async fn create_conversation(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    payload: Result<Json<CreateConversationRequest>, JsonRejection>,
) -> Result<Json<Conversation>, AppError> {
    let request = json_body(payload)?;
    let other_user_id = request.other_user_id.trim();
    if other_user_id.is_empty() {
        return Err(AppError::Validation("otherUserId is required".to_string()));
    }
    if other_user_id == user.user_id {
        return Err(AppError::Validation("Cannot start a conversation with yourself".to_string()));
    }

    let (tenant_id, manager_id) = match user.role {
        UserRole::Tenant => (user.user_id.as_str(), other_user_id),
        UserRole::Manager => (other_user_id, user.user_id.as_str()),
    };
    let conversation = state
        .store
        .find_or_create_conversation(tenant_id, manager_id, request.property_id)
        .await?;
    info!(
        "[会话接口] 会话 {} (租户: {}, 管理员: {}, 房源: {:?}) 已就绪。",
        conversation.id, conversation.tenant_cognito_id, conversation.manager_cognito_id, conversation.property_id
    );
    Ok(Json(conversation))
}

/// `GET /messages/conversations/:id/messages?cursor&limit`
///
/// 读取历史的同时把对方发来的消息标记为已读，返回的状态已经是更新后的。
async fn list_messages(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    path: Result<Path<ConversationId>, PathRejection>,
    query: Result<Query<MessageQuery>, QueryRejection>,
) -> Result<Json<MessagePage>, AppError> {
    let conversation_id = conversation_path(path)?;
    let Query(query) = query.map_err(|rejection| AppError::Validation(rejection.body_text()))?;
    if matches!(query.cursor, Some(cursor) if cursor < 1) {
        return Err(AppError::Validation("cursor must be a positive message id".to_string()));
    }
    let limit = state.resolve_page_size(query.limit)?;
    state.authorize_party(conversation_id, &user.user_id).await?;

    let page = state
        .store
        .list_messages(conversation_id, &user.user_id, query.cursor, limit)
        .await?;
    Ok(Json(page))
}

/// `POST /messages/send`：不经过 WebSocket 发送消息。
///
/// 开启实时推送时会向会话房间广播 `message:new`，但不会给房间外的接收方发送通知。
async fn send_message(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Message>), AppError> {
    let request = json_body(payload)?;
    state.authorize_party(request.conversation_id, &user.user_id).await?;
    let content = state.normalize_content(&request.content)?;

    let ordering = state.conversation_lock(request.conversation_id);
    let _ordered = ordering.lock().await;
    let message = state
        .store
        .append_message(request.conversation_id, &user.user_id, user.role, &content)
        .await?;
    if state.config.websocket.realtime_fanout_enabled {
        let delivered_to = message_router::broadcast_event(
            &state,
            request.conversation_id,
            &ServerEvent::MessageNew(message.clone()),
        );
        debug!(
            "[会话接口] 消息 {} 已广播给会话 {} 中的 {} 个连接。",
            message.id, request.conversation_id, delivered_to
        );
    }
    Ok((StatusCode::CREATED, Json(message)))
}

/// `GET /messages/unread-count`
async fn unread_count(AuthUser(user): AuthUser, State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let count = state.store.unread_count(&user.user_id, user.role).await?;
    Ok(Json(json!({ "unreadCount": count })))
}

/// `DELETE /messages/conversations/:id`：删除会话及全部消息，并解散对应的房间。
async fn delete_conversation(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    path: Result<Path<ConversationId>, PathRejection>,
) -> Result<Json<Value>, AppError> {
    let conversation_id = conversation_path(path)?;
    state.authorize_party(conversation_id, &user.user_id).await?;

    state.store.delete_conversation(conversation_id).await?;
    let evicted = state.room_manager.drop_room(conversation_id);
    state.typing_state.clear(conversation_id);
    state.forget_conversation_lock(conversation_id);
    info!(
        "[会话接口] 用户 {} 删除了会话 {}，{} 个连接被移出房间。",
        user.user_id, conversation_id, evicted
    );
    Ok(Json(json!({ "message": "Conversation deleted" })))
}
