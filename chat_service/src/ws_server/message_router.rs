// chat_service/src/ws_server/message_router.rs

//! 负责处理从客户端接收到的 WebSocket 消息，并根据事件类型进行分发处理。
//!
//! 每个事件都会重新校验发送者是否为会话的参与方。失败时只向发送者回复 `message:error`，
//! 不会向房间广播任何内容；输入状态事件的失败则完全静默。

use std::sync::Arc;

use anyhow::anyhow;
use chat_models::{
    ws_payloads::{
        ClientEvent, EventParseError, JoinedPayload, MessageNotificationPayload, ReadMessagesPayload,
        ReadUpdatePayload, SendMessagePayload, ServerEvent, TypingPayload, TypingUpdatePayload, MESSAGE_SEND,
    },
    Conversation, ConversationId, Message, MessageStatus,
};
use chrono::Utc;
use log::{debug, info, warn};
use rust_websocket_utils::message::WsMessage;

use super::client_session::{encode_event, ClientSession};
use crate::error::AppError;
use crate::state::AppState;

/// 异步处理从客户端接收到的单个 WebSocket 消息。
///
/// # 返回
/// 客户端可见的错误（无权限、参数错误等）已经以 `message:error` 回复，返回 `Ok(())`。
/// 只有存储故障这类意外错误才返回 `Err`，由连接循环记录日志，连接本身不受影响。
pub async fn handle_message(
    client_session: Arc<ClientSession>,
    message: WsMessage,
    state: &AppState,
) -> Result<(), anyhow::Error> {
    client_session.touch().await;
    debug!(
        "客户端 {}: 收到消息，类型: '{}'，原始负载: '{}'",
        client_session.client_id, message.message_type, message.payload
    );

    let event = match ClientEvent::parse(&message.message_type, &message.payload) {
        Ok(event) => event,
        Err(EventParseError::UnknownEvent(name)) => {
            warn!("客户端 {}: 收到未知事件类型: '{}'", client_session.client_id, name);
            send_error(&client_session, format!("Unknown event type '{}'", name), Some(&name));
            return Ok(());
        }
        Err(EventParseError::InvalidPayload { event, reason }) => {
            if event == MESSAGE_SEND {
                warn!("客户端 {}: message:send 载荷无效: {}", client_session.client_id, reason);
                send_error(&client_session, "Invalid message payload", Some(MESSAGE_SEND));
            } else {
                debug!("客户端 {}: 忽略格式错误的 '{}' 事件: {}", client_session.client_id, event, reason);
            }
            return Ok(());
        }
    };

    let event_name = event.name();
    let result = match event {
        ClientEvent::JoinConversation(conversation_id) => handle_join(&client_session, conversation_id, state).await,
        ClientEvent::LeaveConversation(conversation_id) => {
            state.room_manager.leave(client_session.client_id, conversation_id);
            Ok(())
        }
        ClientEvent::SendMessage(payload) => handle_send(&client_session, payload, state).await,
        ClientEvent::TypingStart(payload) => {
            handle_typing(&client_session, payload, true, state).await;
            Ok(())
        }
        ClientEvent::TypingStop(payload) => {
            handle_typing(&client_session, payload, false, state).await;
            Ok(())
        }
        ClientEvent::MarkRead(payload) => handle_mark_read(&client_session, payload, state).await,
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            send_error(&client_session, e.client_message(), Some(event_name));
            if e.status_code().is_server_error() {
                Err(anyhow!(e).context(format!("处理客户端 {} 的 '{}' 事件失败", client_session.client_id, event_name)))
            } else {
                debug!("客户端 {}: '{}' 被拒绝: {}", client_session.client_id, event_name, e);
                Ok(())
            }
        }
    }
}

async fn handle_join(
    client_session: &Arc<ClientSession>,
    conversation_id: ConversationId,
    state: &AppState,
) -> Result<(), AppError> {
    state.authorize_party(conversation_id, &client_session.user_id).await?;
    state.room_manager.join(client_session, conversation_id);
    client_session.deliver(&ServerEvent::ConversationJoined(JoinedPayload { conversation_id }));
    Ok(())
}

async fn handle_send(
    client_session: &Arc<ClientSession>,
    payload: SendMessagePayload,
    state: &AppState,
) -> Result<(), AppError> {
    let conversation = state
        .authorize_party(payload.conversation_id, &client_session.user_id)
        .await?;
    let content = state.normalize_content(&payload.content)?;

    if let Some(claimed) = payload.receiver_id.as_deref() {
        if conversation.other_party(&client_session.user_id) != Some(claimed) {
            warn!(
                "客户端 {}: 声明的接收方 '{}' 不是会话 {} 的另一方，已忽略。",
                client_session.client_id, claimed, conversation.id
            );
        }
    }

    // 写入和广播在同一把锁内完成，房间成员看到的顺序与消息 ID 顺序一致。
    let ordering = state.conversation_lock(conversation.id);
    let _ordered = ordering.lock().await;
    let message = state
        .store
        .append_message(conversation.id, &client_session.user_id, client_session.role, &content)
        .await?;
    info!(
        "客户端 {}: 用户 {} 在会话 {} 中发送了消息 {}",
        client_session.client_id, client_session.user_id, conversation.id, message.id
    );
    fan_out_new_message(state, &conversation, message).await;
    Ok(())
}

/// 把新消息推送给会话房间；若接收方在线但没有加入房间，则标记为已送达并单独通知。
///
/// 返回推送完成后的消息（状态可能已变为 `Delivered`）。
pub async fn fan_out_new_message(state: &AppState, conversation: &Conversation, mut message: Message) -> Message {
    broadcast_event(state, conversation.id, &ServerEvent::MessageNew(message.clone()));

    let Some(receiver_id) = conversation.other_party(&message.sender_cognito_id) else {
        return message;
    };
    let Some(receiver) = state.connection_manager.lookup(receiver_id) else {
        debug!("[消息路由] 接收方 {} 不在线，消息 {} 保持 Sent。", receiver_id, message.id);
        return message;
    };
    if state.room_manager.is_member(receiver.client_id, conversation.id) {
        return message;
    }

    match state.store.mark_delivered(message.id).await {
        Ok(true) => {
            message.advance_status(MessageStatus::Delivered, Utc::now());
        }
        Ok(false) => {}
        Err(e) => warn!("[消息路由] 标记消息 {} 为已送达失败: {}", message.id, e),
    }
    let notification = ServerEvent::MessageNotification(MessageNotificationPayload {
        conversation_id: conversation.id,
        message: message.clone(),
    });
    receiver.deliver(&notification);
    message
}

/// 向会话房间广播一个服务端事件，返回成功入队的连接数。
pub fn broadcast_event(state: &AppState, conversation_id: ConversationId, event: &ServerEvent) -> usize {
    match encode_event(event) {
        Some(message) => state.room_manager.broadcast(conversation_id, &message),
        None => 0,
    }
}

async fn handle_typing(client_session: &Arc<ClientSession>, payload: TypingPayload, is_typing: bool, state: &AppState) {
    let conversation_id = payload.conversation_id;
    let authorized = state.room_manager.is_member(client_session.client_id, conversation_id)
        || state
            .authorize_party(conversation_id, &client_session.user_id)
            .await
            .is_ok();
    if !authorized {
        debug!(
            "客户端 {}: 忽略对会话 {} 的输入状态事件（不是参与方）。",
            client_session.client_id, conversation_id
        );
        return;
    }

    state.typing_state.set(conversation_id, &client_session.user_id, is_typing);
    broadcast_event(
        state,
        conversation_id,
        &ServerEvent::TypingUpdate(TypingUpdatePayload {
            user_id: client_session.user_id.clone(),
            conversation_id,
            is_typing,
        }),
    );
}

async fn handle_mark_read(
    client_session: &Arc<ClientSession>,
    payload: ReadMessagesPayload,
    state: &AppState,
) -> Result<(), AppError> {
    if payload.message_ids.is_empty() {
        return Ok(());
    }
    state
        .authorize_party(payload.conversation_id, &client_session.user_id)
        .await?;

    let receipt = state
        .store
        .mark_read(payload.conversation_id, &payload.message_ids, &client_session.user_id)
        .await?;
    if receipt.updated.is_empty() {
        return Ok(());
    }
    broadcast_event(
        state,
        payload.conversation_id,
        &ServerEvent::MessagesReadUpdate(ReadUpdatePayload {
            conversation_id: payload.conversation_id,
            message_ids: receipt.updated,
            read_by: client_session.user_id.clone(),
            read_at: receipt.read_at,
        }),
    );
    Ok(())
}

/// 辅助函数：只向触发错误的客户端发送 `message:error`。
fn send_error(client_session: &ClientSession, error: impl Into<String>, original_message_type: Option<&str>) {
    client_session.deliver(&ServerEvent::error(error, original_message_type));
}
