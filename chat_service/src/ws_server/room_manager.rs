// chat_service/src/ws_server/room_manager.rs

//! 会话房间：每个会话 ID 对应当前加入该会话的连接集合，决定实时广播的接收者。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chat_models::ConversationId;
use dashmap::DashMap;
use log::debug;
use rust_websocket_utils::message::WsMessage;
use uuid::Uuid;

use super::client_session::ClientSession;

#[derive(Debug, Default)]
pub struct RoomManager {
    rooms: DashMap<ConversationId, HashMap<Uuid, Arc<ClientSession>>>,
    /// 反向索引，断开连接时用来找出需要离开的房间。
    memberships: DashMap<Uuid, HashSet<ConversationId>>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入房间。重复加入不产生影响，返回 `false`。
    pub fn join(&self, session: &Arc<ClientSession>, conversation_id: ConversationId) -> bool {
        let newly_joined = self
            .rooms
            .entry(conversation_id)
            .or_default()
            .insert(session.client_id, Arc::clone(session))
            .is_none();
        self.memberships.entry(session.client_id).or_default().insert(conversation_id);
        if newly_joined {
            debug!("[房间管理器] 连接 {} 加入会话房间 {}", session.client_id, conversation_id);
        }
        newly_joined
    }

    /// 离开房间。未加入时什么也不做，返回 `false`。
    pub fn leave(&self, client_id: Uuid, conversation_id: ConversationId) -> bool {
        let removed = self
            .rooms
            .get_mut(&conversation_id)
            .map(|mut room| room.remove(&client_id).is_some())
            .unwrap_or(false);
        self.rooms.remove_if(&conversation_id, |_, room| room.is_empty());

        if let Some(mut joined) = self.memberships.get_mut(&client_id) {
            joined.remove(&conversation_id);
        }
        self.memberships.remove_if(&client_id, |_, joined| joined.is_empty());

        if removed {
            debug!("[房间管理器] 连接 {} 离开会话房间 {}", client_id, conversation_id);
        }
        removed
    }

    /// 让连接离开它加入的所有房间，返回离开的会话 ID。
    pub fn leave_all(&self, client_id: Uuid) -> Vec<ConversationId> {
        let joined: Vec<ConversationId> = self
            .memberships
            .remove(&client_id)
            .map(|(_, joined)| joined.into_iter().collect())
            .unwrap_or_default();
        for conversation_id in &joined {
            if let Some(mut room) = self.rooms.get_mut(conversation_id) {
                room.remove(&client_id);
            }
            self.rooms.remove_if(conversation_id, |_, room| room.is_empty());
        }
        joined
    }

    pub fn is_member(&self, client_id: Uuid, conversation_id: ConversationId) -> bool {
        self.rooms
            .get(&conversation_id)
            .map(|room| room.contains_key(&client_id))
            .unwrap_or(false)
    }

    pub fn members(&self, conversation_id: ConversationId) -> Vec<Uuid> {
        self.rooms
            .get(&conversation_id)
            .map(|room| room.keys().copied().collect())
            .unwrap_or_default()
    }

    /// 向房间内所有连接（包括发送者）推送消息，返回成功入队的连接数。
    ///
    /// 推送只是写入各连接的出站队列，不会等待任何一个连接的网络写入。
    pub fn broadcast(&self, conversation_id: ConversationId, message: &WsMessage) -> usize {
        let recipients: Vec<Arc<ClientSession>> = match self.rooms.get(&conversation_id) {
            Some(room) => room.values().cloned().collect(),
            None => return 0,
        };
        let delivered = recipients
            .iter()
            .filter(|session| session.push(message.clone()).is_ok())
            .count();
        debug!(
            "[房间管理器] 会话房间 {} 广播 '{}'：{}/{} 个连接入队成功",
            conversation_id,
            message.message_type,
            delivered,
            recipients.len()
        );
        delivered
    }

    /// 会话被删除时解散房间。
    pub fn drop_room(&self, conversation_id: ConversationId) -> usize {
        let Some((_, room)) = self.rooms.remove(&conversation_id) else {
            return 0;
        };
        for client_id in room.keys() {
            if let Some(mut joined) = self.memberships.get_mut(client_id) {
                joined.remove(&conversation_id);
            }
            self.memberships.remove_if(client_id, |_, joined| joined.is_empty());
        }
        room.len()
    }
}
