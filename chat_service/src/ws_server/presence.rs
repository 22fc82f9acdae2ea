// chat_service/src/ws_server/presence.rs

//! 在线状态广播。用户上线或下线时，向当前所有连接推送 `user:online`。

use chat_models::ws_payloads::{PresencePayload, ServerEvent};
use log::info;

use super::client_session::encode_event;
use super::connection_manager::ConnectionManager;

/// 向所有连接（包括该用户自己的连接）广播在线状态变化，返回成功入队的连接数。
pub fn broadcast_presence(connection_manager: &ConnectionManager, user_id: &str, online: bool) -> usize {
    let event = ServerEvent::UserOnline(PresencePayload {
        user_id: user_id.to_string(),
        online,
    });
    let Some(message) = encode_event(&event) else {
        return 0;
    };

    let delivered = connection_manager
        .all_sessions()
        .iter()
        .filter(|session| session.push(message.clone()).is_ok())
        .count();
    info!(
        "[在线状态] 用户 {} 已{}，已通知 {} 个连接。",
        user_id,
        if online { "上线" } else { "下线" },
        delivered
    );
    delivered
}
