// chat_service/src/ws_server/connection_manager.rs

//! WebSocket 连接管理：在线用户登记表。

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, info, warn};
use uuid::Uuid;

use super::client_session::ClientSession;
use super::presence;

/// 管理所有活动的 WebSocket 客户端会话以及 "用户 -> 当前连接" 的登记表。
///
/// 同一用户可能短暂存在多个连接（例如重新登录），但登记表中每个用户最多只指向一个连接，
/// 以最后注册的为准。两个映射都是私有的，只能通过下面的方法访问。
#[derive(Debug, Default)]
pub struct ConnectionManager {
    /// 所有活动会话。Key: client_id
    clients: DashMap<Uuid, Arc<ClientSession>>,
    /// 在线登记表。Key: user_id，Value: 该用户当前登记的 client_id
    online_users: DashMap<String, Uuid>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        info!("[连接管理器] 新实例已创建。");
        Self::default()
    }

    /// 登记一个新连接，覆盖该用户之前的登记（后到者为准），并广播上线状态。
    ///
    /// 返回被覆盖的旧连接（如果仍然存活）。旧连接不会被主动关闭。
    pub fn register(&self, session: Arc<ClientSession>) -> Option<Arc<ClientSession>> {
        let client_id = session.client_id;
        let user_id = session.user_id.clone();
        self.clients.insert(client_id, Arc::clone(&session));
        let previous = self.online_users.insert(user_id.clone(), client_id);

        let replaced = previous
            .filter(|old_id| *old_id != client_id)
            .and_then(|old_id| self.get_client(&old_id));
        if let Some(old) = &replaced {
            warn!(
                "[连接管理器] 用户 {} 建立了新连接 {}，旧连接 {} 不再反映在在线状态中。",
                user_id, client_id, old.client_id
            );
        }

        info!(
            "[连接管理器] 客户端已登记: id={}, 用户={}, 角色={}, addr={:?}",
            client_id, user_id, session.role, session.addr
        );
        debug!("[连接管理器] 当前活动连接总数: {}", self.clients.len());

        presence::broadcast_presence(self, &user_id, true);
        replaced
    }

    /// 注销连接。只有当登记表仍然指向该连接时才移除用户的登记并广播下线。
    ///
    /// 返回 `true` 表示用户因此变为离线。
    pub fn unregister(&self, user_id: &str, client_id: Uuid) -> bool {
        self.clients.remove(&client_id);
        let went_offline = self
            .online_users
            .remove_if(user_id, |_, registered| *registered == client_id)
            .is_some();

        if went_offline {
            info!("[连接管理器] 客户端已注销: id={}, 用户={}，用户已离线。", client_id, user_id);
            presence::broadcast_presence(self, user_id, false);
        } else {
            debug!(
                "[连接管理器] 客户端 {} 已移除，但用户 {} 的登记指向其他连接，在线状态不变。",
                client_id, user_id
            );
        }
        went_offline
    }

    /// 查找用户当前登记的连接。
    pub fn lookup(&self, user_id: &str) -> Option<Arc<ClientSession>> {
        let client_id = *self.online_users.get(user_id)?.value();
        self.get_client(&client_id)
    }

    pub fn get_client(&self, client_id: &Uuid) -> Option<Arc<ClientSession>> {
        self.clients.get(client_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn all_online_ids(&self) -> HashSet<String> {
        self.online_users.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn online_count(&self) -> usize {
        self.online_users.len()
    }

    /// 所有活动会话的快照。
    pub fn all_sessions(&self) -> Vec<Arc<ClientSession>> {
        self.clients.iter().map(|entry| Arc::clone(entry.value())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthenticatedUser;
    use chat_models::{ws_payloads::USER_ONLINE, UserRole};
    use rust_websocket_utils::message::WsMessage;
    use tokio::sync::mpsc;

    fn session(user_id: &str, role: UserRole) -> (Arc<ClientSession>, mpsc::Receiver<WsMessage>) {
        let (tx, rx) = mpsc::channel(16);
        let user = AuthenticatedUser { user_id: user_id.to_string(), role };
        (Arc::new(ClientSession::new(user, None, tx)), rx)
    }

    fn drain_presence(rx: &mut mpsc::Receiver<WsMessage>) -> Vec<(String, bool)> {
        let mut events = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            assert_eq!(msg.message_type, USER_ONLINE);
            events.push((
                msg.payload["userId"].as_str().unwrap().to_string(),
                msg.payload["online"].as_bool().unwrap(),
            ));
        }
        events
    }

    #[tokio::test]
    async fn test_register_and_unregister_broadcast_presence() {
        let manager = ConnectionManager::new();
        let (observer, mut observer_rx) = session("manager-1", UserRole::Manager);
        manager.register(Arc::clone(&observer));
        let (tenant, _tenant_rx) = session("tenant-1", UserRole::Tenant);
        manager.register(Arc::clone(&tenant));

        assert_eq!(manager.lookup("tenant-1").unwrap().client_id, tenant.client_id);
        assert_eq!(manager.online_count(), 2);
        assert!(manager.all_online_ids().contains("tenant-1"));

        assert!(manager.unregister("tenant-1", tenant.client_id));
        assert!(manager.lookup("tenant-1").is_none());
        assert_eq!(
            drain_presence(&mut observer_rx),
            vec![
                ("manager-1".to_string(), true),
                ("tenant-1".to_string(), true),
                ("tenant-1".to_string(), false)
            ]
        );
    }

    #[tokio::test]
    /// 旧连接断开不会把已经用新连接登录的用户标记为离线。
    async fn test_stale_connection_unregister_is_identity_guarded() {
        let manager = ConnectionManager::new();
        let (first, _rx1) = session("tenant-1", UserRole::Tenant);
        let (second, mut rx2) = session("tenant-1", UserRole::Tenant);

        assert!(manager.register(Arc::clone(&first)).is_none());
        let replaced = manager.register(Arc::clone(&second)).expect("第一次登记的连接应被替换");
        assert_eq!(replaced.client_id, first.client_id);
        assert_eq!(manager.lookup("tenant-1").unwrap().client_id, second.client_id);

        drain_presence(&mut rx2);
        assert!(!manager.unregister("tenant-1", first.client_id));
        assert_eq!(manager.lookup("tenant-1").unwrap().client_id, second.client_id);
        assert!(drain_presence(&mut rx2).is_empty(), "旧连接断开不应广播下线");
        assert!(manager.get_client(&first.client_id).is_none());

        assert!(manager.unregister("tenant-1", second.client_id));
        assert!(manager.all_online_ids().is_empty());
        assert!(manager.all_sessions().is_empty());
    }
}
