// chat_service/src/ws_server/client_session.rs

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use chat_models::{ws_payloads::ServerEvent, UserRole};
use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use rust_websocket_utils::message::WsMessage;
use tokio::sync::{mpsc, mpsc::error::TrySendError, Notify, RwLock};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;

/// 向会话出站队列推送消息失败的原因。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// 队列已满。该连接会被要求关闭。
    QueueFull,
    /// 发送任务已经退出。
    Closed,
}

/// 一个已通过鉴权的 WebSocket 连接在服务端的会话状态。
///
/// 每个连接对应一个 `ClientSession`，通过 `Arc` 在连接管理器、房间管理器和消息路由之间共享。
/// 身份信息在握手时确定，之后不再变化；可变的只有 `last_seen` 和关闭标志。
#[derive(Debug)]
pub struct ClientSession {
    /// 服务端为该连接生成的唯一标识符。同一用户的不同连接拥有不同的 `client_id`。
    pub client_id: Uuid,
    pub user_id: String,
    pub role: UserRole,

    /// 出站队列的发送端，由该连接专属的发送任务消费。
    sender: mpsc::Sender<WsMessage>,

    /// 客户端的网络地址。通过不带 `ConnectInfo` 的路由接入时未知。
    pub addr: Option<SocketAddr>,

    pub creation_time: DateTime<Utc>,

    /// 最后一次收到该客户端任意帧（业务消息或 Pong）的时间，心跳监视器据此判断超时。
    last_seen: RwLock<DateTime<Utc>>,

    connection_should_close: AtomicBool,
    close_notify: Notify,
}

impl ClientSession {
    pub fn new(user: AuthenticatedUser, addr: Option<SocketAddr>, sender: mpsc::Sender<WsMessage>) -> Self {
        let now = Utc::now();
        Self {
            client_id: Uuid::new_v4(),
            user_id: user.user_id,
            role: user.role,
            sender,
            addr,
            creation_time: now,
            last_seen: RwLock::new(now),
            connection_should_close: AtomicBool::new(false),
            close_notify: Notify::new(),
        }
    }

    /// 刷新最后活跃时间。
    pub async fn touch(&self) {
        *self.last_seen.write().await = Utc::now();
    }

    pub async fn last_seen(&self) -> DateTime<Utc> {
        *self.last_seen.read().await
    }

    /// 以非阻塞方式把消息放入出站队列。
    ///
    /// 队列已满说明客户端消费过慢，此时不等待，直接请求关闭该连接，
    /// 避免一个慢连接拖慢对其他连接的广播。
    pub fn push(&self, message: WsMessage) -> Result<(), PushError> {
        match self.sender.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(dropped)) => {
                warn!(
                    "[会话 {}] 出站队列已满 (用户: {})，丢弃消息 '{}' 并断开连接。",
                    self.client_id, self.user_id, dropped.message_type
                );
                self.request_close();
                Err(PushError::QueueFull)
            }
            Err(TrySendError::Closed(dropped)) => {
                debug!(
                    "[会话 {}] 发送任务已结束，消息 '{}' 未送出。",
                    self.client_id, dropped.message_type
                );
                Err(PushError::Closed)
            }
        }
    }

    /// 把服务端事件编码为 `WsMessage` 并推送。
    pub fn send_event(&self, event: &ServerEvent) -> Result<(), PushError> {
        match encode_event(event) {
            Some(message) => self.push(message),
            None => Err(PushError::Closed),
        }
    }

    /// 推送事件，失败时只记录日志。返回是否成功入队。
    ///
    /// 用于不需要调用方处理失败的单播回复（确认、错误、通知）。
    pub fn deliver(&self, event: &ServerEvent) -> bool {
        match self.send_event(event) {
            Ok(()) => true,
            Err(e) => {
                debug!(
                    "[会话 {}] 事件 '{}' 未能送出 (用户: {}): {:?}",
                    self.client_id,
                    event.name(),
                    self.user_id,
                    e
                );
                false
            }
        }
    }

    /// 请求关闭连接。收发两个任务都会在下一次轮询时退出。
    pub fn request_close(&self) {
        if !self.connection_should_close.swap(true, Ordering::SeqCst) {
            debug!("[会话 {}] 已请求关闭连接。", self.client_id);
        }
        self.close_notify.notify_waiters();
    }

    pub fn should_close(&self) -> bool {
        self.connection_should_close.load(Ordering::SeqCst)
    }

    /// 等待关闭请求。已经请求过时立即返回。
    pub async fn closed(&self) {
        let notified = self.close_notify.notified();
        if self.should_close() {
            return;
        }
        notified.await;
    }
}

/// 把 `ServerEvent` 编码为线上信封。序列化失败只会出现在载荷类型本身有缺陷时，记录后返回 `None`。
pub fn encode_event(event: &ServerEvent) -> Option<WsMessage> {
    match event.to_payload() {
        Ok(payload) => Some(WsMessage::from_value(event.name(), payload)),
        Err(e) => {
            error!("[会话] 序列化事件 '{}' 失败: {}", event.name(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_models::ws_payloads::{PresencePayload, USER_ONLINE};
    use std::sync::Arc;
    use tokio::time::{timeout, Duration};

    fn tenant() -> AuthenticatedUser {
        AuthenticatedUser { user_id: "tenant-1".to_string(), role: UserRole::Tenant }
    }

    #[tokio::test]
    async fn test_push_enqueues_encoded_event() {
        let (tx, mut rx) = mpsc::channel(4);
        let session = ClientSession::new(tenant(), None, tx);
        let event = ServerEvent::UserOnline(PresencePayload { user_id: "x".into(), online: true });

        session.send_event(&event).unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.message_type, USER_ONLINE);
        assert_eq!(received.payload["online"], true);
    }

    #[tokio::test]
    /// 出站队列写满时请求断开，而不是阻塞调用方。
    async fn test_full_queue_requests_close() {
        let (tx, _rx) = mpsc::channel(1);
        let session = ClientSession::new(tenant(), None, tx);
        let msg = WsMessage::from_value("t", serde_json::json!({}));

        assert_eq!(session.push(msg.clone()), Ok(()));
        assert!(!session.should_close());
        assert_eq!(session.push(msg), Err(PushError::QueueFull));
        assert!(session.should_close());
    }

    #[tokio::test]
    async fn test_push_after_receiver_dropped_reports_closed() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let session = ClientSession::new(tenant(), None, tx);
        assert_eq!(session.push(WsMessage::from_value("t", serde_json::json!(null))), Err(PushError::Closed));
    }

    #[tokio::test]
    async fn test_deliver_reports_failed_push() {
        let (tx, mut rx) = mpsc::channel(1);
        let session = ClientSession::new(tenant(), None, tx);
        let event = ServerEvent::error("Invalid message format", None);

        assert!(session.deliver(&event));
        assert_eq!(rx.recv().await.unwrap().payload["error"], "Invalid message format");

        drop(rx);
        assert!(!session.deliver(&event));
        // 接收端已关闭不算慢客户端，不会触发断开
        assert!(!session.should_close());
    }

    #[tokio::test]
    async fn test_closed_resolves_after_request_close() {
        let (tx, _rx) = mpsc::channel(1);
        let session = Arc::new(ClientSession::new(tenant(), None, tx));

        let waiter = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.closed().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.request_close();
        timeout(Duration::from_secs(1), waiter).await.expect("closed() 应在关闭请求后返回").unwrap();

        // 已关闭的会话再次等待立即返回
        timeout(Duration::from_millis(100), session.closed()).await.unwrap();
    }

    #[tokio::test]
    async fn test_touch_moves_last_seen_forward() {
        let (tx, _rx) = mpsc::channel(1);
        let session = ClientSession::new(tenant(), None, tx);
        let before = session.last_seen().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        session.touch().await;
        assert!(session.last_seen().await > before);
    }
}
