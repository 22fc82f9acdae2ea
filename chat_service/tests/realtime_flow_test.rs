// chat_service/tests/realtime_flow_test.rs

//! 端到端测试：在随机端口上启动完整服务，用真实的 WebSocket 客户端交互。

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use axum::{
    body::Body,
    http::{header::AUTHORIZATION, header::CONTENT_TYPE, Method, Request, StatusCode},
};
use chat_models::{
    ws_payloads::{
        CONVERSATION_JOIN, CONVERSATION_JOINED, MESSAGES_READ, MESSAGES_READ_UPDATE, MESSAGE_ERROR, MESSAGE_NEW,
        MESSAGE_NOTIFICATION, MESSAGE_SEND, TYPING_START, TYPING_UPDATE, USER_ONLINE,
    },
    Conversation, ConversationId, ConversationSummary, Message, MessageId, MessagePage, MessageStatus, UserRole,
};
use chat_service::{
    api::build_router,
    auth::{Claims, JwtVerifier},
    config::AppConfig,
    db::{InMemoryMessageStore, MessageStore, ReadReceipt, StoreError},
    state::AppState,
    ws_server::service,
};
use jsonwebtoken::{encode, EncodingKey, Header};
use rust_websocket_utils::client::transport::{connect_client, receive_message, ClientConnection};
use rust_websocket_utils::WsMessage;
use serde_json::{json, Value};
use tokio::sync::{oneshot, Notify};
use tokio::time::{sleep, timeout, Duration, Instant};
use tower::ServiceExt;

const SECRET: &str = "realtime-test-secret";
const TENANT: &str = "tenant-A";
const MANAGER: &str = "manager-B";

fn init_test_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn token(user_id: &str, role: &str) -> String {
    let exp = (chrono::Utc::now().timestamp() + 3600) as usize;
    let claims = Claims { user_id: user_id.to_string(), role: role.to_string(), exp };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.auth.jwt_secret = SECRET.to_string();
    config
}

async fn start_server() -> (SocketAddr, AppState) {
    start_server_with(AppState::from_config(test_config())).await
}

async fn start_server_with(state: AppState) -> (SocketAddr, AppState) {
    init_test_logger();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_state = state.clone();
    tokio::spawn(async move {
        let _ = service::serve(listener, server_state).await;
    });
    (addr, state)
}

/// 建立连接，并等到服务端广播自己的上线事件，确保登记已完成。
async fn connect_as(addr: SocketAddr, user_id: &str, role: &str) -> ClientConnection {
    let mut conn = connect_client(format!("ws://{}/ws", addr), Some(&token(user_id, role)))
        .await
        .expect("握手应当成功");
    loop {
        let presence = expect_event(&mut conn, USER_ONLINE).await;
        if presence.payload["userId"] == user_id {
            assert_eq!(presence.payload["online"], true);
            return conn;
        }
    }
}

/// 等待指定类型的事件，跳过其他事件。
async fn expect_event(conn: &mut ClientConnection, event_type: &str) -> WsMessage {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let frame = timeout(remaining, receive_message(&mut conn.ws_receiver))
            .await
            .unwrap_or_else(|_| panic!("等待 '{}' 事件超时", event_type))
            .unwrap_or_else(|| panic!("等待 '{}' 事件时连接被关闭", event_type))
            .expect("服务端消息应能解析");
        if frame.message_type == event_type {
            return frame;
        }
    }
}

/// 在一段时间内确认没有收到指定类型的事件。
async fn assert_no_event(conn: &mut ClientConnection, event_type: &str, wait: Duration) {
    let deadline = Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, receive_message(&mut conn.ws_receiver)).await {
            Err(_) => return,
            Ok(None) => return,
            Ok(Some(Ok(frame))) => assert_ne!(frame.message_type, event_type, "不应收到 '{}'", event_type),
            Ok(Some(Err(e))) => panic!("服务端消息无法解析: {}", e),
        }
    }
}

async fn emit(conn: &mut ClientConnection, event_type: &str, payload: Value) {
    conn.send_message(&WsMessage::from_value(event_type, payload)).await.unwrap();
}

async fn join(conn: &mut ClientConnection, conversation_id: i64) {
    emit(conn, CONVERSATION_JOIN, json!({ "conversationId": conversation_id })).await;
    let joined = expect_event(conn, CONVERSATION_JOINED).await;
    assert_eq!(joined.payload["conversationId"], conversation_id);
}

async fn new_conversation(state: &AppState) -> i64 {
    state.store.find_or_create_conversation(TENANT, MANAGER, Some(42)).await.unwrap().id
}

async fn wait_until_offline(state: &AppState, user_id: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while state.connection_manager.lookup(user_id).is_some() {
        assert!(Instant::now() < deadline, "用户 {} 未按时下线", user_id);
        sleep(Duration::from_millis(20)).await;
    }
}

/// 第一条消息写入后先通知测试、再停顿一段时间才返回，用来制造并发发送的竞争窗口。
struct SlowFirstAppendStore {
    inner: InMemoryMessageStore,
    slowed: AtomicBool,
    first_committed: Arc<Notify>,
}

impl SlowFirstAppendStore {
    fn new() -> Self {
        Self {
            inner: InMemoryMessageStore::new(),
            slowed: AtomicBool::new(false),
            first_committed: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl MessageStore for SlowFirstAppendStore {
    async fn find_or_create_conversation(
        &self,
        tenant_id: &str,
        manager_id: &str,
        property_id: Option<i64>,
    ) -> Result<Conversation, StoreError> {
        self.inner.find_or_create_conversation(tenant_id, manager_id, property_id).await
    }

    async fn get_conversation(&self, conversation_id: ConversationId) -> Result<Conversation, StoreError> {
        self.inner.get_conversation(conversation_id).await
    }

    async fn list_conversations(&self, user_id: &str, role: UserRole) -> Result<Vec<ConversationSummary>, StoreError> {
        self.inner.list_conversations(user_id, role).await
    }

    async fn append_message(
        &self,
        conversation_id: ConversationId,
        sender_id: &str,
        sender_role: UserRole,
        content: &str,
    ) -> Result<Message, StoreError> {
        let message = self.inner.append_message(conversation_id, sender_id, sender_role, content).await?;
        if !self.slowed.swap(true, Ordering::SeqCst) {
            self.first_committed.notify_one();
            sleep(Duration::from_millis(150)).await;
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
        self.inner.list_messages(conversation_id, reader_id, cursor, limit).await
    }

    async fn mark_delivered(&self, message_id: MessageId) -> Result<bool, StoreError> {
        self.inner.mark_delivered(message_id).await
    }

    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        message_ids: &[MessageId],
        reader_id: &str,
    ) -> Result<ReadReceipt, StoreError> {
        self.inner.mark_read(conversation_id, message_ids, reader_id).await
    }

    async fn unread_count(&self, user_id: &str, role: UserRole) -> Result<u64, StoreError> {
        self.inner.unread_count(user_id, role).await
    }

    async fn delete_conversation(&self, conversation_id: ConversationId) -> Result<(), StoreError> {
        self.inner.delete_conversation(conversation_id).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}

/// 启动使用 [`SlowFirstAppendStore`] 的服务，返回“第一条消息已写入”的通知。
async fn start_slow_server() -> (SocketAddr, AppState, Arc<Notify>) {
    let store = SlowFirstAppendStore::new();
    let first_committed = Arc::clone(&store.first_committed);
    let state = AppState::new(test_config(), Arc::new(store), Arc::new(JwtVerifier::new(SECRET)));
    let (addr, state) = start_server_with(state).await;
    (addr, state, first_committed)
}

/// 收集 `count` 条 `message:new`，返回 `(id, content)`。
async fn collect_new_messages(conn: &mut ClientConnection, count: usize) -> Vec<(i64, String)> {
    let mut received = Vec::with_capacity(count);
    for _ in 0..count {
        let frame = expect_event(conn, MESSAGE_NEW).await;
        received.push((
            frame.payload["id"].as_i64().unwrap(),
            frame.payload["content"].as_str().unwrap().to_string(),
        ));
    }
    received
}

#[tokio::test]
async fn test_handshake_rejects_missing_or_invalid_tokens() {
    let (addr, state) = start_server().await;
    let url = format!("ws://{}/ws", addr);

    assert!(connect_client(url.clone(), None).await.is_err());
    assert!(connect_client(url.clone(), Some("forged.token.value")).await.is_err());
    assert!(connect_client(url.clone(), Some(&token("admin-1", "admin"))).await.is_err());
    assert_eq!(state.connection_manager.online_count(), 0);

    // 浏览器客户端可以通过查询参数传递 token
    let query_url = format!("{}?token={}", url, token(TENANT, "tenant"));
    let mut conn = connect_client(query_url, None).await.expect("查询参数中的 token 应被接受");
    let presence = expect_event(&mut conn, USER_ONLINE).await;
    assert_eq!(presence.payload["userId"], TENANT);
}

#[tokio::test]
async fn test_both_parties_in_room_receive_the_same_message() {
    let (addr, state) = start_server().await;
    let conversation_id = new_conversation(&state).await;
    let mut tenant = connect_as(addr, TENANT, "tenant").await;
    let mut manager = connect_as(addr, MANAGER, "manager").await;
    join(&mut tenant, conversation_id).await;
    join(&mut manager, conversation_id).await;

    emit(
        &mut tenant,
        MESSAGE_SEND,
        json!({ "conversationId": conversation_id, "content": " Hello ", "receiverId": MANAGER }),
    )
    .await;

    let at_tenant = expect_event(&mut tenant, MESSAGE_NEW).await;
    let at_manager = expect_event(&mut manager, MESSAGE_NEW).await;
    assert_eq!(at_tenant.payload["id"], at_manager.payload["id"]);
    assert_eq!(at_manager.payload["content"], "Hello");
    assert_eq!(at_manager.payload["senderCognitoId"], TENANT);
    assert_eq!(at_manager.payload["status"], "Sent");
    // 接收方已在房间内，不会再收到通知
    assert_no_event(&mut manager, MESSAGE_NOTIFICATION, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_receiver_outside_room_gets_notification() {
    let (addr, state) = start_server().await;
    let conversation_id = new_conversation(&state).await;
    let mut tenant = connect_as(addr, TENANT, "tenant").await;
    let mut manager = connect_as(addr, MANAGER, "manager").await;
    join(&mut tenant, conversation_id).await;

    emit(&mut tenant, MESSAGE_SEND, json!({ "conversationId": conversation_id, "content": "ping" })).await;

    let at_tenant = expect_event(&mut tenant, MESSAGE_NEW).await;
    let notification = expect_event(&mut manager, MESSAGE_NOTIFICATION).await;
    assert_eq!(notification.payload["conversationId"], conversation_id);
    assert_eq!(notification.payload["message"]["id"], at_tenant.payload["id"]);
    assert_eq!(notification.payload["message"]["status"], "Delivered");

    let page = state.store.list_messages(conversation_id, TENANT, None, 10).await.unwrap();
    assert_eq!(page.messages[0].status, MessageStatus::Delivered);
}

#[tokio::test]
async fn test_message_persists_when_receiver_disconnects() {
    let (addr, state) = start_server().await;
    let conversation_id = new_conversation(&state).await;
    let mut tenant = connect_as(addr, TENANT, "tenant").await;
    let mut manager = connect_as(addr, MANAGER, "manager").await;
    join(&mut tenant, conversation_id).await;
    join(&mut manager, conversation_id).await;

    let tenant_client = state.connection_manager.lookup(TENANT).unwrap().client_id;
    let manager_client = state.connection_manager.lookup(MANAGER).unwrap().client_id;
    assert!(state.room_manager.members(conversation_id).contains(&manager_client));

    manager.close().await.unwrap();
    drop(manager);
    let offline = expect_event(&mut tenant, USER_ONLINE).await;
    assert_eq!(offline.payload, json!({ "userId": MANAGER, "online": false }));
    wait_until_offline(&state, MANAGER).await;

    // 断开的连接已从房间移除，留在房间里的只有租户
    let members = state.room_manager.members(conversation_id);
    assert!(!members.contains(&manager_client));
    assert_eq!(members, vec![tenant_client]);

    emit(&mut tenant, MESSAGE_SEND, json!({ "conversationId": conversation_id, "content": "are you there?" })).await;
    let sent = expect_event(&mut tenant, MESSAGE_NEW).await;
    assert_eq!(sent.payload["status"], "Sent");

    // 重新上线后通过 REST 拉取历史
    let app = build_router(state.clone());
    let request = Request::builder()
        .method(Method::GET)
        .uri(format!("/messages/conversations/{}/messages", conversation_id))
        .header(AUTHORIZATION, format!("Bearer {}", token(MANAGER, "manager")))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let page: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(page["messages"][0]["id"], sent.payload["id"]);
    assert_eq!(page["messages"][0]["content"], "are you there?");
    assert_eq!(page["messages"][0]["status"], "Read");
}

#[tokio::test]
async fn test_rest_send_is_broadcast_to_room() {
    let (addr, state) = start_server().await;
    let conversation_id = new_conversation(&state).await;
    let mut tenant = connect_as(addr, TENANT, "tenant").await;
    join(&mut tenant, conversation_id).await;

    let app = build_router(state.clone());
    let request = Request::builder()
        .method(Method::POST)
        .uri("/messages/send")
        .header(AUTHORIZATION, format!("Bearer {}", token(MANAGER, "manager")))
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "conversationId": conversation_id, "content": "via rest" }).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let pushed = expect_event(&mut tenant, MESSAGE_NEW).await;
    assert_eq!(pushed.payload["content"], "via rest");
    assert_eq!(pushed.payload["senderRole"], UserRole::Manager.as_str());
}

#[tokio::test]
async fn test_outsider_cannot_join_or_send() {
    let (addr, state) = start_server().await;
    let conversation_id = new_conversation(&state).await;
    let mut outsider = connect_as(addr, "tenant-X", "tenant").await;

    emit(&mut outsider, CONVERSATION_JOIN, json!({ "conversationId": conversation_id })).await;
    let error = expect_event(&mut outsider, MESSAGE_ERROR).await;
    assert_eq!(error.payload["error"], "Access denied");

    emit(&mut outsider, MESSAGE_SEND, json!({ "conversationId": conversation_id, "content": "sneaky" })).await;
    let error = expect_event(&mut outsider, MESSAGE_ERROR).await;
    assert_eq!(error.payload["error"], "Access denied");

    let page = state.store.list_messages(conversation_id, TENANT, None, 10).await.unwrap();
    assert!(page.messages.is_empty());
}

#[tokio::test]
async fn test_typing_and_read_receipts_reach_the_other_party() {
    let (addr, state) = start_server().await;
    let conversation_id = new_conversation(&state).await;
    let mut tenant = connect_as(addr, TENANT, "tenant").await;
    let mut manager = connect_as(addr, MANAGER, "manager").await;
    join(&mut tenant, conversation_id).await;
    join(&mut manager, conversation_id).await;

    emit(&mut tenant, TYPING_START, json!({ "conversationId": conversation_id, "receiverId": MANAGER })).await;
    let typing = expect_event(&mut manager, TYPING_UPDATE).await;
    assert_eq!(typing.payload["userId"], TENANT);
    assert_eq!(typing.payload["isTyping"], true);

    emit(&mut tenant, MESSAGE_SEND, json!({ "conversationId": conversation_id, "content": "read me" })).await;
    let message = expect_event(&mut manager, MESSAGE_NEW).await;
    let message_id = message.payload["id"].as_i64().unwrap();

    emit(
        &mut manager,
        MESSAGES_READ,
        json!({ "conversationId": conversation_id, "messageIds": [message_id] }),
    )
    .await;
    let receipt = expect_event(&mut tenant, MESSAGES_READ_UPDATE).await;
    assert_eq!(receipt.payload["messageIds"], json!([message_id]));
    assert_eq!(receipt.payload["readBy"], MANAGER);
    assert_eq!(state.store.unread_count(MANAGER, UserRole::Manager).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ws_sends_are_broadcast_in_id_order() {
    let (addr, state, first_committed) = start_slow_server().await;
    let conversation_id = new_conversation(&state).await;
    let mut tenant = connect_as(addr, TENANT, "tenant").await;
    let mut manager = connect_as(addr, MANAGER, "manager").await;
    join(&mut tenant, conversation_id).await;
    join(&mut manager, conversation_id).await;

    emit(&mut tenant, MESSAGE_SEND, json!({ "conversationId": conversation_id, "content": "first" })).await;
    // "first" 已经写入但尚未广播时发送第二条
    timeout(Duration::from_secs(5), first_committed.notified()).await.unwrap();
    emit(&mut manager, MESSAGE_SEND, json!({ "conversationId": conversation_id, "content": "second" })).await;

    for observer in [&mut tenant, &mut manager] {
        let received = collect_new_messages(observer, 2).await;
        assert!(received[0].0 < received[1].0, "广播顺序与消息 ID 顺序不一致: {:?}", received);
        assert_eq!(received[0].1, "first");
        assert_eq!(received[1].1, "second");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rest_send_waits_for_pending_ws_broadcast() {
    let (addr, state, first_committed) = start_slow_server().await;
    let conversation_id = new_conversation(&state).await;
    let mut tenant = connect_as(addr, TENANT, "tenant").await;
    join(&mut tenant, conversation_id).await;

    emit(&mut tenant, MESSAGE_SEND, json!({ "conversationId": conversation_id, "content": "first" })).await;
    timeout(Duration::from_secs(5), first_committed.notified()).await.unwrap();

    let app = build_router(state.clone());
    let request = Request::builder()
        .method(Method::POST)
        .uri("/messages/send")
        .header(AUTHORIZATION, format!("Bearer {}", token(MANAGER, "manager")))
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "conversationId": conversation_id, "content": "second" }).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let received = collect_new_messages(&mut tenant, 2).await;
    assert!(received[0].0 < received[1].0, "广播顺序与消息 ID 顺序不一致: {:?}", received);
    assert_eq!(received[0].1, "first");
    assert_eq!(received[1].1, "second");
}

#[tokio::test]
async fn test_shutdown_signal_closes_connections_and_stops_server() {
    init_test_logger();
    let state = AppState::from_config(test_config());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (trigger, signal) = oneshot::channel::<()>();
    let server = tokio::spawn(service::serve_with_shutdown(
        listener,
        state.clone(),
        async {
            let _ = signal.await;
        },
        Duration::from_secs(2),
    ));

    let mut tenant = connect_as(addr, TENANT, "tenant").await;
    trigger.send(()).unwrap();

    // 服务端主动关闭现有连接
    let closed = timeout(Duration::from_secs(5), async {
        loop {
            match receive_message(&mut tenant.ws_receiver).await {
                None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "关闭信号后连接未被断开");

    let result = timeout(Duration::from_secs(5), server).await.expect("服务未在宽限期内退出").unwrap();
    assert!(result.is_ok());
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}
