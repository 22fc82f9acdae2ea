// chat_service/src/ws_server/service.rs

//! 服务启动与 WebSocket 连接生命周期。
//!
//! 握手阶段先校验 token（有超时），失败直接返回 HTTP 401，不会升级连接。
//! 升级成功后每个连接有两个任务：发送任务消费出站队列并定期发送 Ping，
//! 接收循环解析客户端事件并交给消息路由。连接结束时由 [`SessionGuard`] 完成清理。

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocket, ConnectInfo, Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use log::{debug, error, info, warn};
use rust_websocket_utils::{
    error::WsError,
    message::WsMessage,
    server::transport::{receive_message, split_socket, ServerFrame},
};
use chat_models::ws_payloads::ServerEvent;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

use crate::api;
use crate::auth::{bearer_token, AuthenticatedUser};
use crate::error::AppError;
use crate::state::AppState;
use crate::ws_server::client_session::ClientSession;
use crate::ws_server::message_router;

/// HTTP + WebSocket 服务，封装共享状态。
pub struct WsService {
    state: AppState,
}

impl WsService {
    pub fn new(state: AppState) -> Self {
        info!("[WsService] New instance created.");
        Self { state }
    }

    /// 绑定配置中的地址并开始服务，直到收到 SIGINT / SIGTERM 或出错。
    pub async fn start(&self) -> Result<()> {
        let listen_addr = self.state.config.listen_addr();
        info!("[WsService] Starting service on {} ...", listen_addr);
        let listener = TcpListener::bind(&listen_addr)
            .await
            .with_context(|| format!("无法绑定监听地址 {}", listen_addr))?;
        let grace = Duration::from_secs(self.state.config.server.shutdown_grace_seconds);
        serve_with_shutdown(listener, self.state.clone(), shutdown_signal(), grace).await
    }
}

/// 在已绑定的监听器上运行 REST 与 WebSocket 路由，直到出错。测试使用 `127.0.0.1:0` 调用它。
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    serve_with_shutdown(listener, state, std::future::pending(), Duration::MAX).await
}

/// 运行服务，`shutdown` 完成后开始优雅退出。
///
/// 退出时先要求所有 WebSocket 连接关闭，再等待进行中的请求结束；超过 `grace` 仍未结束则直接返回。
pub async fn serve_with_shutdown<F>(listener: TcpListener, state: AppState, shutdown: F, grace: Duration) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener.local_addr().context("无法获取监听地址")?;
    info!("[WsService] Listening on {}", local_addr);
    let app = api::build_router(state.clone());

    let (shutdown_started_tx, mut shutdown_started_rx) = watch::channel(false);
    let connection_manager = Arc::clone(&state.connection_manager);
    let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            shutdown.await;
            let sessions = connection_manager.all_sessions();
            info!("[WsService] 开始优雅退出，关闭 {} 个 WebSocket 连接。", sessions.len());
            for session in &sessions {
                session.request_close();
            }
            let _ = shutdown_started_tx.send(true);
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        biased;
        result = &mut server => return result.context("HTTP/WebSocket 服务异常退出"),
        _ = shutdown_started_rx.wait_for(|started| *started) => {}
    }

    match tokio::time::timeout(grace, &mut server).await {
        Ok(result) => {
            info!("[WsService] 服务已正常退出。");
            result.context("HTTP/WebSocket 服务异常退出")
        }
        Err(_) => {
            warn!("[WsService] {:?} 内未能处理完剩余请求，强制退出。", grace);
            Ok(())
        }
    }
}

/// 等待 SIGINT（Ctrl+C）或 SIGTERM。
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("[WsService] 无法监听 SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("[WsService] 无法监听 SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("[WsService] 收到 SIGINT。"),
        _ = terminate => info!("[WsService] 收到 SIGTERM。"),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct WsConnectQuery {
    /// 浏览器 WebSocket API 无法设置请求头，因此也接受查询参数中的 token。
    pub token: Option<String>,
}

/// `GET /ws`：校验 token 后升级为 WebSocket。
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsConnectQuery>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    ws: WebSocketUpgrade,
) -> Response {
    let addr = connect_info.map(|ConnectInfo(addr)| addr);
    let token = bearer_token(&headers)
        .map(str::to_string)
        .or_else(|| query.token.filter(|t| !t.trim().is_empty()));
    let Some(token) = token else {
        warn!("[WsService] 来自 {:?} 的握手缺少 token，拒绝连接。", addr);
        return AppError::Unauthorized("No token provided".to_string()).into_response();
    };

    let handshake_timeout = Duration::from_millis(state.config.websocket.handshake_timeout_ms);
    let user = match tokio::time::timeout(handshake_timeout, state.verifier.verify(&token)).await {
        Ok(Ok(user)) => user,
        Ok(Err(e)) => {
            warn!("[WsService] 来自 {:?} 的握手鉴权失败: {}", addr, e);
            return AppError::Unauthorized(e.client_message()).into_response();
        }
        Err(_) => {
            warn!("[WsService] 来自 {:?} 的握手鉴权超时 ({:?})。", addr, handshake_timeout);
            return AppError::Unauthorized("Authentication timed out".to_string()).into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, user, addr))
}

/// 连接结束时的清理。放在 `Drop` 中，保证任何退出路径（包括处理过程中 panic）都会执行。
struct SessionGuard {
    state: AppState,
    session: Arc<ClientSession>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let session = &self.session;
        session.request_close();
        let left_rooms = self.state.room_manager.leave_all(session.client_id);
        self.state.typing_state.clear_user(&session.user_id);
        let went_offline = self
            .state
            .connection_manager
            .unregister(&session.user_id, session.client_id);
        info!(
            "[WsService] SessionID {}: 清理完成 (用户: {}, 离开房间: {:?}, 已离线: {})",
            session.client_id, session.user_id, left_rooms, went_offline
        );
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, user: AuthenticatedUser, addr: Option<SocketAddr>) {
    let (tx_to_client_session, mut rx_from_client_session) =
        mpsc::channel::<WsMessage>(state.config.websocket.outbound_queue_capacity);
    let client_session = Arc::new(ClientSession::new(user, addr, tx_to_client_session));
    let _guard = SessionGuard {
        state: state.clone(),
        session: Arc::clone(&client_session),
    };
    state.connection_manager.register(Arc::clone(&client_session));
    info!(
        "[WsService] New client connected: SessionID={}, User={}, Role={}, Addr={:?}",
        client_session.client_id, client_session.user_id, client_session.role, addr
    );

    let (mut ws_conn_handler, mut ws_receiver) = split_socket(socket);
    let ping_interval = Duration::from_secs(state.config.websocket.heartbeat_check_interval_seconds);
    let client_session_for_sender_task = Arc::clone(&client_session);

    let sender_task_join_handle = tokio::spawn(async move {
        let session = client_session_for_sender_task;
        let mut ping_timer = tokio::time::interval(ping_interval);
        ping_timer.tick().await;
        loop {
            tokio::select! {
                _ = session.closed() => break,
                maybe_msg_to_send = rx_from_client_session.recv() => {
                    let Some(ws_msg_to_send) = maybe_msg_to_send else { break };
                    debug!("[SenderTask {}] Sending message: Type={}", session.client_id, ws_msg_to_send.message_type);
                    if let Err(e) = ws_conn_handler.send_message(&ws_msg_to_send).await {
                        warn!("[SenderTask {}] 发送失败，连接可能已断开: {}", session.client_id, e);
                        break;
                    }
                }
                _ = ping_timer.tick() => {
                    if ws_conn_handler.send_ping().await.is_err() {
                        break;
                    }
                }
            }
        }
        session.request_close();
        ws_conn_handler.close().await;
        debug!("[SenderTask {}] Sender task fully ended.", session.client_id);
    });

    loop {
        tokio::select! {
            _ = client_session.closed() => {
                info!("[WsService] SessionID {}: Close requested, terminating connection handling.", client_session.client_id);
                break;
            }
            frame = receive_message(&mut ws_receiver) => match frame {
                Some(Ok(ServerFrame::Message(ws_msg))) => {
                    if let Err(e) = message_router::handle_message(Arc::clone(&client_session), ws_msg, &state).await {
                        error!("[WsService] SessionID {}: Error handling message: {:#}", client_session.client_id, e);
                    }
                }
                Some(Ok(ServerFrame::Heartbeat)) => client_session.touch().await,
                Some(Err(WsError::DeserializationError(e))) | Some(Err(WsError::UnexpectedFrame(e))) => {
                    warn!("[WsService] SessionID {}: 无法解析的消息: {}", client_session.client_id, e);
                    client_session.deliver(&ServerEvent::error("Invalid message format", None));
                }
                Some(Err(e)) => {
                    warn!("[WsService] SessionID {}: WebSocket error: {}. Disconnecting.", client_session.client_id, e);
                    break;
                }
                None => {
                    info!("[WsService] SessionID {}: Client connection closed by peer.", client_session.client_id);
                    break;
                }
            }
        }
    }

    client_session.request_close();
    if let Err(e) = sender_task_join_handle.await {
        error!("[WsService] SessionID {}: Sender task panicked: {:?}", client_session.client_id, e);
    }
}
