// chat_service/src/ws_server/mod.rs

//! WebSocket 服务端：连接会话、在线登记表、会话房间、输入状态、在线状态广播、
//! 事件路由、心跳监视以及连接生命周期。

pub mod client_session;
pub mod connection_manager;
pub mod heartbeat_monitor;
pub mod message_router;
pub mod presence;
pub mod room_manager;
pub mod service;
pub mod typing_state;
