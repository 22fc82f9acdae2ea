// rust_websocket_utils/src/server/transport.rs

//! 服务端 WebSocket 传输层：在 axum 升级后的 `WebSocket` 之上收发 `WsMessage`。
//!
//! 连接被拆分为发送端 (`ConnectionHandler`) 和接收流 (`ServerStream`)，
//! 这样发送可以交给独立的任务，接收循环不会被慢速写入阻塞。

use axum::extract::ws::{Message, WebSocket};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt,
    StreamExt,
};
use log::{debug, info};

use crate::error::WsError;
use crate::message::WsMessage;

/// 服务端接收流类型。
pub type ServerStream = SplitStream<WebSocket>;

/// 从客户端收到的一帧，经过解析后的结果。
#[derive(Debug)]
pub enum ServerFrame {
    /// 业务消息。
    Message(WsMessage),
    /// Ping / Pong 控制帧，只说明对端仍然存活。
    Heartbeat,
}

/// 持有连接发送端的处理器。
pub struct ConnectionHandler {
    ws_sender: SplitSink<WebSocket, Message>,
}

impl ConnectionHandler {
    /// 把 `WsMessage` 序列化为文本帧并发送。
    pub async fn send_message(&mut self, message: &WsMessage) -> Result<(), WsError> {
        let text = message.to_text()?;
        self.ws_sender.send(Message::Text(text)).await?;
        debug!("服务端：消息已发送 (类型: {}, ID: {})", message.message_type, message.message_id);
        Ok(())
    }

    /// 发送 Ping 控制帧，对端自动回复的 Pong 会作为 `ServerFrame::Heartbeat` 出现在接收流中。
    pub async fn send_ping(&mut self) -> Result<(), WsError> {
        self.ws_sender.send(Message::Ping(Vec::new())).await?;
        Ok(())
    }

    /// 发送 Close 帧并关闭发送端。错误被忽略，因为对端可能已经断开。
    pub async fn close(&mut self) {
        let _ = self.ws_sender.send(Message::Close(None)).await;
        let _ = self.ws_sender.close().await;
    }
}

/// 把升级后的 WebSocket 拆分为发送处理器和接收流。
pub fn split_socket(socket: WebSocket) -> (ConnectionHandler, ServerStream) {
    let (ws_sender, ws_receiver) = socket.split();
    (ConnectionHandler { ws_sender }, ws_receiver)
}

/// 从接收流中读取下一帧。
///
/// # Returns
/// - `Some(Ok(ServerFrame::Message(_)))`：收到并解析了一条文本消息。
/// - `Some(Ok(ServerFrame::Heartbeat))`：收到 Ping 或 Pong。
/// - `Some(Err(_))`：文本无法解析、收到二进制帧，或底层连接出错。
/// - `None`：对端关闭了连接。
pub async fn receive_message(ws_receiver: &mut ServerStream) -> Option<Result<ServerFrame, WsError>> {
    match ws_receiver.next().await {
        Some(Ok(Message::Text(text))) => Some(WsMessage::from_text(&text).map(ServerFrame::Message)),
        Some(Ok(Message::Binary(bin))) => Some(Err(WsError::UnexpectedFrame(format!(
            "服务端不接受二进制帧 (长度 {} 字节)",
            bin.len()
        )))),
        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => Some(Ok(ServerFrame::Heartbeat)),
        Some(Ok(Message::Close(close_frame))) => {
            info!("服务端：收到 Close 控制帧: {:?}", close_frame);
            None
        }
        Some(Err(e)) => Some(Err(WsError::ServerConnectionError(e))),
        None => None,
    }
}
