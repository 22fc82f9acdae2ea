// rust_websocket_utils/src/client/transport.rs

//! 客户端 WebSocket 传输层核心逻辑。
//!
//! 提供连接消息服务、发送和接收 `WsMessage` 的能力。握手时可以携带
//! `Authorization: Bearer <token>` 请求头，服务端据此完成身份校验。

use log::{debug, error, info};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue},
        protocol::Message,
        Error as TungsteniteError,
    },
    WebSocketStream,
};
use url::Url;
use crate::error::WsError;
use crate::message::WsMessage;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt,
    StreamExt,
};

/// 客户端连接成功后得到的 WebSocket 流类型。
pub type ClientWsStream = WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// 一个活动的客户端 WebSocket 连接。
pub struct ClientConnection {
    pub ws_sender: SplitSink<ClientWsStream, Message>,
    /// 设为 `pub` 以便调用方在循环中直接把它交给 [`receive_message`]。
    pub ws_receiver: SplitStream<ClientWsStream>,
}

impl ClientConnection {
    /// 向服务端发送一个 `WsMessage`。
    pub async fn send_message(&mut self, message: &WsMessage) -> Result<(), WsError> {
        let msg_json = message.to_text()?;
        debug!("客户端：准备发送消息: {}", msg_json);
        self.ws_sender.send(Message::Text(msg_json)).await?;
        Ok(())
    }

    /// 主动关闭连接。
    pub async fn close(&mut self) -> Result<(), WsError> {
        self.ws_sender.send(Message::Close(None)).await?;
        Ok(())
    }
}

/// 连接到指定的 WebSocket 服务器。
///
/// # Arguments
/// * `url_str` - 完整的 WebSocket URL，例如 `ws://127.0.0.1:3002/ws`。
/// * `bearer_token` - 若提供，则作为 `Authorization: Bearer` 请求头随握手发送。
///
/// # Returns
/// 握手被服务端拒绝（例如 HTTP 401）时返回 `WsError::WebSocketProtocolError`。
pub async fn connect_client(url_str: String, bearer_token: Option<&str>) -> Result<ClientConnection, WsError> {
    info!("客户端：开始尝试连接到 WebSocket 服务器，URL: {}", url_str);
    let parsed_url = Url::parse(&url_str)
        .map_err(|e| WsError::InvalidUrl(format!("无效的 WebSocket URL '{}': {}", url_str, e)))?;

    let mut request = parsed_url.as_str().into_client_request()?;
    if let Some(token) = bearer_token {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| WsError::InvalidHeader(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    match connect_async(request).await {
        Ok((ws_stream, response)) => {
            info!("客户端：已成功连接到 {} (HTTP 状态码: {})", url_str, response.status());
            let (ws_sender, ws_receiver) = ws_stream.split();
            Ok(ClientConnection { ws_sender, ws_receiver })
        }
        Err(e) => {
            error!("客户端：连接到 {} 失败，错误: {}", url_str, e);
            Err(WsError::WebSocketProtocolError(e))
        }
    }
}

/// 从接收流中读取下一条 `WsMessage`。
///
/// Ping / Pong 等控制帧由底层库自动应答，这里直接跳过。
///
/// # Returns
/// - `Some(Ok(ws_message))`：成功接收并解析。
/// - `Some(Err(ws_error))`：解析失败、收到二进制帧或底层出错。
/// - `None`：连接已关闭。
pub async fn receive_message(
    ws_receiver: &mut SplitStream<ClientWsStream>,
) -> Option<Result<WsMessage, WsError>> {
    loop {
        match ws_receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                debug!("客户端：收到原始文本消息，内容: '{}'", text);
                break Some(WsMessage::from_text(&text));
            }
            Some(Ok(Message::Binary(bin))) => {
                break Some(Err(WsError::UnexpectedFrame(format!(
                    "客户端收到了非预期的二进制消息 (长度 {} 字节)",
                    bin.len()
                ))));
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
            Some(Ok(Message::Close(close_frame))) => {
                debug!("客户端：收到 Close 控制帧，详细信息: {:?}", close_frame);
                break None;
            }
            Some(Err(TungsteniteError::ConnectionClosed)) | Some(Err(TungsteniteError::AlreadyClosed)) => {
                debug!("客户端：连接已关闭。");
                break None;
            }
            Some(Err(e)) => {
                error!("客户端：从 WebSocket 流接收消息时发生底层错误: {}", e);
                break Some(Err(WsError::WebSocketProtocolError(e)));
            }
            None => {
                debug!("客户端：WebSocket 接收流已结束。");
                break None;
            }
        }
    }
}
