use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::frame::ServerFrame;
use crate::registry::OutboundSender;

pub type WebSocketStreamType = WebSocketStream<TcpStream>;

/// Per-socket state: the write half, the outbound channel registered for this
/// user, and the authenticated identity once the auth frame arrives.
pub struct ConnectionHandler {
    ws_sender: SplitSink<WebSocketStreamType, WsMessage>,
    tx: OutboundSender,
    pub connection_id: Uuid,
    user: Option<(Uuid, String)>,
    addr: SocketAddr,
}

impl ConnectionHandler {
    pub fn new(
        ws_sender: SplitSink<WebSocketStreamType, WsMessage>,
        tx: OutboundSender,
        addr: SocketAddr,
    ) -> Self {
        Self {
            ws_sender,
            tx,
            connection_id: Uuid::new_v4(),
            user: None,
            addr,
        }
    }

    pub async fn send_frame(&mut self, frame: &ServerFrame) -> Result<(), String> {
        let text = serde_json::to_string(frame)
            .map_err(|e| format!("Failed to serialize frame: {}", e))?;
        self.ws_sender
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| format!("Failed to send frame: {}", e))?;
        Ok(())
    }

    pub async fn send_error(&mut self, message: &str) {
        let frame = ServerFrame::Error {
            message: message.to_string(),
        };
        if self.send_frame(&frame).await.is_err() {
            tracing::debug!(addr = %self.addr, "Failed to send error to closed socket");
        }
    }

    pub fn authenticated(&self) -> Option<(Uuid, String)> {
        self.user.clone()
    }

    pub fn set_authenticated(&mut self, user_id: Uuid, username: String) {
        self.user = Some((user_id, username));
    }

    pub fn tx(&self) -> &OutboundSender {
        &self.tx
    }

    pub fn ws_sender_mut(&mut self) -> &mut SplitSink<WebSocketStreamType, WsMessage> {
        &mut self.ws_sender
    }
}
