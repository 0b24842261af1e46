use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::router::RoomRouter;
use super::WireMessage;
use crate::error::SignalingError;

/// One open connection to the relay. Dropping `outbound` closes it; `inbound`
/// yields `None` once the connection is gone.
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<WireMessage>,
    pub inbound: mpsc::UnboundedReceiver<WireMessage>,
}

/// Opens room-scoped connections for a signaling client.
#[async_trait]
pub trait SignalTransport: Send + Sync {
    async fn open(
        &self,
        room_code: &str,
        participant_id: &str,
    ) -> Result<TransportLink, SignalingError>;
}

/// In-process relay. Every client opened on the same hub shares one
/// [`RoomRouter`], so several call rooms can talk without a network.
#[derive(Clone, Default)]
pub struct LocalHub {
    router: RoomRouter,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn router(&self) -> &RoomRouter {
        &self.router
    }

    /// Cut a participant's connection as if the network dropped it.
    pub fn drop_connection(&self, room_code: &str, participant_id: &str) -> bool {
        self.router.evict(room_code, participant_id)
    }
}

#[async_trait]
impl SignalTransport for LocalHub {
    async fn open(
        &self,
        room_code: &str,
        participant_id: &str,
    ) -> Result<TransportLink, SignalingError> {
        let (session, inbound) = self.router.join(room_code, participant_id);
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<WireMessage>();

        let router = self.router.clone();
        let room = room_code.to_string();
        let pid = participant_id.to_string();
        tokio::spawn(async move {
            while let Some(mut msg) = outbound_rx.recv().await {
                msg.sender_id = pid.clone();
                router.route(&room, msg);
            }
            router.leave(&room, &pid, session);
        });

        Ok(TransportLink { outbound, inbound })
    }
}

/// WebSocket connection to a relay at `{base_url}/{roomCode}/{participantId}`.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    base_url: String,
}

impl WebSocketTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn endpoint(&self, room_code: &str, participant_id: &str) -> String {
        format!("{}/{}/{}", self.base_url, room_code, participant_id)
    }
}

#[async_trait]
impl SignalTransport for WebSocketTransport {
    async fn open(
        &self,
        room_code: &str,
        participant_id: &str,
    ) -> Result<TransportLink, SignalingError> {
        let url = self.endpoint(room_code, participant_id);
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| SignalingError::Connect(format!("{}: {}", url, e)))?;
        info!("Signaling websocket connected: {}", url);

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<WireMessage>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel::<WireMessage>();

        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                match serde_json::to_string(&msg) {
                    Ok(text) => {
                        if ws_write.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to encode {} signal: {}", msg.kind, e),
                }
            }
            let _ = ws_write.send(Message::Close(None)).await;
        });

        tokio::spawn(async move {
            while let Some(frame) = ws_read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<WireMessage>(text.as_str()) {
                        Ok(msg) => {
                            if inbound_tx.send(msg).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Ignoring malformed signaling frame: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Signaling websocket error: {}", e);
                        break;
                    }
                }
            }
            debug!("Signaling websocket reader finished");
        });

        Ok(TransportLink { outbound, inbound })
    }
}
