pub mod client;
pub mod relay;
pub mod router;
pub mod transport;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{ChatMessage, ParticipantStatus, PresentedOffer};

pub use client::SignalingClient;
pub use router::RoomRouter;
pub use transport::{LocalHub, SignalTransport, TransportLink, WebSocketTransport};

/// Envelope carried by the relay: `{type, senderId, payload, targetId?}`.
/// The relay routes on `targetId` and never inspects `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
}

/// Reply payload for accept / decline / minimize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferReply {
    pub offer_id: String,
    pub guest_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Every event the call room exchanges over signaling, each with a fixed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum SignalEvent {
    RecordingStarted {},
    RecordingStopped {},
    AdmitParticipant { status: ParticipantStatus },
    OfferPresented(PresentedOffer),
    #[serde(rename_all = "camelCase")]
    OfferDismissed { offer_id: Option<String> },
    OfferAccepted(OfferReply),
    OfferDeclined(OfferReply),
    OfferMinimized(OfferReply),
    ChatMessage(ChatMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    RecordingStarted,
    RecordingStopped,
    AdmitParticipant,
    OfferPresented,
    OfferDismissed,
    OfferAccepted,
    OfferDeclined,
    OfferMinimized,
    ChatMessage,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::RecordingStarted => "recording-started",
            SignalKind::RecordingStopped => "recording-stopped",
            SignalKind::AdmitParticipant => "admit-participant",
            SignalKind::OfferPresented => "offer-presented",
            SignalKind::OfferDismissed => "offer-dismissed",
            SignalKind::OfferAccepted => "offer-accepted",
            SignalKind::OfferDeclined => "offer-declined",
            SignalKind::OfferMinimized => "offer-minimized",
            SignalKind::ChatMessage => "chat-message",
        }
    }
}

impl SignalEvent {
    pub fn kind(&self) -> SignalKind {
        match self {
            SignalEvent::RecordingStarted {} => SignalKind::RecordingStarted,
            SignalEvent::RecordingStopped {} => SignalKind::RecordingStopped,
            SignalEvent::AdmitParticipant { .. } => SignalKind::AdmitParticipant,
            SignalEvent::OfferPresented(_) => SignalKind::OfferPresented,
            SignalEvent::OfferDismissed { .. } => SignalKind::OfferDismissed,
            SignalEvent::OfferAccepted(_) => SignalKind::OfferAccepted,
            SignalEvent::OfferDeclined(_) => SignalKind::OfferDeclined,
            SignalEvent::OfferMinimized(_) => SignalKind::OfferMinimized,
            SignalEvent::ChatMessage(_) => SignalKind::ChatMessage,
        }
    }

    pub fn to_wire(
        &self,
        sender_id: &str,
        target_id: Option<&str>,
    ) -> Result<WireMessage, serde_json::Error> {
        let mut tagged = serde_json::to_value(self)?;
        let payload = tagged
            .get_mut("payload")
            .map(Value::take)
            .unwrap_or_else(|| Value::Object(Default::default()));
        Ok(WireMessage {
            kind: self.kind().as_str().to_string(),
            sender_id: sender_id.to_string(),
            payload,
            target_id: target_id.map(str::to_string),
        })
    }

    pub fn from_wire(msg: &WireMessage) -> Result<Self, serde_json::Error> {
        let payload = match &msg.payload {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        serde_json::from_value(serde_json::json!({ "type": msg.kind, "payload": payload }))
    }
}

/// A received signal as handed to registered handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub sender_id: String,
    pub event: SignalEvent,
}

/// Exponential backoff for transport reconnects.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(10),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (0-based), with up to 20% jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        use rand::Rng;
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        let base = self.base.saturating_mul(factor).min(self.max);
        let jitter_ms = (base.as_millis() as u64) / 5;
        let jitter = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        (base + Duration::from_millis(jitter)).min(self.max)
    }
}
