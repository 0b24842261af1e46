use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{
    ChatMessage, GuidanceItem, OfferResponse, ParticipantStatus, PresentedOffer, RecordingState,
    SidePanel, TranscriptChunk,
};

/// Things the presentation layer reacts to, emitted by the call room.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum CallEvent {
    // Roster
    ParticipantsChanged { count: usize },
    WaitingRoomGrew { waiting: usize },
    PanelChanged(SidePanel),
    LocalStatusChanged(ParticipantStatus),
    // Copilot
    TranscriptUpdated(TranscriptChunk),
    GuidanceAdded(GuidanceItem),
    // Offers
    OfferPresented { offer_id: String, targets: Vec<String> },
    OfferReceived(PresentedOffer),
    OfferDismissed { offer_id: Option<String> },
    OfferResponse { offer_id: String, participant_id: String, response: OfferResponse },
    // Chat / recording
    ChatReceived(ChatMessage),
    RecordingStateChanged(RecordingState),
    RemoteRecording { active: bool },
    // Degradation
    MediaError { message: String },
    SignalingDegraded { reason: String },
    // End of call
    Saving(bool),
    NavigateToSummary { path: String },
}

pub type EventSender = broadcast::Sender<CallEvent>;
pub type EventReceiver = broadcast::Receiver<CallEvent>;

pub fn create_event_bus() -> (EventSender, EventReceiver) {
    broadcast::channel(256)
}
