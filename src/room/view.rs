use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use super::CallRoom;
use crate::media::MediaState;
use crate::models::{
    ChatMessage, GuidanceItem, OfferResponse, Participant, ParticipantRole, ParticipantStatus,
    PresentedOffer, RecordingState, SidePanel, TemplatePhase, TranscriptChunk,
};

/// Snapshot of everything the call screen renders.
#[derive(Debug, Clone, Serialize)]
pub struct RoomView {
    pub room_code: String,
    pub participant_id: String,
    pub role: ParticipantRole,
    pub local_status: Option<ParticipantStatus>,
    pub call_active: bool,
    pub elapsed_secs: u64,
    /// Remote video tiles.
    pub participants: Vec<Participant>,
    pub waiting: Vec<Participant>,
    pub active_panel: SidePanel,
    pub media: MediaState,
    pub media_error: Option<String>,
    pub signaling_degraded: bool,
    pub recording_state: RecordingState,
    /// Someone else is recording this call.
    pub remote_recording: bool,
    pub presented_offer_id: Option<String>,
    pub offer_responses: HashMap<String, HashMap<String, OfferResponse>>,
    pub incoming_offer: Option<PresentedOffer>,
    pub offer_minimized: bool,
    pub guidance: Vec<GuidanceItem>,
    pub template_phases: Vec<TemplatePhase>,
    /// Final transcript chunks, shared with the log until it next changes.
    pub transcript: Arc<Vec<TranscriptChunk>>,
    pub interim_transcript: Option<TranscriptChunk>,
    pub chat: Arc<Vec<ChatMessage>>,
    pub saving: bool,
    pub summary_path: Option<String>,
}

impl RoomView {
    pub(super) fn initial(room_code: &str, participant_id: &str, role: ParticipantRole) -> Self {
        Self {
            room_code: room_code.to_string(),
            participant_id: participant_id.to_string(),
            role,
            local_status: None,
            call_active: false,
            elapsed_secs: 0,
            participants: Vec::new(),
            waiting: Vec::new(),
            active_panel: SidePanel::default(),
            media: MediaState::default(),
            media_error: None,
            signaling_degraded: false,
            recording_state: RecordingState::Idle,
            remote_recording: false,
            presented_offer_id: None,
            offer_responses: HashMap::new(),
            incoming_offer: None,
            offer_minimized: false,
            guidance: Vec::new(),
            template_phases: Vec::new(),
            transcript: Arc::default(),
            interim_transcript: None,
            chat: Arc::default(),
            saving: false,
            summary_path: None,
        }
    }
}

pub(super) fn build(room: &CallRoom) -> RoomView {
    let (transcript, interim_transcript) = {
        let log = room.transcript.lock().unwrap_or_else(|e| e.into_inner());
        (log.shared_finals(), log.interim().cloned())
    };

    RoomView {
        room_code: room.room_code.clone(),
        participant_id: room.participant_id().to_string(),
        role: room.role,
        local_status: room.roster.local_status(),
        call_active: room.call_active,
        elapsed_secs: room.elapsed_secs,
        participants: room.roster.remote_tiles().into_iter().cloned().collect(),
        waiting: room.roster.waiting().into_iter().cloned().collect(),
        active_panel: room.active_panel,
        media: room.media.state(),
        media_error: room.media_error.as_ref().map(ToString::to_string),
        signaling_degraded: room.signaling_degraded,
        recording_state: room.recording_state,
        remote_recording: room.remote_recording,
        presented_offer_id: room.presenter.presented_offer_id().map(str::to_string),
        offer_responses: room.presenter.all_responses().clone(),
        incoming_offer: room.inbox.current().cloned(),
        offer_minimized: room.inbox.is_minimized(),
        guidance: room.guidance_items.clone(),
        template_phases: room.template_phases.clone(),
        transcript,
        interim_transcript,
        chat: room.chat.shared(),
        saving: room.saving,
        summary_path: room.ended.as_ref().map(|r| r.path.clone()),
    }
}
