use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::media::MediaStream;

// ============================================================
// Participants
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Host,
    TeamMember,
    Guest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Invited,
    Waiting,
    Admitted,
    InCall,
    Left,
    Denied,
}

impl ParticipantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantStatus::Invited => "invited",
            ParticipantStatus::Waiting => "waiting",
            ParticipantStatus::Admitted => "admitted",
            ParticipantStatus::InCall => "in_call",
            ParticipantStatus::Left => "left",
            ParticipantStatus::Denied => "denied",
        }
    }

    /// In the call (or admitted and about to be).
    pub fn is_present(&self) -> bool {
        matches!(self, ParticipantStatus::Admitted | ParticipantStatus::InCall)
    }

    /// Left and denied are never reused; such participants drop off the roster.
    pub fn is_removed(&self) -> bool {
        matches!(self, ParticipantStatus::Left | ParticipantStatus::Denied)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Participant {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub role: ParticipantRole,
    pub status: ParticipantStatus,
    #[serde(skip)]
    pub stream: Option<MediaStream>,
    pub is_muted: bool,
    pub is_camera_off: bool,
}

impl Participant {
    pub fn from_record(record: &ParticipantRecord) -> Self {
        Self {
            id: record.id.clone(),
            user_id: record.user_id.clone(),
            display_name: record.display_name(),
            email: record.guest_email.clone(),
            avatar_url: record.avatar_url.clone(),
            role: record.role,
            status: record.status,
            stream: None,
            is_muted: false,
            is_camera_off: false,
        }
    }
}

/// Participant row as returned by `GET /calls/{roomCode}/participants`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default, alias = "name")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub guest_name: Option<String>,
    #[serde(default)]
    pub guest_email: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub role: ParticipantRole,
    pub status: ParticipantStatus,
}

impl ParticipantRecord {
    pub fn display_name(&self) -> String {
        self.display_name
            .clone()
            .or_else(|| self.guest_name.clone())
            .unwrap_or_else(|| "Guest".to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterParticipant {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_email: Option<String>,
    pub role: ParticipantRole,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterResponse {
    pub id: String,
}

// ============================================================
// Transcript
// ============================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptChunk {
    pub id: String,
    pub speaker_label: String,
    pub content: String,
    /// Seconds since the call started.
    pub timestamp_start: f64,
    pub is_flagged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag_note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl TranscriptChunk {
    pub fn is_interim(&self) -> bool {
        self.id == crate::transcription::INTERIM_CHUNK_ID
    }
}

/// Body of `POST /calls/{roomCode}/transcripts`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptRecord {
    pub participant_id: String,
    pub speaker_label: String,
    pub content: String,
    pub timestamp_start: f64,
    pub confidence: Option<f32>,
}

// ============================================================
// Guidance
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuidanceType {
    Question,
    ObjectionResponse,
    OfferTrigger,
    SentimentAlert,
    PhaseTransition,
    Closing,
    Opening,
    #[serde(other)]
    General,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuidanceItem {
    pub id: String,
    pub guidance_type: GuidanceType,
    pub content: String,
    pub framework_phase: Option<String>,
    pub framework_step: Option<String>,
    pub was_used: bool,
    pub was_dismissed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuidanceRequest {
    pub transcript_turn: String,
    pub speaker_label: String,
}

/// Response of `POST /calls/{roomCode}/guidance`. The service mixes
/// snake_case and camelCase field names, so both are accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GuidanceResponse {
    #[serde(default)]
    pub skip: Option<bool>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "guidanceType")]
    pub guidance_type: Option<GuidanceType>,
    #[serde(default, alias = "frameworkPhase")]
    pub framework_phase: Option<String>,
    #[serde(default, alias = "frameworkStep")]
    pub framework_step: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplatePhase {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub questions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateResponse {
    #[serde(default)]
    pub phases: Vec<TemplatePhase>,
}

// ============================================================
// Offers
// ============================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tier: Option<String>,
    pub price_display: String,
    pub price: f64,
    pub currency: String,
    #[serde(default)]
    pub billing_frequency: Option<String>,
    #[serde(default)]
    pub deliverables: Vec<String>,
    #[serde(default)]
    pub value_propositions: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// Host-local price edit applied when an offer is presented. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceOverride {
    pub price: f64,
    pub price_display: String,
}

/// The offer as sent to attendees, with any live price override applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentedOffer {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tier: Option<String>,
    pub price_display: String,
    pub price: f64,
    pub currency: String,
    #[serde(default)]
    pub billing_frequency: Option<String>,
    #[serde(default)]
    pub deliverables: Vec<String>,
    #[serde(default)]
    pub value_propositions: Vec<String>,
}

impl PresentedOffer {
    pub fn project(offer: &Offer, price: Option<&PriceOverride>) -> Self {
        let (price, price_display) = match price {
            Some(o) => (o.price, o.price_display.clone()),
            None => (offer.price, offer.price_display.clone()),
        };
        Self {
            id: offer.id.clone(),
            name: offer.name.clone(),
            description: offer.description.clone(),
            tier: offer.tier.clone(),
            price_display,
            price,
            currency: offer.currency.clone(),
            billing_frequency: offer.billing_frequency.clone(),
            deliverables: offer.deliverables.clone(),
            value_propositions: offer.value_propositions.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferResponseStatus {
    Pending,
    Accepted,
    Declined,
    Minimized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferResponse {
    pub participant_name: String,
    pub status: OfferResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Which CRM side-effect endpoint an [`OfferNotice`] goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferNoticeKind {
    Presented,
    Accepted,
    Declined,
}

impl OfferNoticeKind {
    pub fn path_segment(&self) -> &'static str {
        match self {
            OfferNoticeKind::Presented => "offer-presented",
            OfferNoticeKind::Accepted => "offer-accepted",
            OfferNoticeKind::Declined => "offer-declined",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferNotice {
    #[serde(skip)]
    pub kind: OfferNoticeKind,
    pub offer_id: String,
    pub participant_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

// ============================================================
// Chat / recording / view
// ============================================================

/// Ephemeral in-call chat line. Lives only as long as the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    #[default]
    Idle,
    Recording,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SidePanel {
    #[default]
    Copilot,
    Attendees,
    Transcript,
    Offers,
    Chat,
}
