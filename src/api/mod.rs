mod http;

use async_trait::async_trait;

use crate::error::ApiError;
use crate::models::{
    GuidanceRequest, GuidanceResponse, OfferNotice, ParticipantRecord, ParticipantStatus,
    RegisterParticipant, TemplatePhase, TranscriptRecord,
};
use crate::recorder::RecordingBlob;

pub use http::HttpCallApi;

/// REST collaborator for one deployment. Every method is a single request;
/// callers decide whether a failure matters (almost always it does not).
#[async_trait]
pub trait CallApi: Send + Sync {
    /// `POST /calls/{room}/participants`, returns the new participant id.
    async fn register_participant(
        &self,
        room_code: &str,
        body: &RegisterParticipant,
    ) -> Result<String, ApiError>;

    async fn list_participants(&self, room_code: &str) -> Result<Vec<ParticipantRecord>, ApiError>;

    async fn update_participant_status(
        &self,
        room_code: &str,
        participant_id: &str,
        status: ParticipantStatus,
    ) -> Result<(), ApiError>;

    async fn save_transcript(&self, room_code: &str, record: &TranscriptRecord) -> Result<(), ApiError>;

    async fn request_guidance(
        &self,
        room_code: &str,
        request: &GuidanceRequest,
    ) -> Result<GuidanceResponse, ApiError>;

    /// Kicks off post-call processing on the server.
    async fn end_call(&self, room_code: &str) -> Result<(), ApiError>;

    /// CRM side effect for an offer being presented, accepted or declined.
    async fn notify_offer(&self, room_code: &str, notice: &OfferNotice) -> Result<(), ApiError>;

    async fn upload_recording(&self, room_code: &str, blob: &RecordingBlob) -> Result<(), ApiError>;

    async fn fetch_template(&self, template_id: &str) -> Result<Vec<TemplatePhase>, ApiError>;
}
