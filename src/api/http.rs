use async_trait::async_trait;
use reqwest::{header, Client, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use super::CallApi;
use crate::error::ApiError;
use crate::models::{
    GuidanceRequest, GuidanceResponse, OfferNotice, ParticipantRecord, ParticipantStatus,
    RegisterParticipant, RegisterResponse, TemplatePhase, TemplateResponse, TranscriptRecord,
};
use crate::recorder::RecordingBlob;

/// [`CallApi`] over HTTP/JSON. No request timeouts are set; a hung request
/// only leaves its own caller waiting.
#[derive(Clone)]
pub struct HttpCallApi {
    base_url: String,
    client: Client,
}

impl HttpCallApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn check(response: Response, path: &str) -> Result<Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }
        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(response: Response, path: &str) -> Result<T, ApiError> {
        let response = Self::check(response, path)?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(format!("{}: {}", path, e)))
    }
}

#[async_trait]
impl CallApi for HttpCallApi {
    async fn register_participant(
        &self,
        room_code: &str,
        body: &RegisterParticipant,
    ) -> Result<String, ApiError> {
        let path = format!("/calls/{}/participants", room_code);
        let response = self.client.post(self.url(&path)).json(body).send().await?;
        let registered: RegisterResponse = Self::decode(response, &path).await?;
        debug!("Registered participant {} in {}", registered.id, room_code);
        Ok(registered.id)
    }

    async fn list_participants(&self, room_code: &str) -> Result<Vec<ParticipantRecord>, ApiError> {
        let path = format!("/calls/{}/participants", room_code);
        let response = self.client.get(self.url(&path)).send().await?;
        Self::decode(response, &path).await
    }

    async fn update_participant_status(
        &self,
        room_code: &str,
        participant_id: &str,
        status: ParticipantStatus,
    ) -> Result<(), ApiError> {
        let path = format!("/calls/{}/participants/{}", room_code, participant_id);
        let response = self
            .client
            .patch(self.url(&path))
            .json(&json!({ "status": status }))
            .send()
            .await?;
        Self::check(response, &path)?;
        Ok(())
    }

    async fn save_transcript(&self, room_code: &str, record: &TranscriptRecord) -> Result<(), ApiError> {
        let path = format!("/calls/{}/transcripts", room_code);
        let response = self.client.post(self.url(&path)).json(record).send().await?;
        Self::check(response, &path)?;
        Ok(())
    }

    async fn request_guidance(
        &self,
        room_code: &str,
        request: &GuidanceRequest,
    ) -> Result<GuidanceResponse, ApiError> {
        let path = format!("/calls/{}/guidance", room_code);
        let response = self.client.post(self.url(&path)).json(request).send().await?;
        Self::decode(response, &path).await
    }

    async fn end_call(&self, room_code: &str) -> Result<(), ApiError> {
        let path = format!("/calls/{}/end", room_code);
        let response = self.client.post(self.url(&path)).send().await?;
        Self::check(response, &path)?;
        Ok(())
    }

    async fn notify_offer(&self, room_code: &str, notice: &OfferNotice) -> Result<(), ApiError> {
        let path = format!("/calls/{}/{}", room_code, notice.kind.path_segment());
        let response = self.client.post(self.url(&path)).json(notice).send().await?;
        Self::check(response, &path)?;
        Ok(())
    }

    async fn upload_recording(&self, room_code: &str, blob: &RecordingBlob) -> Result<(), ApiError> {
        let path = format!("/calls/{}/recording", room_code);
        let response = self
            .client
            .post(self.url(&path))
            .header(header::CONTENT_TYPE, blob.mime_type.as_str())
            .body(blob.data.clone())
            .send()
            .await?;
        Self::check(response, &path)?;
        debug!("Uploaded {} byte recording for {}", blob.len(), room_code);
        Ok(())
    }

    async fn fetch_template(&self, template_id: &str) -> Result<Vec<TemplatePhase>, ApiError> {
        let path = format!("/calls/templates/{}", template_id);
        let response = self.client.get(self.url(&path)).send().await?;
        let template: TemplateResponse = Self::decode(response, &path).await?;
        Ok(template.phases)
    }
}
