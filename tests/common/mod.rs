#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use callroom_lib::api::CallApi;
use callroom_lib::error::{ApiError, DeviceError, TranscriptionError};
use callroom_lib::media::{MediaConstraints, MediaDevices, MediaStream, MediaTrack, TrackKind};
use callroom_lib::models::{
    GuidanceRequest, GuidanceResponse, GuidanceType, OfferNotice, OfferNoticeKind, ParticipantRecord,
    ParticipantRole, ParticipantStatus, RegisterParticipant, TemplatePhase, TranscriptRecord,
};
use callroom_lib::recorder::{RecordingBlob, StreamMuxer};
use callroom_lib::signaling::LocalHub;
use callroom_lib::transcription::{RecognitionResult, RecognitionSession, SpeechRecognizer};
use callroom_lib::{CallConfig, Collaborators, JoinOptions};

// ============================================================
// REST
// ============================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    Register(ParticipantRole),
    ListParticipants,
    UpdateStatus(String, ParticipantStatus),
    SaveTranscript(String),
    Guidance(String),
    EndCall,
    NotifyOffer(OfferNoticeKind, Vec<String>),
    UploadRecording(usize),
    FetchTemplate(String),
}

/// In-memory stand-in for the REST service. Status updates are applied to
/// the participant list it serves, like the real server.
pub struct FakeApi {
    id: String,
    calls: Mutex<Vec<ApiCall>>,
    participants: Mutex<Vec<ParticipantRecord>>,
    fail: AtomicBool,
    guidance_delay: Mutex<Duration>,
    guidance_in_flight: AtomicUsize,
    guidance_peak: AtomicUsize,
}

impl FakeApi {
    pub fn with_id(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            calls: Mutex::new(Vec::new()),
            participants: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            guidance_delay: Mutex::new(Duration::ZERO),
            guidance_in_flight: AtomicUsize::new(0),
            guidance_peak: AtomicUsize::new(0),
        })
    }

    /// Every request fails with a 500 from now on.
    pub fn fail_everything(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn set_guidance_delay(&self, delay: Duration) {
        *self.guidance_delay.lock().unwrap() = delay;
    }

    pub fn set_participants(&self, records: Vec<ParticipantRecord>) {
        *self.participants.lock().unwrap() = records;
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn guidance_turns(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ApiCall::Guidance(turn) => Some(turn),
                _ => None,
            })
            .collect()
    }

    pub fn guidance_peak(&self) -> usize {
        self.guidance_peak.load(Ordering::SeqCst)
    }

    fn record(&self, call: ApiCall) -> Result<(), ApiError> {
        self.calls.lock().unwrap().push(call);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: 500,
                path: "/fake".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CallApi for FakeApi {
    async fn register_participant(
        &self,
        _room_code: &str,
        body: &RegisterParticipant,
    ) -> Result<String, ApiError> {
        self.record(ApiCall::Register(body.role))?;
        Ok(self.id.clone())
    }

    async fn list_participants(&self, _room_code: &str) -> Result<Vec<ParticipantRecord>, ApiError> {
        self.record(ApiCall::ListParticipants)?;
        Ok(self.participants.lock().unwrap().clone())
    }

    async fn update_participant_status(
        &self,
        _room_code: &str,
        participant_id: &str,
        status: ParticipantStatus,
    ) -> Result<(), ApiError> {
        self.record(ApiCall::UpdateStatus(participant_id.to_string(), status))?;
        for record in self.participants.lock().unwrap().iter_mut() {
            if record.id == participant_id {
                record.status = status;
            }
        }
        Ok(())
    }

    async fn save_transcript(&self, _room_code: &str, record: &TranscriptRecord) -> Result<(), ApiError> {
        self.record(ApiCall::SaveTranscript(record.content.clone()))
    }

    async fn request_guidance(
        &self,
        _room_code: &str,
        request: &GuidanceRequest,
    ) -> Result<GuidanceResponse, ApiError> {
        let now = self.guidance_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.guidance_peak.fetch_max(now, Ordering::SeqCst);
        let delay = *self.guidance_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        self.guidance_in_flight.fetch_sub(1, Ordering::SeqCst);

        self.record(ApiCall::Guidance(request.transcript_turn.clone()))?;
        Ok(GuidanceResponse {
            content: Some(format!("Follow up on: {}", request.speaker_label)),
            guidance_type: Some(GuidanceType::Question),
            ..Default::default()
        })
    }

    async fn end_call(&self, _room_code: &str) -> Result<(), ApiError> {
        self.record(ApiCall::EndCall)
    }

    async fn notify_offer(&self, _room_code: &str, notice: &OfferNotice) -> Result<(), ApiError> {
        self.record(ApiCall::NotifyOffer(notice.kind, notice.participant_ids.clone()))
    }

    async fn upload_recording(&self, _room_code: &str, blob: &RecordingBlob) -> Result<(), ApiError> {
        self.record(ApiCall::UploadRecording(blob.len()))
    }

    async fn fetch_template(&self, template_id: &str) -> Result<Vec<TemplatePhase>, ApiError> {
        self.record(ApiCall::FetchTemplate(template_id.to_string()))?;
        Ok(vec![TemplatePhase {
            id: Some("p1".into()),
            name: "Discovery".into(),
            description: None,
            questions: vec!["What prompted the call?".into()],
        }])
    }
}

pub fn record(id: &str, role: ParticipantRole, status: ParticipantStatus) -> ParticipantRecord {
    ParticipantRecord {
        id: id.to_string(),
        user_id: None,
        display_name: Some(id.to_string()),
        guest_name: None,
        guest_email: None,
        avatar_url: None,
        role,
        status,
    }
}

// ============================================================
// Devices
// ============================================================

/// Camera and microphone that succeed unless told otherwise.
#[derive(Default)]
pub struct FakeDevices {
    missing: Mutex<HashSet<String>>,
    deny: AtomicBool,
    cancel_display: AtomicBool,
}

impl FakeDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Requests naming `device_id` fail with not-found.
    pub fn unplug(&self, device_id: &str) {
        self.missing.lock().unwrap().insert(device_id.to_string());
    }

    pub fn deny_permission(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    pub fn cancel_display_picker(&self, cancel: bool) {
        self.cancel_display.store(cancel, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn get_user_media(&self, constraints: &MediaConstraints) -> Result<MediaStream, DeviceError> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(DeviceError::PermissionDenied);
        }
        let missing = self.missing.lock().unwrap().clone();
        let mut tracks = Vec::new();
        for (kind, constraint, default_id) in [
            (TrackKind::Audio, &constraints.audio, "mic-default"),
            (TrackKind::Video, &constraints.video, "cam-default"),
        ] {
            let Some(constraint) = constraint else {
                continue;
            };
            let device_id = constraint.device_id.clone().unwrap_or_else(|| default_id.to_string());
            if missing.contains(&device_id) {
                let name = match kind {
                    TrackKind::Audio => "audio",
                    TrackKind::Video => "video",
                };
                return Err(DeviceError::NotFound(name.to_string()));
            }
            tracks.push(MediaTrack::new(kind, Some(device_id.clone()), device_id));
        }
        Ok(MediaStream::new(tracks))
    }

    async fn get_display_media(&self) -> Result<MediaStream, DeviceError> {
        if self.cancel_display.load(Ordering::SeqCst) {
            return Err(DeviceError::Cancelled);
        }
        Ok(MediaStream::new(vec![MediaTrack::new(
            TrackKind::Video,
            Some("screen-1".into()),
            "Entire screen",
        )]))
    }
}

// ============================================================
// Speech
// ============================================================

/// Recognizer driven by the test: whatever is passed to [`say`](Self::say)
/// comes out of the active session.
#[derive(Default)]
pub struct FakeRecognizer {
    results: Mutex<Option<mpsc::UnboundedSender<RecognitionResult>>>,
    cancels: Mutex<Vec<oneshot::Receiver<()>>>,
    starts: AtomicUsize,
}

impl FakeRecognizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn say(&self, text: &str, is_final: bool) -> bool {
        match self.results.lock().unwrap().as_ref() {
            Some(tx) => tx
                .send(RecognitionResult {
                    text: text.to_string(),
                    is_final,
                    confidence: Some(0.9),
                })
                .is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl SpeechRecognizer for FakeRecognizer {
    async fn start(&self, _track: MediaTrack) -> Result<RecognitionSession, TranscriptionError> {
        let (tx, results) = mpsc::unbounded_channel();
        let (cancel, cancel_rx) = oneshot::channel();
        *self.results.lock().unwrap() = Some(tx);
        self.cancels.lock().unwrap().push(cancel_rx);
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(RecognitionSession { results, cancel })
    }
}

// ============================================================
// Room wiring
// ============================================================

pub const ROOM: &str = "ROOM-42";

pub fn test_config() -> CallConfig {
    CallConfig {
        poll_interval_ms: 1_000,
        guidance_interval_ms: 1_000,
        timer_tick_ms: 1_000,
        device_release_delay_ms: 10,
        reconnect_base_ms: 20,
        reconnect_max_ms: 100,
        ..CallConfig::default()
    }
}

pub fn join_options(role: ParticipantRole, name: &str) -> JoinOptions {
    JoinOptions {
        room_code: ROOM.to_string(),
        role,
        display_name: name.to_string(),
        user_id: None,
        guest_email: None,
        template_id: None,
    }
}

pub struct Fakes {
    pub api: Arc<FakeApi>,
    pub devices: Arc<FakeDevices>,
    pub recognizer: Arc<FakeRecognizer>,
}

impl Fakes {
    pub fn new(id: &str) -> Self {
        Self {
            api: FakeApi::with_id(id),
            devices: FakeDevices::new(),
            recognizer: FakeRecognizer::new(),
        }
    }

    pub fn collaborators(&self, hub: &LocalHub) -> Collaborators {
        Collaborators {
            api: self.api.clone(),
            transport: Arc::new(hub.clone()),
            devices: self.devices.clone(),
            recognizer: self.recognizer.clone(),
            capture: Arc::new(StreamMuxer::new()),
        }
    }
}

/// Poll `check` until it holds, letting background tasks run in between.
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
