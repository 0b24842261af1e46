mod end;
mod handle;
mod view;

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::admission::{HostAction, PollTicket, Roster, RosterChange};
use crate::api::CallApi;
use crate::chat::ChatLog;
use crate::config::CallConfig;
use crate::error::{ApiError, CallError, MediaAccessError, RecordingError};
use crate::events::{CallEvent, EventReceiver, EventSender};
use crate::guidance::{GuidanceHandle, GuidanceScheduler};
use crate::media::{MediaDevices, MediaSession, MediaStream};
use crate::models::{
    GuidanceItem, Offer, OfferNotice, OfferNoticeKind, Participant, ParticipantRecord,
    ParticipantRole, ParticipantStatus, PresentedOffer, PriceOverride, RecordingState, RegisterParticipant,
    SidePanel, TemplatePhase, TranscriptRecord,
};
use crate::offers::{response_from_reply, OfferInbox, OfferPresenter};
use crate::recorder::{CallRecorder, CaptureBackend};
use crate::signaling::{Signal, SignalEvent, SignalKind, SignalTransport, SignalingClient};
use crate::transcription::{
    SharedTranscript, SpeechRecognizer, TranscriptLog, TranscriptResult, TranscriptUpdate,
    TranscriptionManager,
};

pub use handle::{CallRoomHandle, RoomAction, RoomCommand};
pub use view::RoomView;

const SIGNAL_KINDS: [SignalKind; 9] = [
    SignalKind::RecordingStarted,
    SignalKind::RecordingStopped,
    SignalKind::AdmitParticipant,
    SignalKind::OfferPresented,
    SignalKind::OfferDismissed,
    SignalKind::OfferAccepted,
    SignalKind::OfferDeclined,
    SignalKind::OfferMinimized,
    SignalKind::ChatMessage,
];

/// Who is joining which room.
#[derive(Debug, Clone)]
pub struct JoinOptions {
    pub room_code: String,
    pub role: ParticipantRole,
    pub display_name: String,
    pub user_id: Option<String>,
    pub guest_email: Option<String>,
    /// Guided-call template loaded for the host at join.
    pub template_id: Option<String>,
}

/// Capabilities the room is built on.
#[derive(Clone)]
pub struct Collaborators {
    pub api: Arc<dyn CallApi>,
    pub transport: Arc<dyn SignalTransport>,
    pub devices: Arc<dyn MediaDevices>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub capture: Arc<dyn CaptureBackend>,
}

/// Where the client goes once the call has ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRoute {
    pub path: String,
}

impl SummaryRoute {
    pub fn for_room(room_code: &str) -> Self {
        Self {
            path: format!("/calls/{}/summary", room_code),
        }
    }
}

/// Everything that arrives from outside the room's own calls.
#[derive(Debug)]
enum Inbound {
    Signal(Signal),
    Transcript(TranscriptResult),
    Poll(PollTicket, Result<Vec<ParticipantRecord>, ApiError>),
}

/// One participant's view of a live call: owns the media session, signaling
/// client, roster, and (for the host) transcription, guidance and recording.
///
/// Not `Clone`; drive it directly or move it onto a task with [`spawn`].
/// Dropping it releases media, timers and the signaling connection.
///
/// [`spawn`]: CallRoom::spawn
pub struct CallRoom {
    config: CallConfig,
    room_code: String,
    role: ParticipantRole,
    display_name: String,
    api: Arc<dyn CallApi>,

    signaling: SignalingClient,
    signaling_degraded: bool,
    media: MediaSession,
    media_error: Option<MediaAccessError>,
    transcription: Option<TranscriptionManager>,
    transcript: SharedTranscript,
    guidance: Option<GuidanceHandle>,
    guidance_items: Vec<GuidanceItem>,
    template_phases: Vec<TemplatePhase>,
    recorder: CallRecorder,
    recording_state: RecordingState,
    remote_recording: bool,
    roster: Roster,
    presenter: OfferPresenter,
    inbox: OfferInbox,
    chat: ChatLog,
    active_panel: SidePanel,

    call_active: bool,
    call_started: Option<Instant>,
    elapsed_secs: u64,
    clock: Option<Interval>,
    poll: Option<Interval>,
    poll_tasks: JoinSet<()>,
    saving: bool,
    ended: Option<SummaryRoute>,

    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    guidance_tx: mpsc::UnboundedSender<GuidanceItem>,
    guidance_rx: mpsc::UnboundedReceiver<GuidanceItem>,
    events: EventSender,
    view_tx: watch::Sender<RoomView>,
}

impl CallRoom {
    /// Join a room. Never fails: registration, signaling and device problems
    /// leave the room in a degraded state that the view reports.
    pub async fn join(options: JoinOptions, collaborators: Collaborators, config: CallConfig) -> Self {
        let JoinOptions {
            room_code,
            role,
            display_name,
            user_id,
            guest_email,
            template_id,
        } = options;
        let Collaborators {
            api,
            transport,
            devices,
            recognizer,
            capture,
        } = collaborators;
        info!("Joining room {} as {:?}", room_code, role);

        let registration = match role {
            ParticipantRole::Guest => RegisterParticipant {
                user_id: None,
                guest_name: Some(display_name.clone()),
                guest_email: guest_email.clone(),
                role,
            },
            _ => RegisterParticipant {
                user_id: user_id.clone(),
                guest_name: None,
                guest_email: None,
                role,
            },
        };
        let participant_id = match api.register_participant(&room_code, &registration).await {
            Ok(id) => id,
            Err(e) => {
                let fallback = Uuid::new_v4().to_string();
                warn!(
                    "Registration in {} failed ({}); continuing as {}",
                    room_code, e, fallback
                );
                fallback
            }
        };

        let local = Participant {
            id: participant_id.clone(),
            user_id,
            display_name: display_name.clone(),
            email: guest_email,
            avatar_url: None,
            role,
            status: match role {
                ParticipantRole::Guest => ParticipantStatus::Waiting,
                _ => ParticipantStatus::InCall,
            },
            stream: None,
            is_muted: false,
            is_camera_off: false,
        };

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (guidance_tx, guidance_rx) = mpsc::unbounded_channel();
        let (events, _) = crate::events::create_event_bus();
        let (view_tx, _) = watch::channel(RoomView::initial(&room_code, &participant_id, role));

        let signaling = SignalingClient::new(
            room_code.clone(),
            participant_id.clone(),
            transport,
            config.reconnect_policy(),
        );
        for kind in SIGNAL_KINDS {
            let tx = inbound_tx.clone();
            signaling.on(kind, move |signal| {
                let _ = tx.send(Inbound::Signal(signal.clone()));
            });
        }

        let mut recorder = CallRecorder::new(capture);
        {
            let api = api.clone();
            let room_code = room_code.clone();
            recorder.on_stop(move |blob| {
                let api = api.clone();
                let room_code = room_code.clone();
                tokio::spawn(async move {
                    if let Err(e) = api.upload_recording(&room_code, &blob).await {
                        error!("Recording upload failed for {}: {}", room_code, e);
                    }
                });
            });
        }

        let transcription = match role {
            ParticipantRole::Host => Some(TranscriptionManager::new(recognizer, display_name.clone())),
            _ => None,
        };

        let mut room = Self {
            media: MediaSession::new(devices, config.device_release_delay()),
            config,
            room_code,
            role,
            display_name: display_name.clone(),
            api,
            signaling,
            signaling_degraded: false,
            media_error: None,
            transcription,
            transcript: Arc::new(Mutex::new(TranscriptLog::new())),
            guidance: None,
            guidance_items: Vec::new(),
            template_phases: Vec::new(),
            recorder,
            recording_state: RecordingState::Idle,
            remote_recording: false,
            roster: Roster::new(local),
            presenter: OfferPresenter::new(),
            inbox: OfferInbox::new(display_name),
            chat: ChatLog::new(),
            active_panel: SidePanel::default(),
            call_active: false,
            call_started: None,
            elapsed_secs: 0,
            clock: None,
            poll: None,
            poll_tasks: JoinSet::new(),
            saving: false,
            ended: None,
            inbound_tx,
            inbound_rx,
            guidance_tx,
            guidance_rx,
            events,
            view_tx,
        };

        if let Err(e) = room.signaling.connect().await {
            warn!("Signaling unavailable for {}: {}", room.room_code, e);
            room.signaling_degraded = true;
            room.emit(CallEvent::SignalingDegraded { reason: e.to_string() });
        }

        room.acquire_media().await;

        if room.role != ParticipantRole::Guest {
            room.start_call().await;
        }
        if let Some(template_id) = template_id.filter(|_| room.is_host()) {
            room.load_template(&template_id).await;
        }

        let mut poll = interval(room.config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        room.poll = Some(poll);

        room.publish();
        room
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn room_code(&self) -> &str {
        &self.room_code
    }

    pub fn participant_id(&self) -> &str {
        self.roster.local_id()
    }

    pub fn role(&self) -> ParticipantRole {
        self.role
    }

    pub fn is_host(&self) -> bool {
        self.role == ParticipantRole::Host
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn local_status(&self) -> Option<ParticipantStatus> {
        self.roster.local_status()
    }

    pub fn media(&self) -> &MediaSession {
        &self.media
    }

    pub fn media_error(&self) -> Option<&MediaAccessError> {
        self.media_error.as_ref()
    }

    pub fn is_signaling_degraded(&self) -> bool {
        self.signaling_degraded
    }

    pub fn transcript(&self) -> SharedTranscript {
        self.transcript.clone()
    }

    pub fn is_transcribing(&self) -> bool {
        self.transcription.as_ref().is_some_and(TranscriptionManager::is_running)
    }

    pub fn guidance_items(&self) -> &[GuidanceItem] {
        &self.guidance_items
    }

    pub fn template_phases(&self) -> &[TemplatePhase] {
        &self.template_phases
    }

    pub fn presenter(&self) -> &OfferPresenter {
        &self.presenter
    }

    pub fn inbox(&self) -> &OfferInbox {
        &self.inbox
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    pub fn active_panel(&self) -> SidePanel {
        self.active_panel
    }

    pub fn recording_state(&self) -> RecordingState {
        self.recording_state
    }

    pub fn is_remote_recording(&self) -> bool {
        self.remote_recording
    }

    pub fn is_call_active(&self) -> bool {
        self.call_active
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed_secs
    }

    pub fn is_saving(&self) -> bool {
        self.saving
    }

    pub fn summary_route(&self) -> Option<&SummaryRoute> {
        self.ended.as_ref()
    }

    pub fn subscribe_events(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<RoomView> {
        self.view_tx.subscribe()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn emit(&self, event: CallEvent) {
        let _ = self.events.send(event);
    }

    fn publish(&self) {
        self.view_tx.send_replace(view::build(self));
    }

    /// Run a REST call in the background; failures are logged only.
    fn fire<F>(&self, what: &'static str, request: F)
    where
        F: Future<Output = Result<(), ApiError>> + Send + 'static,
    {
        let room_code = self.room_code.clone();
        tokio::spawn(async move {
            if let Err(e) = request.await {
                warn!("{} failed in {}: {}", what, room_code, e);
            }
        });
    }

    fn require_host(&self, action: &'static str) -> Result<(), CallError> {
        if self.is_host() {
            Ok(())
        } else {
            Err(CallError::NotHost(action))
        }
    }

    fn send_signal(&self, event: &SignalEvent, target_id: Option<&str>) -> bool {
        match self.signaling.send(event, target_id) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Could not send {} to {}: {}",
                    event.kind().as_str(),
                    target_id.unwrap_or("room"),
                    e
                );
                false
            }
        }
    }

    fn call_seconds(&self) -> f64 {
        self.call_started
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    // ------------------------------------------------------------------
    // Media
    // ------------------------------------------------------------------

    async fn acquire_media(&mut self) -> bool {
        match self.media.acquire().await {
            Ok(_) => {
                self.media_error = None;
                self.roster
                    .set_local_media(self.media.is_muted(), self.media.is_camera_off());
                true
            }
            Err(e) => {
                self.emit(CallEvent::MediaError { message: e.to_string() });
                self.media_error = Some(e);
                false
            }
        }
    }

    /// Manual retry after a device failure. The only path that re-requests
    /// devices after join.
    pub async fn retry_media(&mut self) -> Result<(), CallError> {
        if self.media.stream().is_some() {
            return Ok(());
        }
        let acquired = self.acquire_media().await;
        if acquired && self.call_active {
            self.start_transcription().await;
        }
        self.publish();
        match &self.media_error {
            Some(e) => Err(e.clone().into()),
            None => Ok(()),
        }
    }

    pub fn toggle_mute(&mut self) -> bool {
        let muted = self.media.toggle_mute();
        self.roster.set_local_media(muted, self.media.is_camera_off());
        self.publish();
        muted
    }

    pub fn toggle_camera(&mut self) -> bool {
        let camera_off = self.media.toggle_camera();
        self.roster.set_local_media(self.media.is_muted(), camera_off);
        self.publish();
        camera_off
    }

    pub async fn toggle_screen_share(&mut self) -> Result<bool, CallError> {
        let sharing = self.media.toggle_screen_share().await?;
        self.publish();
        Ok(sharing)
    }

    pub async fn switch_device(
        &mut self,
        audio_device_id: Option<&str>,
        video_device_id: Option<&str>,
    ) -> Result<MediaStream, CallError> {
        let result = self.media.switch_device(audio_device_id, video_device_id).await;
        self.roster
            .set_local_media(self.media.is_muted(), self.media.is_camera_off());
        let stream = match result {
            Ok(stream) => {
                self.media_error = None;
                stream
            }
            Err(e) => {
                self.emit(CallEvent::MediaError { message: e.to_string() });
                self.media_error = Some(e.clone());
                self.publish();
                return Err(e.into());
            }
        };

        // The recognizer was bound to the old microphone.
        if self.call_active && self.transcription.is_some() {
            self.start_transcription().await;
        }
        self.publish();
        Ok(stream)
    }

    // ------------------------------------------------------------------
    // Call lifecycle
    // ------------------------------------------------------------------

    /// Host and team members enter the call directly.
    async fn start_call(&mut self) {
        let local_id = self.participant_id().to_string();
        if let Err(e) = self
            .api
            .update_participant_status(&self.room_code, &local_id, ParticipantStatus::InCall)
            .await
        {
            warn!("Could not mark {} in call: {}", local_id, e);
        }
        self.activate_call().await;
    }

    async fn activate_call(&mut self) {
        if self.call_active || self.ended.is_some() {
            return;
        }
        self.call_active = true;
        self.call_started = Some(Instant::now());
        let tick = self.config.timer_tick();
        self.clock = Some(interval_at(Instant::now() + tick, tick));
        info!("Call active in {} for {}", self.room_code, self.participant_id());

        if self.is_host() {
            self.start_transcription().await;
            let scheduler = GuidanceScheduler::new(
                self.api.clone(),
                self.room_code.clone(),
                self.transcript.clone(),
                self.guidance_tx.clone(),
            );
            self.guidance = Some(scheduler.spawn(self.config.guidance_interval()));
        }
    }

    async fn start_transcription(&mut self) {
        let Some(manager) = &self.transcription else {
            return;
        };
        let Some(track) = self.media.audio_track() else {
            debug!("No microphone; transcription not started");
            return;
        };
        let tx = self.inbound_tx.clone();
        let on_result = move |result: TranscriptResult| {
            let _ = tx.send(Inbound::Transcript(result));
        };
        if let Err(e) = manager.start(on_result, track).await {
            warn!("Transcription unavailable in {}: {}", self.room_code, e);
        }
    }

    async fn load_template(&mut self, template_id: &str) {
        match self.api.fetch_template(template_id).await {
            Ok(phases) => {
                info!("Loaded template {} with {} phase(s)", template_id, phases.len());
                self.template_phases = phases;
            }
            Err(e) => warn!("Template {} unavailable: {}", template_id, e),
        }
    }

    /// One tick of the call clock. No-op once the call is no longer active.
    pub fn tick_call_timer(&mut self) {
        if !self.call_active {
            return;
        }
        self.elapsed_secs += 1;
        self.publish();
    }

    // ------------------------------------------------------------------
    // Roster polling
    // ------------------------------------------------------------------

    /// Fetch the participant list in the background; the result comes back
    /// through [`process_next`](Self::process_next).
    pub fn spawn_poll(&mut self) {
        while self.poll_tasks.try_join_next().is_some() {}

        let ticket = self.roster.begin_poll();
        let api = self.api.clone();
        let room_code = self.room_code.clone();
        let tx = self.inbound_tx.clone();
        self.poll_tasks.spawn(async move {
            let result = api.list_participants(&room_code).await;
            let _ = tx.send(Inbound::Poll(ticket, result));
        });
    }

    async fn apply_poll(&mut self, ticket: PollTicket, result: Result<Vec<ParticipantRecord>, ApiError>) {
        let records = match result {
            Ok(records) => records,
            Err(e) => {
                warn!("Participant poll failed in {}: {}", self.room_code, e);
                return;
            }
        };
        for change in self.roster.apply_poll(ticket, records) {
            match change {
                RosterChange::WaitingRoomGrew { waiting } => {
                    self.emit(CallEvent::WaitingRoomGrew { waiting });
                    if self.is_host() {
                        self.set_panel(SidePanel::Attendees);
                    }
                }
                RosterChange::LocalStatusChanged(status) => self.local_status_changed(status).await,
            }
        }
        self.emit(CallEvent::ParticipantsChanged {
            count: self.roster.participants().len(),
        });
        self.publish();
    }

    async fn local_status_changed(&mut self, status: ParticipantStatus) {
        self.emit(CallEvent::LocalStatusChanged(status));
        match status {
            ParticipantStatus::InCall | ParticipantStatus::Admitted => self.activate_call().await,
            ParticipantStatus::Denied | ParticipantStatus::Left => {
                info!("Removed from {} by host ({})", self.room_code, status.as_str());
                self.call_active = false;
                self.clock = None;
            }
            _ => {}
        }
    }

    pub fn set_panel(&mut self, panel: SidePanel) {
        if self.active_panel != panel {
            self.active_panel = panel;
            self.emit(CallEvent::PanelChanged(panel));
            self.publish();
        }
    }

    // ------------------------------------------------------------------
    // Admission (host)
    // ------------------------------------------------------------------

    pub fn admit_participant(&mut self, participant_id: &str) -> Result<(), CallError> {
        self.require_host("admit participants")?;
        let action = self.roster.admit(participant_id);
        self.dispatch_host_action(action);
        Ok(())
    }

    pub fn deny_participant(&mut self, participant_id: &str) -> Result<(), CallError> {
        self.require_host("deny participants")?;
        let action = self.roster.deny(participant_id);
        self.dispatch_host_action(action);
        Ok(())
    }

    pub fn kick_participant(&mut self, participant_id: &str) -> Result<(), CallError> {
        self.require_host("remove participants")?;
        let action = self.roster.kick(participant_id);
        self.dispatch_host_action(action);
        Ok(())
    }

    /// Local state is already updated; persist it and tell the participant.
    fn dispatch_host_action(&mut self, action: Option<HostAction>) {
        let Some(HostAction { participant_id, status }) = action else {
            debug!("Host action on unknown participant ignored");
            return;
        };

        let api = self.api.clone();
        let room_code = self.room_code.clone();
        let id = participant_id.clone();
        self.fire("Participant status update", async move {
            api.update_participant_status(&room_code, &id, status).await
        });

        self.send_signal(&SignalEvent::AdmitParticipant { status }, Some(&participant_id));
        self.emit(CallEvent::ParticipantsChanged {
            count: self.roster.participants().len(),
        });
        self.publish();
    }

    // ------------------------------------------------------------------
    // Offers
    // ------------------------------------------------------------------

    pub fn set_price_override(&mut self, offer_id: &str, price: PriceOverride) {
        self.presenter.set_price_override(offer_id, price);
        self.publish();
    }

    pub fn reset_price_override(&mut self, offer_id: &str) {
        self.presenter.reset_price_override(offer_id);
        self.publish();
    }

    /// Present `offer` to `targets`, or to every eligible attendee when
    /// `None`. Returns how many targeted sends went out.
    pub fn present_offer(&mut self, offer: &Offer, targets: Option<Vec<String>>) -> Result<usize, CallError> {
        self.require_host("present offers")?;
        let targets = targets.unwrap_or_else(|| self.roster.offer_targets());
        let sends = self.presenter.present(offer, &targets);

        let delivered = sends
            .iter()
            .filter(|(target, event)| self.send_signal(event, Some(target.as_str())))
            .count();
        let target_ids: Vec<String> = sends.into_iter().map(|(target, _)| target).collect();

        let notice = OfferNotice {
            kind: OfferNoticeKind::Presented,
            offer_id: offer.id.clone(),
            participant_ids: target_ids.clone(),
            participant_name: None,
            reason: None,
            price: self.presenter.price_override(&offer.id).map(|p| p.price),
        };
        let api = self.api.clone();
        let room_code = self.room_code.clone();
        self.fire("Offer-presented notification", async move {
            api.notify_offer(&room_code, &notice).await
        });

        self.emit(CallEvent::OfferPresented {
            offer_id: offer.id.clone(),
            targets: target_ids,
        });
        self.publish();
        Ok(delivered)
    }

    pub fn dismiss_offer(&mut self) -> Result<(), CallError> {
        self.require_host("dismiss offers")?;
        if let Some(event) = self.presenter.dismiss() {
            self.send_signal(&event, None);
            if let SignalEvent::OfferDismissed { offer_id } = event {
                self.emit(CallEvent::OfferDismissed { offer_id });
            }
            self.publish();
        }
        Ok(())
    }

    pub fn accept_offer(&mut self) {
        let Some(offer) = self.inbox.current().cloned() else {
            return;
        };
        if let Some((target, event)) = self.inbox.accept() {
            self.send_signal(&event, target.as_deref());
            self.notify_offer_reply(OfferNoticeKind::Accepted, &offer, None);
        }
        self.publish();
    }

    pub fn decline_offer(&mut self, reason: Option<String>) {
        let Some(offer) = self.inbox.current().cloned() else {
            return;
        };
        if let Some((target, event)) = self.inbox.decline(reason.clone()) {
            self.send_signal(&event, target.as_deref());
            self.notify_offer_reply(OfferNoticeKind::Declined, &offer, reason);
        }
        self.publish();
    }

    pub fn minimize_offer(&mut self) {
        if let Some((target, event)) = self.inbox.minimize() {
            self.send_signal(&event, target.as_deref());
            self.publish();
        }
    }

    pub fn expand_offer(&mut self) {
        self.inbox.expand();
        self.publish();
    }

    /// CRM notification for a guest's accept or decline. Fire-and-forget.
    fn notify_offer_reply(&self, kind: OfferNoticeKind, offer: &PresentedOffer, reason: Option<String>) {
        let notice = OfferNotice {
            kind,
            offer_id: offer.id.clone(),
            participant_ids: vec![self.participant_id().to_string()],
            participant_name: Some(self.display_name.clone()),
            reason,
            price: Some(offer.price),
        };
        let api = self.api.clone();
        let room_code = self.room_code.clone();
        self.fire("Offer reply notification", async move {
            api.notify_offer(&room_code, &notice).await
        });
    }

    // ------------------------------------------------------------------
    // Recording (host)
    // ------------------------------------------------------------------

    /// Everything that should end up in the recording: local camera and
    /// microphone, screen share, and every remote participant's stream.
    fn recording_stream(&self) -> MediaStream {
        let mut tracks = self.media.combined_stream().into_tracks();
        for participant in self.roster.remote_tiles() {
            if let Some(stream) = &participant.stream {
                tracks.extend(stream.tracks().iter().cloned());
            }
        }
        MediaStream::new(tracks)
    }

    pub fn start_recording(&mut self) -> Result<(), CallError> {
        self.require_host("record")?;
        if self.recording_state != RecordingState::Idle {
            return Err(RecordingError::AlreadyActive.into());
        }
        let stream = self.recording_stream();
        self.recorder.start(&stream)?;
        self.set_recording_state(RecordingState::Recording);
        self.send_signal(&SignalEvent::RecordingStarted {}, None);
        Ok(())
    }

    /// Normal stop: the blob goes to the stop callback for upload.
    pub async fn stop_recording(&mut self) -> Result<(), CallError> {
        self.require_host("record")?;
        if self.recording_state != RecordingState::Recording {
            return Err(RecordingError::NotRecording.into());
        }
        self.set_recording_state(RecordingState::Stopping);
        let result = self.recorder.finish().await;
        self.set_recording_state(RecordingState::Idle);
        self.send_signal(&SignalEvent::RecordingStopped {}, None);
        result.map_err(CallError::from)
    }

    fn set_recording_state(&mut self, state: RecordingState) {
        self.recording_state = state;
        self.emit(CallEvent::RecordingStateChanged(state));
        self.publish();
    }

    // ------------------------------------------------------------------
    // Transcript, guidance, chat
    // ------------------------------------------------------------------

    pub fn toggle_transcript_flag(&mut self, chunk_id: &str, note: Option<String>) -> Option<bool> {
        let flagged = self
            .transcript
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .toggle_flag(chunk_id, note);
        self.publish();
        flagged
    }

    pub fn mark_guidance_used(&mut self, id: &str) -> bool {
        let found = match self.guidance_items.iter_mut().find(|g| g.id == id) {
            Some(item) => {
                item.was_used = true;
                true
            }
            None => false,
        };
        self.publish();
        found
    }

    pub fn dismiss_guidance(&mut self, id: &str) -> bool {
        let found = match self.guidance_items.iter_mut().find(|g| g.id == id) {
            Some(item) => {
                item.was_dismissed = true;
                true
            }
            None => false,
        };
        self.publish();
        found
    }

    pub fn send_chat(&mut self, content: &str) -> bool {
        let Some(message) = ChatLog::compose(self.participant_id(), &self.display_name, content) else {
            return false;
        };
        self.send_signal(&SignalEvent::ChatMessage(message.clone()), None);
        self.chat.push(message);
        self.publish();
        true
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Wait for and handle the next inbound signal, transcript result, poll
    /// result or guidance item.
    pub async fn process_next(&mut self) {
        tokio::select! {
            Some(inbound) = self.inbound_rx.recv() => self.handle_inbound(inbound).await,
            Some(item) = self.guidance_rx.recv() => self.add_guidance(item),
        }
    }

    async fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Signal(signal) => self.handle_signal(signal).await,
            Inbound::Transcript(result) => self.handle_transcript(result),
            Inbound::Poll(ticket, result) => self.apply_poll(ticket, result).await,
        }
    }

    fn add_guidance(&mut self, item: GuidanceItem) {
        self.emit(CallEvent::GuidanceAdded(item.clone()));
        self.guidance_items.push(item);
        self.publish();
    }

    fn handle_transcript(&mut self, result: TranscriptResult) {
        let timestamp = self.call_seconds();
        let update = self
            .transcript
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .apply(&result, timestamp);

        match update {
            TranscriptUpdate::Committed(chunk) => {
                let record = TranscriptRecord {
                    participant_id: self.participant_id().to_string(),
                    speaker_label: chunk.speaker_label.clone(),
                    content: chunk.content.clone(),
                    timestamp_start: chunk.timestamp_start,
                    confidence: chunk.confidence,
                };
                let api = self.api.clone();
                let room_code = self.room_code.clone();
                self.fire("Transcript save", async move {
                    api.save_transcript(&room_code, &record).await
                });
                self.emit(CallEvent::TranscriptUpdated(chunk));
            }
            TranscriptUpdate::Duplicate => debug!("Duplicate final transcript dropped"),
            TranscriptUpdate::Interim | TranscriptUpdate::Ignored => {}
        }
        self.publish();
    }

    async fn handle_signal(&mut self, signal: Signal) {
        let Signal { sender_id, event } = signal;
        match event {
            SignalEvent::RecordingStarted {} | SignalEvent::RecordingStopped {} => {
                let active = matches!(event, SignalEvent::RecordingStarted {});
                self.remote_recording = active;
                self.emit(CallEvent::RemoteRecording { active });
            }
            SignalEvent::AdmitParticipant { status } => {
                if let Some(status) = self.roster.apply_admission_signal(status) {
                    self.local_status_changed(status).await;
                }
            }
            SignalEvent::OfferPresented(offer) => {
                self.emit(CallEvent::OfferReceived(offer.clone()));
                self.inbox.receive(&sender_id, offer);
            }
            SignalEvent::OfferDismissed { offer_id } => {
                if self.inbox.dismiss(offer_id.as_deref()) {
                    self.emit(CallEvent::OfferDismissed { offer_id });
                }
            }
            SignalEvent::OfferAccepted(_) | SignalEvent::OfferDeclined(_) | SignalEvent::OfferMinimized(_) => {
                if !self.is_host() {
                    return;
                }
                if let Some((offer_id, response)) = response_from_reply(&event) {
                    self.presenter.record_response(offer_id, &sender_id, response.clone());
                    self.emit(CallEvent::OfferResponse {
                        offer_id: offer_id.to_string(),
                        participant_id: sender_id.clone(),
                        response,
                    });
                }
            }
            SignalEvent::ChatMessage(mut message) => {
                // The envelope sender is stamped by the relay; the payload's is not trusted.
                if message.sender_id != sender_id {
                    debug!("Chat claimed sender {} but came from {}", message.sender_id, sender_id);
                }
                if let Some(participant) = self.roster.get(&sender_id) {
                    message.sender_name = participant.display_name.clone();
                }
                message.sender_id = sender_id;
                if self.chat.push(message.clone()) {
                    self.emit(CallEvent::ChatReceived(message));
                }
            }
        }
        self.publish();
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Release everything without the end-call sequence. Idempotent.
    pub fn dispose(&mut self) {
        if let Some(transcription) = &self.transcription {
            transcription.stop();
        }
        if let Some(mut guidance) = self.guidance.take() {
            guidance.dispose();
        }
        self.clock = None;
        self.poll = None;
        self.call_active = false;
        self.poll_tasks.abort_all();
        self.media.release();
        self.signaling.disconnect();
    }
}

impl Drop for CallRoom {
    fn drop(&mut self) {
        self.dispose();
    }
}
