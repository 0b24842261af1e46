use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use super::devices::{MediaConstraints, MediaDevices};
use super::{MediaState, MediaStream, MediaTrack, TrackKind};
use crate::error::{DeviceError, MediaAccessError};

/// Owns the local camera/microphone stream and the optional screen share.
///
/// Other components get clones of the tracks and only read them. Every track
/// this session acquired is stopped on [`release`](MediaSession::release),
/// which also runs on drop.
pub struct MediaSession {
    devices: Arc<dyn MediaDevices>,
    release_delay: Duration,
    stream: Option<MediaStream>,
    screen: Option<MediaStream>,
    is_muted: bool,
    is_camera_off: bool,
    state_tx: watch::Sender<MediaState>,
}

impl MediaSession {
    pub fn new(devices: Arc<dyn MediaDevices>, release_delay: Duration) -> Self {
        let (state_tx, _) = watch::channel(MediaState::default());
        Self {
            devices,
            release_delay,
            stream: None,
            screen: None,
            is_muted: false,
            is_camera_off: false,
            state_tx,
        }
    }

    /// One combined audio+video request. No retry: a failure is reported as-is.
    pub async fn acquire(&mut self) -> Result<MediaStream, MediaAccessError> {
        if let Some(stream) = &self.stream {
            return Ok(stream.clone());
        }

        match self.devices.get_user_media(&MediaConstraints::audio_video()).await {
            Ok(stream) => {
                info!(
                    "Acquired local media: {} audio, {} video track(s)",
                    stream.audio_tracks().count(),
                    stream.video_tracks().count()
                );
                self.stream = Some(stream.clone());
                self.recompute_flags();
                Ok(stream)
            }
            Err(e) => {
                error!("Failed to acquire camera/microphone: {}", e);
                Err(e.into())
            }
        }
    }

    pub fn stream(&self) -> Option<&MediaStream> {
        self.stream.as_ref()
    }

    pub fn screen_stream(&self) -> Option<&MediaStream> {
        self.screen.as_ref()
    }

    pub fn audio_track(&self) -> Option<MediaTrack> {
        self.stream.as_ref().and_then(MediaStream::first_audio)
    }

    /// Local stream plus screen share, for recording.
    pub fn combined_stream(&self) -> MediaStream {
        let tracks = self
            .stream
            .iter()
            .chain(self.screen.iter())
            .flat_map(|s| s.tracks().iter().cloned())
            .collect();
        MediaStream::new(tracks)
    }

    pub fn is_muted(&self) -> bool {
        self.is_muted
    }

    pub fn is_camera_off(&self) -> bool {
        self.is_camera_off
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.screen.is_some()
    }

    /// Enable/disable audio tracks in place. Returns the new muted flag.
    pub fn toggle_mute(&mut self) -> bool {
        self.is_muted = !self.is_muted;
        if let Some(stream) = &self.stream {
            for track in stream.audio_tracks() {
                track.set_enabled(!self.is_muted);
            }
        }
        info!("Mute set to {}", self.is_muted);
        self.publish();
        self.is_muted
    }

    /// Enable/disable video tracks in place. Returns the new camera-off flag.
    pub fn toggle_camera(&mut self) -> bool {
        self.is_camera_off = !self.is_camera_off;
        if let Some(stream) = &self.stream {
            for track in stream.video_tracks() {
                track.set_enabled(!self.is_camera_off);
            }
        }
        info!("Camera off set to {}", self.is_camera_off);
        self.publish();
        self.is_camera_off
    }

    /// Replace the local devices.
    ///
    /// Stops every current track first, waits for the driver to let go, then
    /// requests audio and video separately so one missing device does not cost
    /// the other. Fails only if neither request produced a track.
    pub async fn switch_device(
        &mut self,
        audio_device_id: Option<&str>,
        video_device_id: Option<&str>,
    ) -> Result<MediaStream, MediaAccessError> {
        if let Some(old) = self.stream.take() {
            old.stop_all();
        }
        tokio::time::sleep(self.release_delay).await;

        let audio_constraints = MediaConstraints::audio_only(audio_device_id);
        let video_constraints = MediaConstraints::video_only(video_device_id);
        let (audio, video) = tokio::join!(
            self.devices.get_user_media(&audio_constraints),
            self.devices.get_user_media(&video_constraints),
        );

        let mut tracks = Vec::new();
        let mut first_error: Option<DeviceError> = None;
        for (kind, result) in [(TrackKind::Audio, audio), (TrackKind::Video, video)] {
            match result {
                Ok(stream) => {
                    for track in stream.into_tracks() {
                        if track.kind() == kind {
                            tracks.push(track);
                        } else {
                            track.stop();
                        }
                    }
                }
                Err(e) => {
                    warn!("Switching {:?} device failed: {}", kind, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if tracks.is_empty() {
            self.recompute_flags();
            return Err(first_error
                .map(MediaAccessError::from)
                .unwrap_or_else(|| MediaAccessError::Unavailable("no tracks returned".into())));
        }

        let stream = MediaStream::new(tracks);
        self.stream = Some(stream.clone());
        self.recompute_flags();
        info!(
            "Switched devices: muted={}, camera_off={}",
            self.is_muted, self.is_camera_off
        );
        Ok(stream)
    }

    /// Start or stop screen sharing. Returns whether sharing is now active.
    /// A dismissed picker leaves everything unchanged.
    pub async fn toggle_screen_share(&mut self) -> Result<bool, MediaAccessError> {
        if let Some(screen) = self.screen.take() {
            screen.stop_all();
            info!("Screen sharing stopped");
            self.publish();
            return Ok(false);
        }

        match self.devices.get_display_media().await {
            Ok(screen) => {
                self.screen = Some(screen);
                info!("Screen sharing started");
                self.publish();
                Ok(true)
            }
            Err(DeviceError::Cancelled) => {
                info!("Screen share picker dismissed");
                Ok(false)
            }
            Err(e) => {
                warn!("Screen share failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Stop and drop every track. Idempotent.
    pub fn release(&mut self) {
        let had_media = self.stream.is_some() || self.screen.is_some();
        if let Some(stream) = self.stream.take() {
            stream.stop_all();
        }
        if let Some(screen) = self.screen.take() {
            screen.stop_all();
        }
        if had_media {
            info!("Local media released");
            self.publish();
        }
    }

    pub fn state(&self) -> MediaState {
        let device = |kind: TrackKind| {
            self.stream.as_ref().and_then(|s| {
                s.tracks()
                    .iter()
                    .find(|t| t.kind() == kind)
                    .and_then(|t| t.device_id().map(str::to_string))
            })
        };
        MediaState {
            has_stream: self.stream.is_some(),
            is_muted: self.is_muted,
            is_camera_off: self.is_camera_off,
            is_screen_sharing: self.screen.is_some(),
            audio_device_id: device(TrackKind::Audio),
            video_device_id: device(TrackKind::Video),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<MediaState> {
        self.state_tx.subscribe()
    }

    /// Muted / camera-off derived from which live, enabled tracks exist.
    fn recompute_flags(&mut self) {
        let has_live = |kind: TrackKind| {
            self.stream.as_ref().is_some_and(|s| {
                s.tracks()
                    .iter()
                    .any(|t| t.kind() == kind && t.is_live() && t.is_enabled())
            })
        };
        self.is_muted = !has_live(TrackKind::Audio);
        self.is_camera_off = !has_live(TrackKind::Video);
        self.publish();
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state());
    }
}

impl Drop for MediaSession {
    fn drop(&mut self) {
        self.release();
    }
}
