pub mod devices;
pub mod session;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub use devices::{DeviceInfo, MediaConstraints, MediaDevices, TrackConstraint};
pub use session::MediaSession;

/// Frames buffered per track for slow subscribers.
const TRACK_FRAME_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    /// Tag byte used when framing this track's data in a recording.
    pub fn frame_tag(&self) -> u8 {
        match self {
            TrackKind::Audio => b'A',
            TrackKind::Video => b'V',
        }
    }

    pub fn from_frame_tag(tag: u8) -> Option<Self> {
        match tag {
            b'A' => Some(TrackKind::Audio),
            b'V' => Some(TrackKind::Video),
            _ => None,
        }
    }
}

struct TrackInner {
    id: String,
    kind: TrackKind,
    device_id: Option<String>,
    label: String,
    enabled: AtomicBool,
    live: AtomicBool,
    frames: broadcast::Sender<Bytes>,
}

/// Handle to one captured track. Clones share state, so consumers observe
/// mute and stop performed by the owning [`MediaSession`].
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, device_id: Option<String>, label: impl Into<String>) -> Self {
        let (frames, _) = broadcast::channel(TRACK_FRAME_BUFFER);
        Self {
            inner: Arc::new(TrackInner {
                id: Uuid::new_v4().to_string(),
                kind,
                device_id,
                label: label.into(),
                enabled: AtomicBool::new(true),
                live: AtomicBool::new(true),
                frames,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn device_id(&self) -> Option<&str> {
        self.inner.device_id.as_deref()
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Relaxed)
    }

    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::Relaxed)
    }

    /// Mute/unmute in place. The track keeps running.
    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Relaxed);
    }

    /// End the track and release the device. Idempotent.
    pub(crate) fn stop(&self) {
        self.inner.live.store(false, Ordering::Relaxed);
    }

    /// Called by the device backend for each captured frame. Frames from a
    /// disabled or stopped track are dropped.
    pub fn push_frame(&self, data: Bytes) -> bool {
        if !self.is_live() || !self.is_enabled() {
            return false;
        }
        let _ = self.inner.frames.send(data);
        true
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.inner.frames.subscribe()
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("device_id", &self.inner.device_id)
            .field("enabled", &self.is_enabled())
            .field("live", &self.is_live())
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MediaStream {
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }

    pub fn first_audio(&self) -> Option<MediaTrack> {
        self.audio_tracks().next().cloned()
    }

    pub fn into_tracks(self) -> Vec<MediaTrack> {
        self.tracks
    }

    pub(crate) fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Snapshot of local media toggles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MediaState {
    pub has_stream: bool,
    pub is_muted: bool,
    pub is_camera_off: bool,
    pub is_screen_sharing: bool,
    pub audio_device_id: Option<String>,
    pub video_device_id: Option<String>,
}
