use thiserror::Error;

/// Failure reported by a device capability (camera, microphone, display capture).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("no {0} device found")]
    NotFound(String),

    /// The user dismissed the picker. Not an error for callers that expect it.
    #[error("request cancelled by user")]
    Cancelled,

    #[error("device unavailable: {0}")]
    Unavailable(String),
}

/// Device acquisition failed. User-visible; only retried on explicit user action.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaAccessError {
    #[error("camera/microphone permission was denied")]
    PermissionDenied,

    #[error("no {0} device was found")]
    NotFound(String),

    #[error("media devices are unavailable: {0}")]
    Unavailable(String),
}

impl From<DeviceError> for MediaAccessError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::PermissionDenied => MediaAccessError::PermissionDenied,
            DeviceError::NotFound(kind) => MediaAccessError::NotFound(kind),
            DeviceError::Cancelled => MediaAccessError::Unavailable("request cancelled".into()),
            DeviceError::Unavailable(msg) => MediaAccessError::Unavailable(msg),
        }
    }
}

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("signaling connect failed: {0}")]
    Connect(String),

    #[error("signaling client is not connected")]
    NotConnected,

    #[error("signaling transport closed")]
    Closed,

    #[error("signal encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A single REST call failed. Always caught and logged by the caller.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{path} returned status {status}")]
    Status { status: u16, path: String },

    #[error("response decode error: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("a recording is already active")]
    AlreadyActive,

    #[error("no recording is active")]
    NotRecording,

    #[error("stream has no tracks to record")]
    NoTracks,

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("recording upload failed: {0}")]
    Upload(#[from] ApiError),
}

#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("speech recognition failed to start: {0}")]
    Start(String),

    #[error("no audio track available for transcription")]
    NoAudioTrack,
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error(transparent)]
    Media(#[from] MediaAccessError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Recording(#[from] RecordingError),

    #[error(transparent)]
    Transcription(#[from] TranscriptionError),

    #[error("call room is closed")]
    Closed,

    #[error("only the host can {0}")]
    NotHost(&'static str),
}
