use async_trait::async_trait;
use serde::Serialize;

use super::{MediaStream, TrackKind};
use crate::error::DeviceError;

/// Device info returned to the UI for device pickers.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub label: String,
    pub kind: TrackKind,
    pub is_default: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackConstraint {
    /// `None` selects the system default device.
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: Option<TrackConstraint>,
    pub video: Option<TrackConstraint>,
}

impl MediaConstraints {
    pub fn audio_video() -> Self {
        Self {
            audio: Some(TrackConstraint::default()),
            video: Some(TrackConstraint::default()),
        }
    }

    pub fn audio_only(device_id: Option<&str>) -> Self {
        Self {
            audio: Some(TrackConstraint { device_id: device_id.map(str::to_string) }),
            video: None,
        }
    }

    pub fn video_only(device_id: Option<&str>) -> Self {
        Self {
            audio: None,
            video: Some(TrackConstraint { device_id: device_id.map(str::to_string) }),
        }
    }
}

/// Capture capability provided by the runtime (browser, native capture, test fake).
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Capture camera and/or microphone tracks matching `constraints`.
    async fn get_user_media(&self, constraints: &MediaConstraints) -> Result<MediaStream, DeviceError>;

    /// Ask the user for a screen or window. Returns `DeviceError::Cancelled`
    /// when the picker is dismissed.
    async fn get_display_media(&self) -> Result<MediaStream, DeviceError>;

    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        Ok(Vec::new())
    }
}
