use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:9847/api";
pub const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:9848/ws";

/// Endpoints and timing constants for one call room session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    pub api_base_url: String,
    pub signaling_url: String,
    pub poll_interval_ms: u64,
    pub guidance_interval_ms: u64,
    pub timer_tick_ms: u64,
    /// Lower bound on how long the "saving" screen stays up at end of call.
    pub min_saving_ms: u64,
    /// Pause between stopping old tracks and requesting new ones on a device switch.
    pub device_release_delay_ms: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            poll_interval_ms: 5_000,
            guidance_interval_ms: 5_000,
            timer_tick_ms: 1_000,
            min_saving_ms: 4_000,
            device_release_delay_ms: 300,
            reconnect_base_ms: 500,
            reconnect_max_ms: 10_000,
        }
    }
}

impl CallConfig {
    /// Defaults, with endpoint URLs taken from `CALLROOM_API_URL` and
    /// `CALLROOM_SIGNALING_URL` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("CALLROOM_API_URL") {
            config.api_base_url = url;
        }
        if let Ok(url) = std::env::var("CALLROOM_SIGNALING_URL") {
            config.signaling_url = url;
        }
        config
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn guidance_interval(&self) -> Duration {
        Duration::from_millis(self.guidance_interval_ms)
    }

    pub fn timer_tick(&self) -> Duration {
        Duration::from_millis(self.timer_tick_ms)
    }

    pub fn min_saving_duration(&self) -> Duration {
        Duration::from_millis(self.min_saving_ms)
    }

    pub fn device_release_delay(&self) -> Duration {
        Duration::from_millis(self.device_release_delay_ms)
    }

    pub fn reconnect_policy(&self) -> crate::signaling::ReconnectPolicy {
        crate::signaling::ReconnectPolicy {
            base: Duration::from_millis(self.reconnect_base_ms),
            max: Duration::from_millis(self.reconnect_max_ms),
        }
    }
}
