//! Settings types.
//!
//! Every struct uses `#[serde(rename_all = "camelCase", default)]` so a
//! partial settings file only has to name the keys it changes.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThinClientSettings {
    /// Backend address.
    pub server: ServerSettings,
    /// Device identity.
    pub client: ClientSettings,
    /// Reconnection backoff.
    pub reconnect: ReconnectSettings,
    /// Sandbox bridge timing.
    pub bridge: BridgeSettings,
    /// Microphone capture format.
    pub audio: MicConfig,
    /// Input handling.
    pub input: InputSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl ThinClientSettings {
    /// Reject combinations the runtime cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.reconnect.base_delay_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "reconnect.baseDelayMs must be positive".into(),
            ));
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(SettingsError::InvalidValue(
                "reconnect.maxDelayMs below reconnect.baseDelayMs".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter_factor) {
            return Err(SettingsError::InvalidValue(
                "reconnect.jitterFactor must be within [0, 1]".into(),
            ));
        }
        if self.audio.bytes_per_sample == 0 || self.audio.channel_count == 0 {
            return Err(SettingsError::InvalidValue(
                "audio format fields must be positive".into(),
            ));
        }
        if self.bridge.clock_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "bridge.clockIntervalMs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Where the backend lives. Both halves may be missing at startup.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Backend host name or IP.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Backend port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Device identity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Client id; unset until the backend or the user assigns one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

/// Capped exponential backoff parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Upper bound for any single delay.
    pub max_delay_ms: u64,
    /// Fraction of the delay randomized in either direction.
    pub jitter_factor: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_factor: 0.2,
        }
    }
}

/// Sandbox bridge timing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    /// Delay after mount before the initial state snapshot is pushed.
    pub initial_snapshot_delay_ms: u64,
    /// Wall-clock refresh period.
    pub clock_interval_ms: u64,
    /// Format the clock as `HH:MM` instead of `h:MM AM`.
    pub use_24_hour_clock: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            initial_snapshot_delay_ms: 1_000,
            clock_interval_ms: 1_000,
            use_24_hour_clock: false,
        }
    }
}

/// Microphone capture format requested from the capture backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MicConfig {
    /// Samples per second.
    pub sample_rate: u32,
    /// Interleaved channels.
    pub channel_count: u16,
    /// Bytes per sample per channel.
    pub bytes_per_sample: u16,
    /// Audio duration per emitted chunk.
    pub seconds_per_chunk: u32,
}

impl Default for MicConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channel_count: 1,
            bytes_per_sample: 2,
            seconds_per_chunk: 1,
        }
    }
}

impl MicConfig {
    /// Bytes in one full chunk.
    pub fn chunk_bytes(&self) -> u64 {
        u64::from(self.sample_rate)
            * u64::from(self.channel_count)
            * u64::from(self.bytes_per_sample)
            * u64::from(self.seconds_per_chunk)
    }
}

/// Input handling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InputSettings {
    /// Hold time after which a press counts as long.
    pub long_press_ms: u64,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self { long_press_ms: 400 }
    }
}

/// Log output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}
