// Centralize all configuration constants
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{TelemetryError, TelemetryResult};

// ── Producer timing ──────────────────────────────────────────────────────────
pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 200;
/// One sample per microsecond; the producer period cannot go below that.
pub const MAX_SAMPLE_RATE_HZ: u32 = 1_000_000;
/// Elapsed times above this are treated as a stall and replaced.
pub const MAX_DELTA_TIME_SECS: f32 = 0.1;
pub const FALLBACK_DELTA_TIME_SECS: f32 = 0.01;

// ── Channel workers ──────────────────────────────────────────────────────────
/// ~100 Hz per channel.
pub const CHANNEL_TARGET_PERIOD_MS: u64 = 10;
pub const INACTIVE_POLL_MS: u64 = 100;
pub const MIN_WORKER_SLEEP_MS: u64 = 1;

// ── Command ingestion ────────────────────────────────────────────────────────
pub const COMMAND_LINE_MAX: usize = 128;

// ── Host transports ──────────────────────────────────────────────────────────
pub const DEFAULT_UDP_BIND: &str = "127.0.0.1:47900";
pub const WIRELESS_CONNECTION_TIMEOUT_SECS: u64 = 3;
pub const STATUS_INTERVAL_SECS: u64 = 2;

/// Attitude filter settings. Configuration only; the algorithm is fixed and
/// has no magnetometer input.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionSettings {
    pub gain: f32,
    /// Gyroscope full-scale range in deg/s.
    pub gyroscope_range: f32,
    /// Acceleration rejection threshold in degrees.
    pub acceleration_rejection: f32,
    /// Cycles of sustained rejection before the filter re-anchors.
    pub recovery_trigger_period: u32,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            gain: 0.5,
            gyroscope_range: 2000.0,
            acceleration_rejection: 10.0,
            recovery_trigger_period: 1000,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Simulated,
    Replay,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    // ── Producer ──
    pub sample_rate_hz: u32,
    pub duration_secs: u64,
    pub fusion: FusionSettings,

    // ── Sample source ──
    pub source: SourceKind,
    pub replay_path: Option<PathBuf>,
    pub simulated_yaw_rate_dps: f32,

    // ── Channels ──
    pub channel_period_ms: u64,
    pub serial_enabled: bool,
    pub wireless_enabled: bool,
    pub udp_bind: String,
    pub wireless_timeout_secs: u64,

    // ── Status ──
    pub status_file: Option<PathBuf>,
    pub status_interval_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            duration_secs: 0,
            fusion: FusionSettings::default(),
            source: SourceKind::Simulated,
            replay_path: None,
            simulated_yaw_rate_dps: 0.0,
            channel_period_ms: CHANNEL_TARGET_PERIOD_MS,
            serial_enabled: true,
            wireless_enabled: true,
            udp_bind: DEFAULT_UDP_BIND.to_string(),
            wireless_timeout_secs: WIRELESS_CONNECTION_TIMEOUT_SECS,
            status_file: None,
            status_interval_secs: STATUS_INTERVAL_SECS,
        }
    }
}

impl TelemetryConfig {
    /// Load from a JSON file; missing fields keep their defaults.
    pub fn load(path: &Path) -> TelemetryResult<Self> {
        let text = fs::read_to_string(path)?;
        let config: TelemetryConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TelemetryResult<()> {
        if self.sample_rate_hz == 0 {
            return Err(TelemetryError::Config(
                "sample_rate_hz must be positive".to_string(),
            ));
        }
        if self.sample_rate_hz > MAX_SAMPLE_RATE_HZ {
            return Err(TelemetryError::Config(format!(
                "sample_rate_hz must not exceed {}",
                MAX_SAMPLE_RATE_HZ
            )));
        }
        if self.channel_period_ms == 0 {
            return Err(TelemetryError::Config(
                "channel_period_ms must be positive".to_string(),
            ));
        }
        if self.source == SourceKind::Replay && self.replay_path.is_none() {
            return Err(TelemetryError::Config(
                "replay source requires replay_path".to_string(),
            ));
        }
        if self.fusion.gain < 0.0 {
            return Err(TelemetryError::Config(
                "fusion.gain must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn sample_period(&self) -> Duration {
        let rate = self.sample_rate_hz.clamp(1, MAX_SAMPLE_RATE_HZ);
        Duration::from_micros(1_000_000 / u64::from(rate))
    }

    pub fn channel_period(&self) -> Duration {
        Duration::from_millis(self.channel_period_ms)
    }

    pub fn wireless_timeout(&self) -> Duration {
        Duration::from_secs(self.wireless_timeout_secs)
    }
}
