use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::channels::ChannelStatsSnapshot;
use crate::filters::fusion_ahrs::FusionFlags;
use crate::processor::ProcessorStats;
use crate::types::TelemetrySnapshot;

#[derive(Serialize, Clone, Debug)]
pub struct ChannelStatus {
    pub name: String,
    pub active: bool,
    #[serde(flatten)]
    pub stats: ChannelStatsSnapshot,
}

#[derive(Serialize, Clone, Debug)]
pub struct LiveStatus {
    pub timestamp: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub source: String,
    // Producer
    pub cycles: u64,
    pub clamped_deltas: u64,
    pub gyro_resets: u64,
    // Fusion engine
    pub fusion: FusionFlags,
    // Channels
    pub wireless_connected: bool,
    pub channels: Vec<ChannelStatus>,
    pub last_snapshot: TelemetrySnapshot,
}

impl LiveStatus {
    pub fn new(source: &str) -> Self {
        let now = Utc::now();
        Self {
            timestamp: now,
            started_at: now,
            uptime_seconds: 0,
            source: source.to_string(),
            cycles: 0,
            clamped_deltas: 0,
            gyro_resets: 0,
            fusion: FusionFlags::default(),
            wireless_connected: false,
            channels: Vec::new(),
            last_snapshot: TelemetrySnapshot::default(),
        }
    }

    pub fn record_processor(&mut self, stats: ProcessorStats, fusion: FusionFlags) {
        self.cycles = stats.cycles;
        self.clamped_deltas = stats.clamped_deltas;
        self.gyro_resets = stats.resets;
        self.fusion = fusion;
    }

    /// Stamp the document with the current time.
    pub fn touch(&mut self) {
        self.timestamp = Utc::now();
        self.uptime_seconds = (self.timestamp - self.started_at).num_seconds().max(0) as u64;
    }

    pub fn summary(&self) -> String {
        let transmitted: Vec<String> = self
            .channels
            .iter()
            .map(|c| {
                format!(
                    "{}={}{}",
                    c.name,
                    c.stats.transmitted,
                    if c.active { "" } else { "(off)" }
                )
            })
            .collect();
        format!(
            "cycles={} clamped={} resets={} yaw(fused)={:.1} yaw(gyro)={:.1} tx[{}]",
            self.cycles,
            self.clamped_deltas,
            self.gyro_resets,
            self.last_snapshot.fusion.yaw,
            self.last_snapshot.accumulated_gyro.yaw,
            transmitted.join(" ")
        )
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_writes_json() {
        let mut status = LiveStatus::new("simulated");
        status.cycles = 42;
        status.channels.push(ChannelStatus {
            name: "serial".to_string(),
            active: false,
            stats: ChannelStatsSnapshot {
                updates: 42,
                transmitted: 40,
                failures: 0,
            },
        });
        status.touch();

        let path = std::env::temp_dir().join(format!(
            "motion_telemetry_status_{}.json",
            std::process::id()
        ));
        status.save(&path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["cycles"], 42);
        assert_eq!(value["channels"][0]["transmitted"], 40);
        assert_eq!(value["fusion"]["initialising"], false);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_summary_marks_inactive_channels() {
        let mut status = LiveStatus::new("simulated");
        status.channels.push(ChannelStatus {
            name: "serial".to_string(),
            active: false,
            stats: ChannelStatsSnapshot::default(),
        });
        assert!(status.summary().contains("serial=0(off)"));
    }
}
