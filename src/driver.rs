use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::time::{interval, MissedTickBehavior};

use crate::channels::wireless::ConnectionFlag;
use crate::channels::ChannelHandle;
use crate::config::TelemetryConfig;
use crate::error::{TelemetryError, TelemetryResult};
use crate::live_status::{ChannelStatus, LiveStatus};
use crate::processor::{OrientationProcessor, ProcessorHandle, ProcessorStats};
use crate::sensors::SampleSource;
use crate::types::TelemetrySnapshot;

/// Microseconds since construction, truncated to 32 bits like a hardware timer.
#[derive(Clone, Copy, Debug)]
pub struct BootClock {
    started: Instant,
}

impl BootClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn now_micros(&self) -> u32 {
        self.started.elapsed().as_micros() as u32
    }
}

impl Default for BootClock {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
pub struct RunOptions {
    pub sample_period: Duration,
    /// Stop after this long; `None` runs until the source is exhausted.
    pub duration: Option<Duration>,
    pub status_file: Option<PathBuf>,
    pub status_interval: Duration,
}

impl From<&TelemetryConfig> for RunOptions {
    fn from(config: &TelemetryConfig) -> Self {
        Self {
            sample_period: config.sample_period(),
            duration: (config.duration_secs > 0)
                .then(|| Duration::from_secs(config.duration_secs)),
            status_file: config.status_file.clone(),
            status_interval: Duration::from_secs(config.status_interval_secs.max(1)),
        }
    }
}

/// Pulls one sample per tick and fans the snapshot out to every channel.
pub struct Driver<S: SampleSource> {
    source: S,
    processor: OrientationProcessor,
    clock: BootClock,
    channels: Vec<ChannelHandle>,
    connections: Vec<ConnectionFlag>,
    status: LiveStatus,
    read_failures: u64,
}

impl<S: SampleSource> Driver<S> {
    pub fn new(source: S, processor: OrientationProcessor) -> Self {
        let status = LiveStatus::new(source.name());
        Self {
            source,
            processor,
            clock: BootClock::new(),
            channels: Vec::new(),
            connections: Vec::new(),
            status,
            read_failures: 0,
        }
    }

    pub fn add_channel(&mut self, channel: ChannelHandle) {
        self.channels.push(channel);
    }

    /// Keep `channel` active only while `connection` reports no peer. The
    /// switch happens on the connection change itself, not on the next tick.
    pub fn link_exclusive(&mut self, connection: ConnectionFlag, channel: ChannelHandle) {
        connection.suppress_while_connected(channel);
        self.connections.push(connection);
    }

    pub fn processor_handle(&self) -> ProcessorHandle {
        self.processor.handle()
    }

    pub fn processor(&self) -> &OrientationProcessor {
        &self.processor
    }

    /// One producer cycle. `Ok(None)` once the source is exhausted.
    pub fn step(&mut self) -> TelemetryResult<Option<TelemetrySnapshot>> {
        let now = self.clock.now_micros();
        let Some(sample) = self.source.read(now)? else {
            return Ok(None);
        };

        let snapshot = self.processor.advance(&sample, sample.timestamp_micros);
        for channel in &self.channels {
            channel.update(snapshot);
        }
        Ok(Some(snapshot))
    }

    pub fn status(&mut self) -> &LiveStatus {
        self.status
            .record_processor(self.processor.stats(), self.processor.fusion_flags());
        self.status.wireless_connected = self.connections.iter().any(|c| c.get());
        self.status.channels = self
            .channels
            .iter()
            .map(|c| ChannelStatus {
                name: c.name().to_string(),
                active: c.is_active(),
                stats: c.stats(),
            })
            .collect();
        self.status.last_snapshot = self.processor.last_snapshot();
        self.status.touch();
        &self.status
    }

    fn report_status(&mut self, status_file: Option<&PathBuf>) {
        let status = self.status();
        info!("[status] {}", status.summary());
        if let Some(path) = status_file {
            if let Err(e) = status.save(path) {
                warn!("Failed to write status file {}: {}", path.display(), e);
            }
        }
    }

    /// Run the fixed-rate loop until the duration elapses or the source runs dry.
    pub async fn run(&mut self, options: &RunOptions) -> Result<ProcessorStats> {
        let mut ticker = interval(options.sample_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let started = Instant::now();
        let mut last_status = Instant::now();

        info!(
            "Producer running at {:?} period from {} source",
            options.sample_period,
            self.source.name()
        );

        loop {
            ticker.tick().await;

            match self.step() {
                Ok(Some(_)) => {}
                Ok(None) => {
                    info!("Sample source exhausted");
                    break;
                }
                Err(TelemetryError::SensorRead(msg)) => {
                    // Transient: skip this cycle and keep going
                    self.read_failures += 1;
                    if self.read_failures % 100 == 1 {
                        warn!(
                            "Sensor read failed ({} total): {}",
                            self.read_failures, msg
                        );
                    }
                }
                Err(e) => {
                    error!("Producer stopped: {}", e);
                    return Err(e).context("producer cycle failed");
                }
            }

            if last_status.elapsed() >= options.status_interval {
                self.report_status(options.status_file.as_ref());
                last_status = Instant::now();
            }

            if let Some(limit) = options.duration {
                if started.elapsed() >= limit {
                    break;
                }
            }
        }

        self.report_status(options.status_file.as_ref());
        Ok(self.processor.stats())
    }
}
