use std::f32::consts::PI;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use log::info;

use crate::error::{TelemetryError, TelemetryResult};
use crate::types::{Axes, InertialSample};

/// Anything that can be polled once per producer cycle for an inertial sample.
pub trait SampleSource: Send {
    /// Bring the device up. Failure here is fatal to the whole pipeline.
    fn init(&mut self) -> TelemetryResult<()>;

    /// Read one sample stamped with `now_micros`. `Ok(None)` means the source
    /// is exhausted and the producer should stop.
    fn read(&mut self, now_micros: u32) -> TelemetryResult<Option<InertialSample>>;

    fn name(&self) -> &str;
}

impl SampleSource for Box<dyn SampleSource> {
    fn init(&mut self) -> TelemetryResult<()> {
        (**self).init()
    }

    fn read(&mut self, now_micros: u32) -> TelemetryResult<Option<InertialSample>> {
        (**self).read(now_micros)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

// ── Simulated IMU ────────────────────────────────────────────────────────────

/// Level device turning about z at a constant rate, with slight hand tremor.
pub struct SimulatedImu {
    yaw_rate_dps: f32,
    gyro_bias: Axes,
    tremor: f32,
    initialised: bool,
}

impl SimulatedImu {
    pub fn new(yaw_rate_dps: f32) -> Self {
        Self {
            yaw_rate_dps,
            gyro_bias: Axes::ZERO,
            tremor: 0.02,
            initialised: false,
        }
    }

    /// Constant zero-rate offset added to every gyro reading, in deg/s.
    pub fn with_gyro_bias(mut self, bias: Axes) -> Self {
        self.gyro_bias = bias;
        self
    }

    pub fn without_tremor(mut self) -> Self {
        self.tremor = 0.0;
        self
    }
}

impl SampleSource for SimulatedImu {
    fn init(&mut self) -> TelemetryResult<()> {
        self.initialised = true;
        info!(
            "Simulated IMU ready (yaw rate {:.1} deg/s)",
            self.yaw_rate_dps
        );
        Ok(())
    }

    fn read(&mut self, now_micros: u32) -> TelemetryResult<Option<InertialSample>> {
        if !self.initialised {
            return Err(TelemetryError::SensorRead(
                "simulated IMU read before init".to_string(),
            ));
        }
        let t = now_micros as f32 / 1_000_000.0;

        Ok(Some(InertialSample {
            accel: Axes::new(
                (t * 2.0 * PI).sin() * self.tremor,
                (t * 2.0 * PI).cos() * self.tremor,
                1.0,
            ),
            gyro: Axes::new(
                self.gyro_bias.x + (t * 3.0 * PI).sin() * self.tremor,
                self.gyro_bias.y + (t * 3.0 * PI).cos() * self.tremor,
                self.gyro_bias.z + self.yaw_rate_dps,
            ),
            temperature_c: 25.0 + (t * 0.01).sin() * 0.5,
            timestamp_micros: now_micros,
        }))
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

// ── Replay ───────────────────────────────────────────────────────────────────

/// Newline-delimited JSON `InertialSample`s, replayed in order.
///
/// Recorded timestamps are kept so runs are deterministic; `now_micros` is
/// ignored.
pub struct ReplaySource {
    path: PathBuf,
    lines: Option<Lines<BufReader<File>>>,
    line_no: usize,
}

impl ReplaySource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lines: None,
            line_no: 0,
        }
    }
}

impl SampleSource for ReplaySource {
    fn init(&mut self) -> TelemetryResult<()> {
        let file = File::open(&self.path).map_err(|e| {
            TelemetryError::SensorInit(format!("{}: {}", self.path.display(), e))
        })?;
        self.lines = Some(BufReader::new(file).lines());
        self.line_no = 0;
        info!("Replaying samples from {}", self.path.display());
        Ok(())
    }

    fn read(&mut self, _now_micros: u32) -> TelemetryResult<Option<InertialSample>> {
        let lines = self
            .lines
            .as_mut()
            .ok_or_else(|| TelemetryError::SensorRead("replay read before init".to_string()))?;

        for line in lines.by_ref() {
            self.line_no += 1;
            let line = line.map_err(|e| TelemetryError::SensorRead(e.to_string()))?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let sample = serde_json::from_str(trimmed).map_err(|e| {
                TelemetryError::SensorRead(format!("line {}: {}", self.line_no, e))
            })?;
            return Ok(Some(sample));
        }
        Ok(None)
    }

    fn name(&self) -> &str {
        "replay"
    }
}
