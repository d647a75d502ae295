use crossbeam::channel::{unbounded, Receiver, Sender};
use log::debug;
use serde::Serialize;

use crate::command::Command;
use crate::config::{FusionSettings, FALLBACK_DELTA_TIME_SECS, MAX_DELTA_TIME_SECS};
use crate::filters::fusion_ahrs::{FusionAhrs, FusionEngine, FusionFlags};
use crate::filters::gyro_integrator::GyroIntegrator;
use crate::types::{EulerAngles, InertialSample, TelemetrySnapshot, Vec3};

const MAX_DELTA_MICROS: i64 = (MAX_DELTA_TIME_SECS * 1_000_000.0) as i64;

/// Elapsed seconds between two boot-clock readings.
///
/// Zero, negative (counter wrap or a stale `last`) or stalled (> 0.1 s)
/// intervals are replaced by the fallback step. The flag reports whether the
/// fallback was used.
pub fn guarded_delta_time(last_micros: u32, now_micros: u32) -> (f32, bool) {
    let elapsed = i64::from(now_micros) - i64::from(last_micros);
    if elapsed <= 0 || elapsed > MAX_DELTA_MICROS {
        (FALLBACK_DELTA_TIME_SECS, true)
    } else {
        (elapsed as f32 / 1_000_000.0, false)
    }
}

/// Cloneable way for other tasks to request processor actions.
#[derive(Clone, Debug)]
pub struct ProcessorHandle {
    commands: Sender<Command>,
}

impl ProcessorHandle {
    /// A handle with no processor behind it, plus the receiving end.
    pub fn detached() -> (Self, Receiver<Command>) {
        let (commands, rx) = unbounded();
        (Self { commands }, rx)
    }

    pub fn reset_gyro_integration(&self) {
        self.send(Command::ResetGyro);
    }

    pub fn send(&self, command: Command) {
        // Receiver gone means the producer has stopped; nothing left to reset
        let _ = self.commands.send(command);
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct ProcessorStats {
    pub cycles: u64,
    pub clamped_deltas: u64,
    pub resets: u64,
}

/// Owns both estimators. Only the producer loop touches it; everyone else
/// goes through a `ProcessorHandle`.
pub struct OrientationProcessor<E: FusionEngine = FusionAhrs> {
    engine: E,
    integrator: GyroIntegrator,
    last_micros: u32,
    commands_rx: Receiver<Command>,
    commands_tx: Sender<Command>,
    stats: ProcessorStats,
    last_snapshot: TelemetrySnapshot,
}

impl OrientationProcessor<FusionAhrs> {
    pub fn new(settings: FusionSettings, sample_rate_hz: u32) -> Self {
        Self::with_engine(FusionAhrs::new(settings, sample_rate_hz))
    }
}

impl<E: FusionEngine> OrientationProcessor<E> {
    pub fn with_engine(engine: E) -> Self {
        let (commands_tx, commands_rx) = unbounded();
        Self {
            engine,
            integrator: GyroIntegrator::default(),
            last_micros: 0,
            commands_rx,
            commands_tx,
            stats: ProcessorStats::default(),
            last_snapshot: TelemetrySnapshot::default(),
        }
    }

    pub fn handle(&self) -> ProcessorHandle {
        ProcessorHandle {
            commands: self.commands_tx.clone(),
        }
    }

    /// Run one cycle: correct the rate, update both estimators, build the snapshot.
    pub fn advance(&mut self, sample: &InertialSample, now_micros: u32) -> TelemetrySnapshot {
        self.apply_pending_commands();

        let (delta_time, clamped) = guarded_delta_time(self.last_micros, now_micros);
        if clamped {
            self.stats.clamped_deltas += 1;
            if self.stats.clamped_deltas % 100 == 1 {
                debug!(
                    "Delta time clamped to {}s ({} -> {} µs, {} total)",
                    FALLBACK_DELTA_TIME_SECS,
                    self.last_micros,
                    now_micros,
                    self.stats.clamped_deltas
                );
            }
        }

        let accel: Vec3 = sample.accel.into();
        let corrected = self.engine.update_offset(sample.gyro.into());
        self.engine.update(corrected, accel, delta_time);
        let fusion = self.engine.euler();
        let accumulated_gyro = self.integrator.step(corrected, delta_time);

        self.last_micros = now_micros;
        self.stats.cycles += 1;

        self.last_snapshot = TelemetrySnapshot {
            accel: sample.accel,
            gyro: corrected.into(),
            accumulated_gyro,
            fusion,
            temperature_c: sample.temperature_c,
            time_sec: now_micros as f32 / 1_000_000.0,
        };
        self.last_snapshot
    }

    /// Zero the dead-reckoned attitude. The fusion engine is untouched.
    pub fn reset_gyro_integration(&mut self) {
        self.integrator.reset();
        self.last_snapshot.accumulated_gyro = EulerAngles::ZERO;
        self.stats.resets += 1;
    }

    /// Apply commands queued through handles. Returns how many were applied.
    pub fn apply_pending_commands(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(command) = self.commands_rx.try_recv() {
            match command {
                Command::ResetGyro => self.reset_gyro_integration(),
            }
            applied += 1;
        }
        applied
    }

    pub fn accumulated_gyro(&self) -> EulerAngles {
        self.integrator.angles()
    }

    pub fn fusion(&self) -> EulerAngles {
        self.engine.euler()
    }

    pub fn fusion_flags(&self) -> FusionFlags {
        self.engine.flags()
    }

    pub fn stats(&self) -> ProcessorStats {
        self.stats
    }

    pub fn last_snapshot(&self) -> TelemetrySnapshot {
        self.last_snapshot
    }
}
