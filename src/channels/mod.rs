//! Telemetry channels
//!
//! The producer overwrites a channel's latest snapshot and marks it dirty. A
//! dedicated worker thread wakes at a fixed target period and, when the buffer
//! is dirty, clears the flag and transmits while still holding the lock. Each
//! snapshot is sent at most once and never half-updated.

pub mod serial;
pub mod wireless;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::Serialize;

use crate::config::{INACTIVE_POLL_MS, MIN_WORKER_SLEEP_MS};
use crate::error::{TelemetryError, TelemetryResult};
use crate::types::TelemetrySnapshot;

/// Concrete wire format and medium of a channel.
///
/// Called by the worker with the channel lock held. Implementations also
/// drain their inbound command path here.
pub trait Transmit: Send + 'static {
    fn transmit(&mut self, snapshot: &TelemetrySnapshot) -> TelemetryResult<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    Inactive,
    /// Active, but nothing new since the last transmission.
    Idle,
    Transmitted,
    Failed,
}

#[derive(Debug, Default)]
struct BufferState {
    last_snapshot: TelemetrySnapshot,
    dirty: bool,
}

#[derive(Debug, Default)]
pub struct ChannelStats {
    updates: AtomicU64,
    transmitted: AtomicU64,
    failures: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStatsSnapshot {
    pub updates: u64,
    pub transmitted: u64,
    pub failures: u64,
}

impl ChannelStats {
    pub fn snapshot(&self) -> ChannelStatsSnapshot {
        ChannelStatsSnapshot {
            updates: self.updates.load(Ordering::Relaxed),
            transmitted: self.transmitted.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Latest snapshot plus dirty flag under one lock, and the activation switch.
#[derive(Debug, Default)]
pub struct ChannelBuffer {
    state: Mutex<BufferState>,
    active: AtomicBool,
    stats: ChannelStats,
}

impl ChannelBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        // The state is a plain value copy; a panicked holder cannot tear it
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Producer side: overwrite the latest snapshot and mark it dirty.
    pub fn write(&self, snapshot: TelemetrySnapshot) {
        let mut state = self.lock();
        state.last_snapshot = snapshot;
        state.dirty = true;
        self.stats.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    /// One worker iteration, minus the sleep.
    pub fn cycle<T: Transmit + ?Sized>(&self, transmitter: &mut T) -> CycleOutcome {
        if !self.is_active() {
            return CycleOutcome::Inactive;
        }

        let mut state = self.lock();
        if !state.dirty {
            return CycleOutcome::Idle;
        }
        state.dirty = false;

        match transmitter.transmit(&state.last_snapshot) {
            Ok(()) => {
                self.stats.transmitted.fetch_add(1, Ordering::Relaxed);
                CycleOutcome::Transmitted
            }
            Err(_) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                CycleOutcome::Failed
            }
        }
    }

    pub fn stats(&self) -> ChannelStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Sleep that keeps the worker near its target period.
pub fn pacing_delay(period: Duration, elapsed: Duration) -> Duration {
    period
        .saturating_sub(elapsed)
        .max(Duration::from_millis(MIN_WORKER_SLEEP_MS))
}

/// Producer-side view of a channel. Cheap to clone.
#[derive(Clone, Debug)]
pub struct ChannelHandle {
    name: &'static str,
    buffer: Arc<ChannelBuffer>,
}

impl ChannelHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn update(&self, snapshot: TelemetrySnapshot) {
        self.buffer.write(snapshot);
    }

    pub fn set_active(&self, active: bool) {
        if self.buffer.is_active() != active {
            debug!("[{}] active -> {}", self.name, active);
        }
        self.buffer.set_active(active);
    }

    pub fn is_active(&self) -> bool {
        self.buffer.is_active()
    }

    pub fn stats(&self) -> ChannelStatsSnapshot {
        self.buffer.stats()
    }
}

pub struct Channel<T: Transmit> {
    name: &'static str,
    buffer: Arc<ChannelBuffer>,
    transmitter: Option<T>,
    period: Duration,
}

impl<T: Transmit> Channel<T> {
    pub fn new(name: &'static str, transmitter: T, period: Duration) -> Self {
        Self {
            name,
            buffer: Arc::new(ChannelBuffer::new()),
            transmitter: Some(transmitter),
            period,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn handle(&self) -> ChannelHandle {
        ChannelHandle {
            name: self.name,
            buffer: Arc::clone(&self.buffer),
        }
    }

    pub fn update(&self, snapshot: TelemetrySnapshot) {
        self.buffer.write(snapshot);
    }

    pub fn set_active(&self, active: bool) {
        self.handle().set_active(active);
    }

    /// Stop transmitting. The worker keeps polling and resumes on `set_active(true)`.
    pub fn end(&self) {
        self.set_active(false);
    }

    pub fn is_active(&self) -> bool {
        self.buffer.is_active()
    }

    /// Mark the channel active and start its worker thread.
    ///
    /// Transmission does blocking I/O, so workers get their own threads and
    /// stay off the async runtime.
    pub fn begin(&mut self) -> TelemetryResult<Worker> {
        let mut transmitter = self
            .transmitter
            .take()
            .ok_or_else(|| TelemetryError::AlreadyRunning(self.name.to_string()))?;
        self.buffer.set_active(true);

        let name = self.name;
        let buffer = Arc::clone(&self.buffer);
        let period = self.period;
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&shutdown);

        let thread = thread::Builder::new()
            .name(format!("{}-worker", name))
            .spawn(move || run_worker(name, &buffer, &mut transmitter, period, &stop))?;

        Ok(Worker {
            name,
            shutdown,
            thread: Some(thread),
        })
    }
}

/// Running channel worker. Dropping it stops the thread.
pub struct Worker {
    name: &'static str,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Ask the worker to exit after its current cycle and wait for it.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("[{}] worker panicked", self.name);
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

fn run_worker<T: Transmit>(
    name: &'static str,
    buffer: &ChannelBuffer,
    transmitter: &mut T,
    period: Duration,
    shutdown: &AtomicBool,
) {
    info!("[{}] worker started ({:?} period)", name, period);
    let inactive_poll = Duration::from_millis(INACTIVE_POLL_MS);

    while !shutdown.load(Ordering::Acquire) {
        let started = Instant::now();
        match buffer.cycle(transmitter) {
            CycleOutcome::Inactive => {
                thread::sleep(inactive_poll);
                continue;
            }
            CycleOutcome::Failed => {
                let failures = buffer.stats().failures;
                if failures % 100 == 1 {
                    warn!("[{}] transmit failed ({} failures so far)", name, failures);
                }
            }
            CycleOutcome::Idle | CycleOutcome::Transmitted => {}
        }
        thread::sleep(pacing_delay(period, started.elapsed()));
    }
    debug!("[{}] worker stopped", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Axes;

    #[derive(Clone, Default)]
    struct Recorder {
        sent: Arc<Mutex<Vec<TelemetrySnapshot>>>,
        fail: bool,
    }

    impl Transmit for Recorder {
        fn transmit(&mut self, snapshot: &TelemetrySnapshot) -> TelemetryResult<()> {
            if self.fail {
                return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "down").into());
            }
            self.sent.lock().unwrap().push(*snapshot);
            Ok(())
        }
    }

    fn snapshot(t: f32) -> TelemetrySnapshot {
        TelemetrySnapshot {
            accel: Axes::new(0.0, 0.0, 1.0),
            time_sec: t,
            ..Default::default()
        }
    }

    #[test]
    fn test_dirty_edge_delivers_once() {
        let buffer = ChannelBuffer::new();
        let mut recorder = Recorder::default();
        buffer.set_active(true);

        buffer.write(snapshot(1.0));
        assert_eq!(buffer.cycle(&mut recorder), CycleOutcome::Transmitted);
        for _ in 0..5 {
            assert_eq!(buffer.cycle(&mut recorder), CycleOutcome::Idle);
        }
        assert_eq!(recorder.sent.lock().unwrap().len(), 1);
        assert_eq!(recorder.sent.lock().unwrap()[0].time_sec, 1.0);
    }

    #[test]
    fn test_latest_snapshot_wins() {
        let buffer = ChannelBuffer::new();
        let mut recorder = Recorder::default();
        buffer.set_active(true);

        buffer.write(snapshot(1.0));
        buffer.write(snapshot(2.0));
        buffer.write(snapshot(3.0));
        buffer.cycle(&mut recorder);

        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].time_sec, 3.0);
        assert_eq!(buffer.stats().updates, 3);
    }

    #[test]
    fn test_inactive_channel_skips_and_keeps_dirty() {
        let buffer = ChannelBuffer::new();
        let mut recorder = Recorder::default();

        buffer.write(snapshot(1.0));
        assert_eq!(buffer.cycle(&mut recorder), CycleOutcome::Inactive);
        assert!(buffer.is_dirty());
        assert!(recorder.sent.lock().unwrap().is_empty());

        buffer.set_active(true);
        assert_eq!(buffer.cycle(&mut recorder), CycleOutcome::Transmitted);
    }

    #[test]
    fn test_failure_is_counted_not_retried() {
        let buffer = ChannelBuffer::new();
        let mut recorder = Recorder {
            fail: true,
            ..Default::default()
        };
        buffer.set_active(true);
        buffer.write(snapshot(1.0));

        assert_eq!(buffer.cycle(&mut recorder), CycleOutcome::Failed);
        assert_eq!(buffer.cycle(&mut recorder), CycleOutcome::Idle);
        assert_eq!(buffer.stats().failures, 1);
        assert_eq!(buffer.stats().transmitted, 0);
    }

    #[test]
    fn test_pacing_delay() {
        let period = Duration::from_millis(10);
        assert_eq!(
            pacing_delay(period, Duration::from_millis(3)),
            Duration::from_millis(7)
        );
        assert_eq!(
            pacing_delay(period, Duration::from_millis(10)),
            Duration::from_millis(1)
        );
        assert_eq!(
            pacing_delay(period, Duration::from_millis(25)),
            Duration::from_millis(1)
        );
    }

    #[test]
    fn test_begin_twice_is_rejected() {
        let mut channel = Channel::new("test", Recorder::default(), Duration::from_millis(10));
        let worker = channel.begin().unwrap();
        assert!(channel.is_active());
        assert!(matches!(
            channel.begin(),
            Err(TelemetryError::AlreadyRunning(_))
        ));
        worker.stop();
    }

    #[test]
    fn test_worker_transmits_each_update_once() {
        let recorder = Recorder::default();
        let sent = Arc::clone(&recorder.sent);
        let mut channel = Channel::new("test", recorder, Duration::from_millis(2));
        let worker = channel.begin().unwrap();
        assert_eq!(worker.name(), "test");

        channel.update(snapshot(1.0));
        thread::sleep(Duration::from_millis(50));
        channel.update(snapshot(2.0));
        thread::sleep(Duration::from_millis(50));
        worker.stop();

        let sent = sent.lock().unwrap();
        let times: Vec<f32> = sent.iter().map(|s| s.time_sec).collect();
        assert_eq!(times, vec![1.0, 2.0]);
    }

    #[test]
    fn test_stopped_worker_sends_nothing_more() {
        let recorder = Recorder::default();
        let sent = Arc::clone(&recorder.sent);
        let mut channel = Channel::new("test", recorder, Duration::from_millis(2));
        channel.begin().unwrap().stop();

        channel.update(snapshot(1.0));
        thread::sleep(Duration::from_millis(20));
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_end_deactivates() {
        let channel = Channel::new("test", Recorder::default(), Duration::from_millis(10));
        channel.set_active(true);
        assert!(channel.handle().is_active());
        channel.end();
        assert!(!channel.handle().is_active());
    }
}
