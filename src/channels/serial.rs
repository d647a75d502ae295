use std::io::{self, Read, Write};
use std::thread;

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use log::debug;
use serde::Serialize;

use crate::channels::Transmit;
use crate::command::{CommandRouter, LineAccumulator};
use crate::error::TelemetryResult;
use crate::types::{Axes, EulerAngles, TelemetrySnapshot};

#[derive(Debug, Serialize)]
pub struct TextRecord {
    pub accel: Axes,
    pub gyro: Axes,
    pub temp: f32,
    pub fusion: EulerAngles,
    #[serde(rename = "gyroInt")]
    pub gyro_int: EulerAngles,
    pub t: f32,
}

impl From<&TelemetrySnapshot> for TextRecord {
    fn from(s: &TelemetrySnapshot) -> Self {
        Self {
            accel: s.accel,
            gyro: s.gyro,
            temp: s.temperature_c,
            fusion: s.fusion,
            gyro_int: s.accumulated_gyro,
            t: s.time_sec,
        }
    }
}

/// Complete command lines waiting for the serial worker. Extra lines are dropped.
pub const INBOUND_LINE_QUEUE: usize = 8;

/// Newline-terminated JSON for one snapshot, flushed by the caller.
pub fn encode_line(snapshot: &TelemetrySnapshot) -> TelemetryResult<Vec<u8>> {
    let mut line = serde_json::to_vec(&TextRecord::from(snapshot))?;
    line.push(b'\n');
    Ok(line)
}

pub struct SerialTransmitter<W: Write + Send + 'static> {
    writer: W,
    inbound: Option<Receiver<Vec<u8>>>,
    router: CommandRouter,
}

impl<W: Write + Send + 'static> SerialTransmitter<W> {
    pub fn new(writer: W, router: CommandRouter) -> Self {
        Self {
            writer,
            inbound: None,
            router,
        }
    }

    /// Attach a queue of complete command lines, see `spawn_line_reader`.
    pub fn with_inbound(mut self, inbound: Receiver<Vec<u8>>) -> Self {
        self.inbound = Some(inbound);
        self
    }

    fn drain_commands(&mut self) {
        let Some(inbound) = &self.inbound else {
            return;
        };
        for line in inbound.try_iter() {
            self.router.dispatch(&line);
        }
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }
}

impl<W: Write + Send + 'static> Transmit for SerialTransmitter<W> {
    fn transmit(&mut self, snapshot: &TelemetrySnapshot) -> TelemetryResult<()> {
        self.drain_commands();

        let line = encode_line(snapshot)?;
        self.writer.write_all(&line)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Assemble lines from `reader` until EOF, queueing each complete line.
///
/// The queue is bounded and lines are dropped when it is full, so nothing
/// grows while the serial channel is switched off. Returns the number of
/// lines dropped.
pub fn pump_lines<R: Read>(mut reader: R, lines: &Sender<Vec<u8>>) -> u64 {
    let mut accumulator = LineAccumulator::default();
    let mut buf = [0u8; 256];
    let mut dropped = 0;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => {
                debug!("command input closed");
                break;
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("command input read failed: {}", e);
                break;
            }
        };

        for line in accumulator.feed(&buf[..n]) {
            match lines.try_send(line) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => dropped += 1,
                Err(TrySendError::Disconnected(_)) => return dropped,
            }
        }
    }
    dropped
}

/// Read command lines from `reader` on a dedicated thread.
pub fn spawn_line_reader<R: Read + Send + 'static>(reader: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = bounded(INBOUND_LINE_QUEUE);
    thread::spawn(move || {
        let dropped = pump_lines(reader, &tx);
        if dropped > 0 {
            debug!("{} command lines dropped while the queue was full", dropped);
        }
    });
    rx
}

pub fn stdin_lines() -> Receiver<Vec<u8>> {
    spawn_line_reader(io::stdin())
}
