use log::{debug, info};

use crate::config::COMMAND_LINE_MAX;
use crate::processor::ProcessorHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Zero the dead-reckoned gyro attitude.
    ResetGyro,
}

impl Command {
    /// Trim whitespace and control characters, then match case-insensitively.
    pub fn parse(text: &str) -> Option<Command> {
        match normalise(text).as_str() {
            "RESET_GYRO" => Some(Command::ResetGyro),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::ResetGyro => "RESET_GYRO",
        }
    }
}

pub fn normalise(text: &str) -> String {
    text.trim_matches(|c: char| c.is_whitespace() || c.is_control())
        .to_uppercase()
}

/// Dispatches recognised commands to the orientation processor.
#[derive(Clone)]
pub struct CommandRouter {
    handle: ProcessorHandle,
    source: &'static str,
}

impl CommandRouter {
    pub fn new(handle: ProcessorHandle, source: &'static str) -> Self {
        Self { handle, source }
    }

    /// Route one complete command payload. Invalid UTF-8 is treated as noise.
    pub fn dispatch(&self, payload: &[u8]) -> Option<Command> {
        let text = std::str::from_utf8(payload).ok()?;
        let command = Command::parse(text)?;
        info!("[{}] command {}", self.source, command.as_str());
        match command {
            Command::ResetGyro => self.handle.reset_gyro_integration(),
        }
        Some(command)
    }
}

/// Bounded line assembly for byte-oriented inbound paths.
#[derive(Debug)]
pub struct LineAccumulator {
    buffer: Vec<u8>,
    capacity: usize,
    discarded: u64,
}

impl Default for LineAccumulator {
    fn default() -> Self {
        Self::with_capacity(COMMAND_LINE_MAX)
    }
}

impl LineAccumulator {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            capacity,
            discarded: 0,
        }
    }

    /// Push one byte; returns a finished line on `\r` or `\n`.
    pub fn push(&mut self, byte: u8) -> Option<Vec<u8>> {
        if byte == b'\r' || byte == b'\n' {
            if self.buffer.is_empty() {
                return None;
            }
            return Some(std::mem::take(&mut self.buffer));
        }

        if self.buffer.len() >= self.capacity {
            // the overflowing byte goes with the rest of the line
            self.discarded += 1;
            debug!(
                "Discarding unterminated command line ({} bytes)",
                self.buffer.len()
            );
            self.buffer.clear();
            return None;
        }
        self.buffer.push(byte);
        None
    }

    /// Feed a chunk, collecting every line it completes.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalises() {
        assert_eq!(Command::parse("reset_gyro"), Some(Command::ResetGyro));
        assert_eq!(Command::parse("  Reset_Gyro\r\n"), Some(Command::ResetGyro));
        assert_eq!(Command::parse("\tRESET_GYRO \0"), Some(Command::ResetGyro));
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert_eq!(Command::parse("RESET"), None);
        assert_eq!(Command::parse("RESET_GYRO_NOW"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[test]
    fn test_accumulator_splits_lines() {
        let mut acc = LineAccumulator::default();
        let lines = acc.feed(b"RESET_GYRO\r\nfoo\nbar");
        assert_eq!(lines, vec![b"RESET_GYRO".to_vec(), b"foo".to_vec()]);
        assert_eq!(acc.pending(), 3);
    }

    #[test]
    fn test_accumulator_discards_oversized_line() {
        let mut acc = LineAccumulator::with_capacity(8);
        let lines = acc.feed(b"0123456789ab\n");
        // Buffer reset at the bound; the byte that overflowed is dropped too
        assert_eq!(lines, vec![b"9ab".to_vec()]);
        assert_eq!(acc.discarded(), 1);
    }

    #[test]
    fn test_overflow_swallows_start_of_next_command() {
        let mut acc = LineAccumulator::default();
        let mut input = vec![b'x'; COMMAND_LINE_MAX];
        input.extend_from_slice(b"RESET_GYRO\n");
        let lines = acc.feed(&input);
        assert_eq!(lines, vec![b"ESET_GYRO".to_vec()]);
        assert_eq!(Command::parse("ESET_GYRO"), None);
    }

    #[test]
    fn test_accumulator_never_exceeds_capacity() {
        let mut acc = LineAccumulator::default();
        for _ in 0..1000 {
            acc.push(b'x');
            assert!(acc.pending() <= COMMAND_LINE_MAX);
        }
    }

    #[test]
    fn test_router_forwards_reset() {
        let (handle, rx) = ProcessorHandle::detached();
        let router = CommandRouter::new(handle, "test");
        assert_eq!(router.dispatch(b" reset_gyro\n"), Some(Command::ResetGyro));
        assert_eq!(router.dispatch(b"HELLO"), None);
        assert_eq!(router.dispatch(&[0xff, 0xfe]), None);
        assert_eq!(rx.try_iter().count(), 1);
    }
}
