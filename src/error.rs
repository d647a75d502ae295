use thiserror::Error;

/// Telemetry pipeline error types
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Sensor initialisation failed: {0}")]
    SensorInit(String),

    #[error("Sensor read failed: {0}")]
    SensorRead(String),

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Channel already running: {0}")]
    AlreadyRunning(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type for library operations
pub type TelemetryResult<T> = Result<T, TelemetryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_converts_to_transport() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: TelemetryError = io.into();
        assert!(matches!(err, TelemetryError::Transport(_)));
        assert!(err.to_string().contains("pipe closed"));
    }

    #[test]
    fn test_already_running_message() {
        let err = TelemetryError::AlreadyRunning("serial".to_string());
        assert_eq!(err.to_string(), "Channel already running: serial");
    }
}
