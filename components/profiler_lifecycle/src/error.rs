//! Error types for the profiling lifecycle

use profile_sinks::SinkError;
use thiserror::Error;

/// Errors that can occur while starting or stopping a profiling session
#[derive(Error, Debug)]
pub enum ProfilingError {
    /// Another session owns the profilers of this process
    #[error("A profiling session is already active")]
    AlreadyActive,

    /// The session was already stopped (or never started)
    #[error("Profiling session is not running")]
    NotRunning,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// No tokio runtime, or the signal listener could not be registered
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// A profile sink failed to open, record or finalize
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for profiling lifecycle operations
pub type Result<T> = std::result::Result<T, ProfilingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProfilingError::AlreadyActive;
        assert_eq!(err.to_string(), "A profiling session is already active");

        let err = ProfilingError::NotRunning;
        assert_eq!(err.to_string(), "Profiling session is not running");

        let err = ProfilingError::InvalidConfiguration("not a directory".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: not a directory");
    }

    #[test]
    fn test_sink_error_is_transparent() {
        let err: ProfilingError = SinkError::HeapUnavailable.into();

        assert!(matches!(err, ProfilingError::Sink(SinkError::HeapUnavailable)));
        assert_eq!(err.to_string(), SinkError::HeapUnavailable.to_string());
    }
}
