//! Error types for profile sinks

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while opening, recording into, or finalizing a sink
#[derive(Error, Debug)]
pub enum SinkError {
    /// An output file could not be created or truncated
    #[error("could not create {}: {source}", path.display())]
    CreateFile {
        /// Path that was being created
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The CPU sampler refused to start (usually because it is already running)
    #[error("could not start CPU profile: {0}")]
    CpuStart(#[source] pprof::Error),

    /// The CPU sampler could not produce a report
    #[error("could not build CPU profile report: {0}")]
    CpuReport(#[source] pprof::Error),

    /// The CPU report could not be encoded as pprof protobuf
    #[error("could not encode CPU profile: {0}")]
    Encode(String),

    /// Execution tracing could not be attached to the process subscriber
    #[error("failed to start trace: {0}")]
    TraceStart(String),

    /// jemalloc heap profiling is not enabled in this process
    #[error("heap profiling is not active; install the jemalloc profiling allocator")]
    HeapUnavailable,

    /// Allocator statistics could not be refreshed or read
    #[error("could not refresh allocator statistics: {0}")]
    HeapStats(String),

    /// The allocator failed to dump a heap profile
    #[error("could not write memory profile: {0}")]
    HeapDump(#[source] anyhow::Error),

    /// Writing, syncing or closing an output file failed
    #[error("failed to write {}: {source}", path.display())]
    Write {
        /// Path that was being written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl SinkError {
    pub(crate) fn create(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::CreateFile {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }
}

/// Result type for sink operations
pub type Result<T> = std::result::Result<T, SinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SinkError::HeapUnavailable;
        assert_eq!(
            err.to_string(),
            "heap profiling is not active; install the jemalloc profiling allocator"
        );

        let err = SinkError::TraceStart("subscriber already set".to_string());
        assert_eq!(err.to_string(), "failed to start trace: subscriber already set");

        let err = SinkError::create(
            "/nowhere/cpu.pprof",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert_eq!(err.to_string(), "could not create /nowhere/cpu.pprof: missing");
    }

    #[test]
    fn test_write_error_keeps_source() {
        use std::error::Error as _;

        let err = SinkError::write(
            "mem.pprof",
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        );
        assert!(err.source().is_some());
        assert!(err.to_string().contains("mem.pprof"));
    }
}
