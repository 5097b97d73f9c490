//! Profiling session lifecycle
//!
//! A [`ProfilingSession`] starts CPU profiling and execution tracing, listens
//! for SIGINT/SIGTERM in the background, and on `stop` halts both profilers,
//! snapshots the heap and closes all three output files.
//!
//! # Example
//!
//! ```no_run
//! use profiler_lifecycle::{ProfilingConfig, ProfilingSession};
//!
//! profile_sinks::jemalloc_profiling!();
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = ProfilingSession::start(ProfilingConfig::default()).await?;
//!
//!     let mut shutdown = session.shutdown_listener();
//!     shutdown.wait().await;
//!
//!     session.stop().await?;
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod session;
mod signals;

pub use config::{ProfilingConfig, ProfilingConfigBuilder, ShutdownMode};
pub use error::{ProfilingError, Result};
pub use session::ProfilingSession;
pub use signals::{ShutdownListener, ShutdownSignal};

pub use profile_sinks::{FileArtifact, OutputPaths, ProfileArtifacts, SinkError};

#[cfg(test)]
profile_sinks::jemalloc_profiling!();

#[cfg(test)]
mod test_support {
    use parking_lot::Mutex;

    /// Only one session can run per process
    pub static SERIAL: Mutex<()> = parking_lot::const_mutex(());
}
