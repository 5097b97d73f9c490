//! Public API for profiling a process from startup to shutdown
//!
//! This crate wraps the lower-level `profiler_lifecycle` session with the two
//! operations an application needs: `start` when it boots and `stop` before
//! it exits. `stop` leaves `cpu.pprof`, `trace.out` and `mem.pprof` in the
//! configured directory.
//!
//! # Example
//!
//! ```no_run
//! use profiler_api::{Profiler, ProfilingConfig};
//!
//! profiler_api::jemalloc_profiling!();
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let profiler = Profiler::new(ProfilingConfig::default());
//!     profiler.start().await?;
//!
//!     // ... application runs until SIGINT/SIGTERM ...
//!     profiler.wait_for_shutdown().await;
//!
//!     profiler.stop().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

// Re-export public types from profiler_lifecycle
pub use profiler_lifecycle::{
    FileArtifact, OutputPaths, ProfileArtifacts, ProfilingConfig, ProfilingConfigBuilder,
    ProfilingError, Result, ShutdownListener, ShutdownMode, ShutdownSignal, SinkError,
};

pub use profile_sinks::jemalloc_profiling;

use profiler_lifecycle::ProfilingSession;

/// Main profiling API
///
/// Holds at most one running session. Both operations return errors instead
/// of terminating the process: starting twice yields `AlreadyActive`,
/// stopping without a running session yields `NotRunning`.
pub struct Profiler {
    session: Arc<RwLock<Option<ProfilingSession>>>,
    config: ProfilingConfig,
}

impl Profiler {
    /// Create a new Profiler with the given configuration
    ///
    /// Nothing is started until [`Profiler::start`] is called.
    ///
    /// # Example
    ///
    /// ```
    /// use profiler_api::{Profiler, ProfilingConfig};
    ///
    /// let profiler = Profiler::new(ProfilingConfig::default());
    /// assert_eq!(profiler.config().log_filter(), "info");
    /// ```
    pub fn new(config: ProfilingConfig) -> Self {
        Self {
            session: Arc::new(RwLock::new(None)),
            config,
        }
    }

    /// Start CPU profiling and execution tracing
    ///
    /// # Returns
    ///
    /// Returns `Ok(())` once both profilers run and the signal listener is
    /// in place.
    ///
    /// # Errors
    ///
    /// `AlreadyActive` if this profiler (or any other session in the
    /// process) is running; otherwise the error of the failing step.
    pub async fn start(&self) -> Result<()> {
        let mut session_lock = self.session.write().await;

        // Check if already started
        if session_lock.is_some() {
            return Err(ProfilingError::AlreadyActive);
        }

        let session = ProfilingSession::start(self.config.clone()).await?;
        *session_lock = Some(session);

        Ok(())
    }

    /// Stop profiling and save the three profiles
    ///
    /// # Returns
    ///
    /// The written files with their sizes.
    ///
    /// # Errors
    ///
    /// `NotRunning` if the profiler was never started, was already stopped,
    /// or the signal listener stopped it; otherwise the first sink error.
    pub async fn stop(&self) -> Result<ProfileArtifacts> {
        let session = self.session.write().await.take();

        match session {
            Some(session) => session.stop().await,
            None => Err(ProfilingError::NotRunning),
        }
    }

    /// Check whether a session is running
    pub async fn is_running(&self) -> bool {
        self.session
            .read()
            .await
            .as_ref()
            .is_some_and(|session| session.is_running())
    }

    /// Get the configuration sessions are started with
    pub fn config(&self) -> &ProfilingConfig {
        &self.config
    }

    /// Get a listener for the running session's shutdown request
    ///
    /// Returns `None` if no session is running.
    pub async fn shutdown_listener(&self) -> Option<ShutdownListener> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|session| session.shutdown_listener())
    }

    /// Wait until SIGINT/SIGTERM arrives or a shutdown is requested
    ///
    /// Returns `None` right away if no session is running.
    pub async fn wait_for_shutdown(&self) -> Option<ShutdownSignal> {
        // The lock is not held while waiting, so `stop` stays callable
        let mut listener = self.shutdown_listener().await?;
        listener.wait().await
    }

    /// Request a shutdown from code, waking [`Profiler::wait_for_shutdown`]
    ///
    /// Returns whether this was the first request of the running session.
    pub async fn request_shutdown(&self) -> bool {
        self.session
            .read()
            .await
            .as_ref()
            .is_some_and(|session| session.request_shutdown())
    }
}

/// Outcome of [`profile_until_shutdown`]
#[derive(Debug)]
pub struct ProfiledRun<T> {
    /// What the work returned, if it finished before a shutdown request
    pub output: Option<T>,
    /// The shutdown request that interrupted the work, if any
    pub shutdown: Option<ShutdownSignal>,
    /// The saved profiles
    pub artifacts: ProfileArtifacts,
}

/// Profile `work` until it completes or a shutdown is requested, then stop
///
/// This is the cooperative shape of "profile the whole process": the work
/// future is dropped when SIGINT/SIGTERM arrives, the profiles are saved, and
/// control returns to the caller so it can finish `main` normally.
///
/// # Example
///
/// ```no_run
/// use profiler_api::{profile_until_shutdown, ProfilingConfig};
///
/// profiler_api::jemalloc_profiling!();
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let run = profile_until_shutdown(ProfilingConfig::default(), async {
///         // ... serve requests ...
///     })
///     .await?;
///     println!("saved {}", run.artifacts.cpu.path.display());
///     Ok(())
/// }
/// ```
pub async fn profile_until_shutdown<F>(
    config: ProfilingConfig,
    work: F,
) -> Result<ProfiledRun<F::Output>>
where
    F: Future,
{
    let session = ProfilingSession::start(config).await?;
    let mut listener = session.shutdown_listener();

    let (output, shutdown) = tokio::select! {
        output = work => (Some(output), None),
        signal = listener.wait() => (None, signal),
    };

    match shutdown {
        Some(signal) => debug!(signal = %signal, "work interrupted by shutdown request"),
        None => debug!("work finished"),
    }

    let artifacts = session.stop().await?;
    Ok(ProfiledRun {
        output,
        shutdown,
        artifacts,
    })
}

#[cfg(test)]
jemalloc_profiling!();

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    static SERIAL: Mutex<()> = parking_lot::const_mutex(());

    fn config_in(dir: &std::path::Path) -> ProfilingConfig {
        ProfilingConfig::builder()
            .output_dir(dir)
            .log_filter("warn")
            .build()
    }

    #[test]
    fn test_profiler_new_with_default_config() {
        let profiler = Profiler::new(ProfilingConfig::default());

        assert_eq!(profiler.config().shutdown_mode(), ShutdownMode::Cooperative);
        assert!(profiler.config().listen_for_signals());
    }

    #[tokio::test]
    async fn test_not_running_before_start() {
        let profiler = Profiler::new(ProfilingConfig::default());

        assert!(!profiler.is_running().await);
        assert!(profiler.shutdown_listener().await.is_none());
        assert_eq!(profiler.wait_for_shutdown().await, None);
        assert!(!profiler.request_shutdown().await);
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let profiler = Profiler::new(ProfilingConfig::default());

        match profiler.stop().await {
            Err(ProfilingError::NotRunning) => {}
            other => panic!("Expected NotRunning, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_profiler_lifecycle() {
        let _serial = SERIAL.lock();
        let dir = tempfile::tempdir().unwrap();
        let profiler = Profiler::new(config_in(dir.path()));

        assert_ok!(profiler.start().await);
        assert!(profiler.is_running().await);

        let artifacts = assert_ok!(profiler.stop().await);
        assert!(!profiler.is_running().await);
        assert_eq!(artifacts.heap.path, dir.path().join("mem.pprof"));

        // Stopped twice
        assert_err!(profiler.stop().await);
    }

    #[tokio::test]
    async fn test_cannot_start_twice() {
        let _serial = SERIAL.lock();
        let dir = tempfile::tempdir().unwrap();
        let profiler = Profiler::new(config_in(dir.path()));

        profiler.start().await.unwrap();

        match profiler.start().await {
            Err(ProfilingError::AlreadyActive) => {}
            other => panic!("Expected AlreadyActive, got {:?}", other),
        }
        assert!(profiler.is_running().await);

        profiler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_two_profilers_share_one_process() {
        let _serial = SERIAL.lock();
        let dir = tempfile::tempdir().unwrap();
        let first = Profiler::new(config_in(&dir.path().join("first")));
        let second = Profiler::new(config_in(&dir.path().join("second")));

        first.start().await.unwrap();
        match second.start().await {
            Err(ProfilingError::AlreadyActive) => {}
            other => panic!("Expected AlreadyActive, got {:?}", other),
        }

        first.stop().await.unwrap();
        assert_ok!(second.start().await);
        second.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_can_restart_after_stop() {
        let _serial = SERIAL.lock();
        let dir = tempfile::tempdir().unwrap();
        let profiler = Profiler::new(config_in(dir.path()));

        profiler.start().await.unwrap();
        profiler.stop().await.unwrap();

        assert_ok!(profiler.start().await);
        assert!(profiler.is_running().await);
        profiler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_after_request() {
        let _serial = SERIAL.lock();
        let dir = tempfile::tempdir().unwrap();
        let profiler = Profiler::new(config_in(dir.path()));
        profiler.start().await.unwrap();

        assert!(profiler.request_shutdown().await);

        let signal = tokio::time::timeout(Duration::from_secs(5), profiler.wait_for_shutdown())
            .await
            .unwrap();
        assert_eq!(signal, Some(ShutdownSignal::Programmatic));

        profiler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_profile_until_work_completes() {
        let _serial = SERIAL.lock();
        let dir = tempfile::tempdir().unwrap();

        let run = profile_until_shutdown(config_in(dir.path()), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            42
        })
        .await
        .unwrap();

        assert_eq!(run.output, Some(42));
        assert_eq!(run.shutdown, None);
        assert!(run.artifacts.cpu.path.exists());
        assert!(run.artifacts.trace.path.exists());
        assert!(run.artifacts.heap.path.exists());
    }

    #[tokio::test]
    async fn test_profile_until_already_active_fails() {
        let _serial = SERIAL.lock();
        let dir = tempfile::tempdir().unwrap();
        let profiler = Profiler::new(config_in(dir.path()));
        profiler.start().await.unwrap();

        let result = profile_until_shutdown(config_in(dir.path()), async {}).await;
        match result {
            Err(ProfilingError::AlreadyActive) => {}
            other => panic!("Expected AlreadyActive, got {:?}", other),
        }

        profiler.stop().await.unwrap();
    }
}
