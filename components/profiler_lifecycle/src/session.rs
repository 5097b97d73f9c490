//! Profiling session implementation

use crate::signals::{ShutdownListener, ShutdownNotifier, ShutdownSignal, TerminationSignals};
use crate::{ProfilingConfig, ProfilingError, Result, ShutdownMode};
use profile_sinks::{
    install_subscriber, write_heap_profile, CpuProfiler, OutputPaths, ProfileArtifacts,
    TraceRecorder,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Set while a session owns the profilers of this process
static SESSION_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Exclusive claim on the process-wide profilers, released on drop
#[derive(Debug)]
struct SessionSlot(());

impl SessionSlot {
    fn claim() -> Result<Self> {
        SESSION_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self(()))
            .map_err(|_| ProfilingError::AlreadyActive)
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        SESSION_ACTIVE.store(false, Ordering::Release);
    }
}

/// Sinks opened by `start` and finalized by whoever stops the session first
#[derive(Debug)]
struct ActiveSinks {
    cpu: CpuProfiler,
    trace: TraceRecorder,
    paths: OutputPaths,
    started_at: Instant,
    // Dropped last, after the profilers are released
    _slot: SessionSlot,
}

impl ActiveSinks {
    fn open(paths: OutputPaths, slot: SessionSlot) -> Result<Self> {
        let cpu = CpuProfiler::start(&paths.cpu)?;
        let trace = TraceRecorder::start(&paths.trace)?;

        Ok(Self {
            cpu,
            trace,
            paths,
            started_at: Instant::now(),
            _slot: slot,
        })
    }

    /// Write the CPU profile, snapshot the heap, then close the trace
    ///
    /// Every file is attempted even when an earlier one fails; the first
    /// error in write order is returned.
    fn finish(self) -> Result<ProfileArtifacts> {
        let Self {
            cpu,
            trace,
            paths,
            started_at,
            _slot,
        } = self;

        debug!("halting profilers");
        let cpu = cpu.halt().and_then(|halted| halted.finish());
        trace.halt();

        let heap = write_heap_profile(&paths.heap);
        let trace = trace.finish();

        let cpu = cpu?;
        let (heap, heap_stats) = heap?;
        let artifacts = ProfileArtifacts {
            cpu,
            trace: trace?,
            heap,
        };

        info!(
            cpu = %artifacts.cpu.path.display(),
            cpu_bytes = artifacts.cpu.size_bytes,
            trace = %artifacts.trace.path.display(),
            trace_bytes = artifacts.trace.size_bytes,
            heap = %artifacts.heap.path.display(),
            heap_bytes = artifacts.heap.size_bytes,
            allocated_bytes = heap_stats.allocated_bytes,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "profiles saved"
        );
        Ok(artifacts)
    }
}

/// Take the sinks out of the shared slot and finalize them
///
/// The lock is held until the files are closed, so a concurrent caller
/// waits and then sees `NotRunning`.
async fn finish_shared(
    sinks: &Mutex<Option<ActiveSinks>>,
    running: &AtomicBool,
) -> Result<ProfileArtifacts> {
    let mut slot = sinks.lock().await;
    let active = slot.take().ok_or(ProfilingError::NotRunning)?;
    running.store(false, Ordering::SeqCst);

    tokio::task::spawn_blocking(move || active.finish())
        .await
        .map_err(|e| ProfilingError::Runtime(format!("stop task failed: {}", e)))?
}

/// A running profiling session
///
/// Owns the CPU profile and trace outputs from `start` until `stop`. At most
/// one session can be active per process.
///
/// # Example
///
/// ```no_run
/// use profiler_lifecycle::{ProfilingConfig, ProfilingSession};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let session = ProfilingSession::start(ProfilingConfig::default()).await?;
///
///     // ... application work ...
///
///     let artifacts = session.stop().await?;
///     println!("CPU profile: {}", artifacts.cpu.path.display());
///     Ok(())
/// }
/// ```
pub struct ProfilingSession {
    /// Configuration the session was started with
    config: ProfilingConfig,

    /// Where the three files go
    paths: OutputPaths,

    /// Open sinks, shared with the signal task
    sinks: Arc<Mutex<Option<ActiveSinks>>>,

    /// Whether the sinks are still open
    running: Arc<AtomicBool>,

    /// Shutdown requests (signals or programmatic)
    notifier: ShutdownNotifier,

    /// Ends the signal task when sent or dropped
    cancel: Option<oneshot::Sender<()>>,

    /// Signal task handle (when listening)
    signal_task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ProfilingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfilingSession")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("shutdown_requested", &self.shutdown_requested())
            .finish_non_exhaustive()
    }
}

impl ProfilingSession {
    /// Start CPU profiling and execution tracing
    ///
    /// This will:
    /// 1. Claim the process-wide profilers
    /// 2. Install the logging and trace subscriber (once per process)
    /// 3. Create the output directory if needed
    /// 4. Create `cpu.pprof` and start sampling
    /// 5. Create `trace.out` and start recording
    /// 6. Spawn the SIGINT/SIGTERM listener
    ///
    /// # Arguments
    ///
    /// * `config` - Output location, log filter and shutdown behavior
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No tokio runtime is available
    /// - Another session is active (`AlreadyActive`)
    /// - The output directory cannot be used
    /// - A file cannot be created or a profiler refuses to start
    /// - The signal handlers cannot be installed
    ///
    /// Nothing is left running on failure.
    pub async fn start(config: ProfilingConfig) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ProfilingError::Runtime(e.to_string()))?;

        let slot = SessionSlot::claim().inspect_err(|e| {
            error!(error = %e, "could not start profiling");
        })?;

        install_subscriber(config.log_filter())?;
        prepare_output_dir(config.output_dir())?;

        let signals = if config.listen_for_signals() {
            let signals = TerminationSignals::register().map_err(|e| {
                error!(error = %e, "could not install signal handlers");
                ProfilingError::Runtime(format!("could not install signal handlers: {}", e))
            })?;
            Some(signals)
        } else {
            None
        };

        let paths = config.output_paths();
        let sinks = ActiveSinks::open(paths.clone(), slot)?;

        let sinks = Arc::new(Mutex::new(Some(sinks)));
        let running = Arc::new(AtomicBool::new(true));
        let notifier = ShutdownNotifier::new();

        let (cancel, signal_task) = match signals {
            Some(signals) => {
                let (cancel_tx, cancel_rx) = oneshot::channel();
                let handle = runtime.spawn(listen_for_shutdown(
                    signals,
                    cancel_rx,
                    notifier.clone(),
                    Arc::clone(&sinks),
                    Arc::clone(&running),
                    config.shutdown_mode(),
                ));
                (Some(cancel_tx), Some(handle))
            }
            None => (None, None),
        };

        info!(
            output_dir = %config.output_dir().display(),
            shutdown_mode = ?config.shutdown_mode(),
            listening = signal_task.is_some(),
            "profiling started"
        );

        Ok(Self {
            config,
            paths,
            sinks,
            running,
            notifier,
            cancel,
            signal_task,
        })
    }

    /// Stop profiling and save all three profiles
    ///
    /// Halts CPU sampling and tracing, writes the heap snapshot to
    /// `mem.pprof`, then closes every file and logs `profiles saved`.
    ///
    /// # Errors
    ///
    /// Returns `NotRunning` if the signal listener already stopped the
    /// session, or the first sink error otherwise.
    pub async fn stop(mut self) -> Result<ProfileArtifacts> {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(handle) = self.signal_task.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "signal listener ended abnormally");
            }
        }

        info!("stopping profiling");
        let saved = finish_shared(&self.sinks, &self.running).await;
        saved.inspect_err(|e| {
            error!(error = %e, "could not save profiles");
        })
    }

    /// Check whether the profile files are still open
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get the configuration used by this session
    pub fn config(&self) -> &ProfilingConfig {
        &self.config
    }

    /// Get the output files of this session
    pub fn output_paths(&self) -> &OutputPaths {
        &self.paths
    }

    /// Get a listener that resolves once a shutdown is requested
    pub fn shutdown_listener(&self) -> ShutdownListener {
        self.notifier.subscribe()
    }

    /// The shutdown request received so far, if any
    pub fn shutdown_requested(&self) -> Option<ShutdownSignal> {
        self.notifier.requested()
    }

    /// Request a shutdown from code, as if a signal had arrived
    ///
    /// Only notifies listeners; the session keeps running until stopped.
    /// Returns whether this was the first request.
    pub fn request_shutdown(&self) -> bool {
        self.notifier.notify(ShutdownSignal::Programmatic)
    }
}

impl Drop for ProfilingSession {
    /// Abandon the session: end the listener and release the profilers
    /// without writing the CPU profile or the heap snapshot
    fn drop(&mut self) {
        if let Some(handle) = self.signal_task.take() {
            handle.abort();
        }
        self.cancel.take();

        // The listener owns a handle on the sinks until the runtime reaps the
        // aborted task, so the sinks are taken out here. A held lock means
        // an exit-mode listener is already saving them.
        if let Ok(mut slot) = self.sinks.try_lock() {
            if let Some(active) = slot.take() {
                self.running.store(false, Ordering::SeqCst);
                warn!(
                    output_dir = %self.config.output_dir().display(),
                    "profiling session dropped without stop, profiles discarded"
                );
                drop(active);
            }
        }
    }
}

/// Background task: wait for SIGINT/SIGTERM until the session is stopped
async fn listen_for_shutdown(
    mut signals: TerminationSignals,
    mut cancel: oneshot::Receiver<()>,
    notifier: ShutdownNotifier,
    sinks: Arc<Mutex<Option<ActiveSinks>>>,
    running: Arc<AtomicBool>,
    mode: ShutdownMode,
) {
    debug!("signal listener started");

    loop {
        let received = tokio::select! {
            received = signals.recv() => received,
            _ = &mut cancel => {
                debug!("signal listener stopped");
                return;
            }
        };
        let Some(signal) = received else {
            warn!("signal streams closed, no longer listening for termination");
            return;
        };

        info!(signal = %signal, "termination signal received");
        let first = notifier.notify(signal);

        let exit = match mode {
            ShutdownMode::Exit => true,
            ShutdownMode::Cooperative if !first => {
                warn!(signal = %signal, "shutdown requested again, saving profiles and exiting");
                true
            }
            ShutdownMode::Cooperative if !notifier.has_listeners() => {
                warn!(signal = %signal, "nobody is listening for shutdown, saving profiles and exiting");
                true
            }
            ShutdownMode::Cooperative => false,
        };

        if exit {
            exit_after_saving(&sinks, &running).await;
        }
    }
}

/// Save the profiles from the listener and end the process
///
/// Exits with 0 when the profiles were saved or a concurrent `stop` already
/// took them, 1 when saving failed.
async fn exit_after_saving(sinks: &Mutex<Option<ActiveSinks>>, running: &AtomicBool) {
    let code = match finish_shared(sinks, running).await {
        Ok(_) => 0,
        Err(ProfilingError::NotRunning) => 0,
        Err(e) => {
            error!(error = %e, "could not save profiles");
            1
        }
    };
    std::process::exit(code);
}

fn prepare_output_dir(dir: &Path) -> Result<()> {
    if dir.exists() && !dir.is_dir() {
        error!(path = %dir.display(), "output path is not a directory");
        return Err(ProfilingError::InvalidConfiguration(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    std::fs::create_dir_all(dir).map_err(|e| {
        error!(path = %dir.display(), error = %e, "could not create output directory");
        ProfilingError::Io(e)
    })
}
