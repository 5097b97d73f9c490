//! Execution trace sink
//!
//! Records every `tracing` span and event of the process into `trace.out`
//! in the Chrome Trace Event format (open it in `chrome://tracing` or
//! <https://ui.perfetto.dev>).
//!
//! The process subscriber is installed once and owns a single chrome trace
//! writer. Between recordings the writer points at `io::sink()` and the
//! layer is filtered off; a recording swaps its file in, and finishing it
//! swaps the sink back, which terminates the JSON array and releases the
//! file.

use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, error, info};
use tracing_chrome::{ChromeLayerBuilder, FlushGuard};
use tracing_subscriber::filter::dynamic_filter_fn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::error::{Result, SinkError};
use crate::types::FileArtifact;

/// Log filter used when neither the caller nor `RUST_LOG` provide one
pub const DEFAULT_LOG_FILTER: &str = "info";

/// How long `finish` waits for the writer thread to release the file
const WRITER_RELEASE_TIMEOUT: Duration = Duration::from_secs(10);

/// Writer thread of the installed chrome layer
static TRACE_WRITER: Mutex<Option<FlushGuard>> = parking_lot::const_mutex(None);

/// Whether a recorder currently owns the writer
static ATTACHED: AtomicBool = AtomicBool::new(false);

/// Whether spans and events are currently forwarded to the chrome layer
static RECORDING: AtomicBool = AtomicBool::new(false);

/// Install the process-wide subscriber (log output plus trace writer)
///
/// `RUST_LOG` takes precedence over `log_filter`. Calling this again after a
/// successful install is a no-op.
///
/// # Errors
///
/// Returns `TraceStart` if the filter is invalid or if another global
/// subscriber already owns the process.
pub fn install_subscriber(log_filter: &str) -> Result<()> {
    let mut writer = TRACE_WRITER.lock();
    if writer.is_some() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_filter))
        .map_err(|e| SinkError::TraceStart(format!("invalid log filter {log_filter:?}: {e}")))?;

    let (chrome, guard) = ChromeLayerBuilder::<Registry>::new()
        .writer(io::sink())
        .include_args(true)
        .build();

    tracing_subscriber::registry()
        .with(chrome.with_filter(dynamic_filter_fn(|_, _| {
            RECORDING.load(Ordering::Acquire)
        })))
        .with(fmt::layer().with_filter(filter))
        .try_init()
        .map_err(|e| SinkError::TraceStart(e.to_string()))?;

    *writer = Some(guard);
    debug!("process subscriber installed");
    Ok(())
}

/// Whether [`install_subscriber`] has succeeded in this process
pub fn subscriber_installed() -> bool {
    TRACE_WRITER.lock().is_some()
}

/// Point the chrome writer at `out`; the previous output is terminated and dropped
fn redirect_writer(out: Box<dyn Write + Send>) -> Result<()> {
    match TRACE_WRITER.lock().as_ref() {
        Some(guard) => {
            guard.start_new(Some(out));
            Ok(())
        }
        None => Err(SinkError::TraceStart(
            "the process subscriber is not installed".to_string(),
        )),
    }
}

/// Trace output that reports when the writer thread lets go of it
struct TraceFile {
    file: File,
    released: Option<mpsc::Sender<io::Result<()>>>,
}

impl Write for TraceFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Drop for TraceFile {
    fn drop(&mut self) {
        let flushed = self.file.flush();
        if let Some(released) = self.released.take() {
            let _ = released.send(flushed);
        }
    }
}

/// A running execution trace
pub struct TraceRecorder {
    /// Second handle on the output file, used to sync it once the writer is done
    file: File,
    path: PathBuf,
    released: mpsc::Receiver<io::Result<()>>,
    halted: AtomicBool,
    finished: bool,
}

impl std::fmt::Debug for TraceRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceRecorder")
            .field("path", &self.path)
            .field("recording", &self.is_recording())
            .finish_non_exhaustive()
    }
}

impl TraceRecorder {
    /// Create (or truncate) `path` and start recording into it
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The process subscriber has not been installed
    /// - Another recording owns the trace writer
    /// - The file cannot be created
    pub fn start(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if !subscriber_installed() {
            error!("failed to start trace: the process subscriber is not installed");
            return Err(SinkError::TraceStart(
                "the process subscriber is not installed".to_string(),
            ));
        }

        if ATTACHED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            error!("failed to start trace: a recording is already attached");
            return Err(SinkError::TraceStart(
                "a recording is already attached".to_string(),
            ));
        }

        match Self::attach(&path) {
            Ok(recorder) => Ok(recorder),
            Err(e) => {
                ATTACHED.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    fn attach(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| {
            error!(path = %path.display(), error = %e, "failed to create trace output file");
            SinkError::create(path, e)
        })?;
        let writer = file.try_clone().map_err(|e| SinkError::create(path, e))?;

        let (tx, released) = mpsc::channel();
        redirect_writer(Box::new(TraceFile {
            file: writer,
            released: Some(tx),
        }))?;
        RECORDING.store(true, Ordering::Release);

        debug!(path = %path.display(), "execution tracing started");

        Ok(Self {
            file,
            path: path.to_path_buf(),
            released,
            halted: AtomicBool::new(false),
            finished: false,
        })
    }

    /// Output path of this trace
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether events are still being recorded
    pub fn is_recording(&self) -> bool {
        !self.halted.load(Ordering::Acquire)
    }

    /// Stop forwarding spans and events to the trace
    ///
    /// Events already queued are written by [`TraceRecorder::finish`].
    pub fn halt(&self) {
        if !self.halted.swap(true, Ordering::AcqRel) {
            RECORDING.store(false, Ordering::Release);
            debug!("execution tracing halted");
        }
    }

    /// Flush and close the trace file
    pub fn finish(mut self) -> Result<FileArtifact> {
        self.halt();
        self.release()?;

        let write_err = |e: io::Error| {
            error!(path = %self.path.display(), error = %e, "failed to close trace file");
            SinkError::write(&self.path, e)
        };

        self.released
            .recv_timeout(WRITER_RELEASE_TIMEOUT)
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    "trace writer did not release the file",
                )
            })
            .and_then(|flushed| flushed)
            .map_err(write_err)?;
        self.file.sync_all().map_err(write_err)?;

        let artifact = FileArtifact::from_path(&self.path).map_err(write_err)?;
        info!(
            path = %artifact.path.display(),
            bytes = artifact.size_bytes,
            "execution trace written"
        );
        Ok(artifact)
    }

    /// Hand the writer back to the sink and free it for the next recording
    fn release(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        let redirected = redirect_writer(Box::new(io::sink()));
        ATTACHED.store(false, Ordering::Release);
        redirected
    }
}

impl Drop for TraceRecorder {
    fn drop(&mut self) {
        self.halt();
        let _ = self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::SERIAL;

    #[test]
    fn test_install_is_idempotent() {
        assert!(install_subscriber(DEFAULT_LOG_FILTER).is_ok());
        assert!(install_subscriber("debug").is_ok());
        assert!(subscriber_installed());
    }

    #[test]
    fn test_trace_is_json_array() {
        let _serial = SERIAL.lock();
        install_subscriber(DEFAULT_LOG_FILTER).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.out");

        let recorder = TraceRecorder::start(&path).unwrap();
        assert!(recorder.is_recording());

        tracing::info_span!("unit_of_work", step = 1).in_scope(|| {
            tracing::info!("inside the span");
        });

        let artifact = recorder.finish().unwrap();
        assert!(artifact.size_bytes > 0);

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        let events = parsed.as_array().unwrap();
        assert!(events
            .iter()
            .any(|e| e["name"].as_str() == Some("unit_of_work")));
    }

    #[test]
    fn test_cannot_attach_two_recordings() {
        let _serial = SERIAL.lock();
        install_subscriber(DEFAULT_LOG_FILTER).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let first = TraceRecorder::start(dir.path().join("first.out")).unwrap();
        let second = TraceRecorder::start(dir.path().join("second.out"));

        match second {
            Err(SinkError::TraceStart(msg)) => assert!(msg.contains("already attached")),
            other => panic!("Expected TraceStart error, got {:?}", other),
        }
        // The rejected recording must not have touched its file
        assert!(!dir.path().join("second.out").exists());

        first.finish().unwrap();
    }

    #[test]
    fn test_events_after_halt_are_not_recorded() {
        let _serial = SERIAL.lock();
        install_subscriber(DEFAULT_LOG_FILTER).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.out");

        let recorder = TraceRecorder::start(&path).unwrap();
        tracing::info_span!("before_halt").in_scope(|| {});
        recorder.halt();
        assert!(!recorder.is_recording());
        tracing::info_span!("after_halt").in_scope(|| {});
        recorder.finish().unwrap();

        // Match on event names: the thread name record carries the test's name
        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        let names: Vec<&str> = parsed
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|e| e["name"].as_str())
            .collect();
        assert!(names.contains(&"before_halt"));
        assert!(!names.contains(&"after_halt"));
    }

    #[test]
    fn test_dropped_recorder_frees_writer() {
        let _serial = SERIAL.lock();
        install_subscriber(DEFAULT_LOG_FILTER).unwrap();
        let dir = tempfile::tempdir().unwrap();

        drop(TraceRecorder::start(dir.path().join("abandoned.out")).unwrap());

        let next = TraceRecorder::start(dir.path().join("next.out")).unwrap();
        next.finish().unwrap();
    }
}
