//! Termination signals and shutdown notification
//!
//! The session's background task waits on SIGINT and SIGTERM and publishes
//! what it received through a [`ShutdownNotifier`]. Application code holds a
//! [`ShutdownListener`] and reacts cooperatively.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::watch;
use tracing::debug;

/// Why a shutdown was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownSignal {
    /// SIGINT received (Ctrl+C)
    Interrupt,
    /// SIGTERM received
    Terminate,
    /// Shutdown requested from code
    Programmatic,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interrupt => write!(f, "SIGINT"),
            Self::Terminate => write!(f, "SIGTERM"),
            Self::Programmatic => write!(f, "PROGRAMMATIC"),
        }
    }
}

/// SIGINT and SIGTERM streams, registered up front so that registration
/// errors surface from `start` instead of inside the task
pub(crate) struct TerminationSignals {
    interrupt: Signal,
    terminate: Signal,
}

impl TerminationSignals {
    /// Install handlers for SIGINT and SIGTERM
    ///
    /// Once installed, the default action of both signals (terminating the
    /// process) is replaced for the rest of the process lifetime.
    pub(crate) fn register() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for the next SIGINT or SIGTERM
    ///
    /// Returns `None` once both streams have ended.
    pub(crate) async fn recv(&mut self) -> Option<ShutdownSignal> {
        tokio::select! {
            Some(()) = self.interrupt.recv() => Some(ShutdownSignal::Interrupt),
            Some(()) = self.terminate.recv() => Some(ShutdownSignal::Terminate),
            else => None,
        }
    }
}

/// Publishes the first shutdown request of a session
#[derive(Debug, Clone)]
pub(crate) struct ShutdownNotifier {
    tx: Arc<watch::Sender<Option<ShutdownSignal>>>,
}

impl ShutdownNotifier {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Record `signal` unless a shutdown was already requested
    ///
    /// Returns whether this call was the first request.
    pub(crate) fn notify(&self, signal: ShutdownSignal) -> bool {
        let first = self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(signal);
            true
        });

        if first {
            debug!(signal = %signal, "shutdown requested");
        } else {
            debug!(signal = %signal, "shutdown already requested, ignoring duplicate");
        }
        first
    }

    /// The request recorded so far, if any
    pub(crate) fn requested(&self) -> Option<ShutdownSignal> {
        *self.tx.borrow()
    }

    /// Whether any [`ShutdownListener`] is still alive
    pub(crate) fn has_listeners(&self) -> bool {
        self.tx.receiver_count() > 0
    }

    pub(crate) fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receives the shutdown request of a session
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<Option<ShutdownSignal>>,
}

impl ShutdownListener {
    /// Wait until a shutdown is requested
    ///
    /// Resolves immediately if the request happened before the call.
    /// Returns `None` if the session went away without a request.
    pub async fn wait(&mut self) -> Option<ShutdownSignal> {
        loop {
            if let Some(signal) = *self.rx.borrow_and_update() {
                return Some(signal);
            }
            if self.rx.changed().await.is_err() {
                return *self.rx.borrow();
            }
        }
    }

    /// The request recorded so far, without waiting
    pub fn requested(&self) -> Option<ShutdownSignal> {
        *self.rx.borrow()
    }
}
