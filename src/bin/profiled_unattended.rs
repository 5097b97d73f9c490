//! Profiles a synthetic workload without ever waiting for shutdown
//!
//! Uses the default cooperative configuration but never awaits the shutdown
//! listener, so a termination signal has to end the process through the
//! session itself. With `--hold-listener` a listener is kept alive without
//! being awaited: the first signal is only published and a second one ends
//! the process.

use profile_lifecycle::workload::Workload;
use profile_lifecycle::{Profiler, ProfilingConfig};
use std::time::{Duration, Instant};
use tracing::info;

profile_lifecycle::jemalloc_profiling!();

/// Written only when the work loop runs to completion
const CALLER_MARKER: &str = "caller-finished";

const RUN_FOR: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let hold_listener = std::env::args().skip(1).any(|arg| arg == "--hold-listener");

    let profiler = Profiler::new(ProfilingConfig::default());
    profiler.start().await?;

    let _listener = if hold_listener {
        profiler.shutdown_listener().await
    } else {
        None
    };
    info!(hold_listener, "work loop started");

    let mut workload = Workload::new();
    let deadline = Instant::now() + RUN_FOR;
    while Instant::now() < deadline {
        workload.round();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    std::fs::write(CALLER_MARKER, workload.rounds().to_string())?;
    info!(rounds = workload.rounds(), "work loop finished");

    profiler.stop().await?;
    Ok(())
}
