//! Profiles a synthetic workload and lets the signal listener end the process
//!
//! Runs in exit mode: on SIGINT or SIGTERM the listener saves the profiles
//! and exits with code 0 from inside the runtime, so nothing after the work
//! loop runs. If no signal arrives within a minute, the loop ends on its own
//! and leaves `caller-finished` behind.

use profile_lifecycle::workload::Workload;
use profile_lifecycle::{Profiler, ProfilingConfig, ShutdownMode};
use std::time::{Duration, Instant};
use tracing::info;

profile_lifecycle::jemalloc_profiling!();

/// Written only when the work loop runs to completion
const CALLER_MARKER: &str = "caller-finished";

const RUN_FOR: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ProfilingConfig::builder()
        .shutdown_mode(ShutdownMode::Exit)
        .build();
    let profiler = Profiler::new(config);
    profiler.start().await?;

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
