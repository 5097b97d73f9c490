//! Profiles a synthetic workload until SIGINT or SIGTERM arrives
//!
//! Shutdown is cooperative: the workload is dropped, the profiles are saved
//! in the working directory, and `main` returns normally so the cleanup
//! guard below still runs (it leaves `cleanup.done` behind).

use profile_lifecycle::workload::Workload;
use profile_lifecycle::{profile_until_shutdown, ProfilingConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

profile_lifecycle::jemalloc_profiling!();

/// Written when `main` unwinds normally
const CLEANUP_MARKER: &str = "cleanup.done";

struct CleanupGuard(PathBuf);

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::write(&self.0, b"ok") {
            warn!(error = %e, "could not write cleanup marker");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _cleanup = CleanupGuard(PathBuf::from(CLEANUP_MARKER));

    let run = profile_until_shutdown(ProfilingConfig::default(), async {
        let mut workload = Workload::new();
        loop {
            workload.round();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    info!(
        signal = ?run.shutdown,
        cpu = %run.artifacts.cpu.path.display(),
        "worker exiting"
    );
    Ok(())
}
