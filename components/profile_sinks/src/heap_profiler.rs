//! Heap profile sink
//!
//! Captures a snapshot of the jemalloc sampling heap profiler into
//! `mem.pprof`. The file uses jemalloc's heap profile format, which `jeprof`
//! reads and converts to pprof protobuf (`jeprof --proto`).
//!
//! Heap profiling only works when jemalloc is the process allocator and was
//! started with profiling enabled; see [`crate::jemalloc_profiling`].

use std::ffi::CString;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use tikv_jemalloc_ctl::{epoch, profiling, raw, stats};
use tracing::{debug, error, info};

use crate::error::{Result, SinkError};
use crate::types::{FileArtifact, HeapStats};

/// Whether the allocator is sampling heap allocations in this process
pub fn heap_profiling_active() -> bool {
    profiling::prof::read().unwrap_or(false)
}

/// Refresh the allocator's cached statistics and read them
///
/// jemalloc caches most statistics until its epoch is advanced; advancing it
/// makes the numbers current before a snapshot is taken.
pub fn refresh_heap_stats() -> Result<HeapStats> {
    let current_epoch = epoch::advance().map_err(|e| SinkError::HeapStats(e.to_string()))?;
    let allocated = stats::allocated::read().map_err(|e| SinkError::HeapStats(e.to_string()))?;
    let resident = stats::resident::read().map_err(|e| SinkError::HeapStats(e.to_string()))?;

    Ok(HeapStats {
        allocated_bytes: allocated as u64,
        resident_bytes: resident as u64,
        epoch: current_epoch,
    })
}

/// Create `path`, refresh allocator statistics and write a heap snapshot into it
///
/// The file is created before anything else so that a missing output
/// directory is reported even when heap profiling is unavailable.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be created
/// - jemalloc heap profiling is not active
/// - The allocator fails to dump the profile
/// - Writing, syncing or closing the file fails
pub fn write_heap_profile(path: impl AsRef<Path>) -> Result<(FileArtifact, HeapStats)> {
    let path = path.as_ref();

    let mut file = File::create(path).map_err(|e| {
        error!(path = %path.display(), error = %e, "could not create memory profile");
        SinkError::create(path, e)
    })?;

    let heap_stats = refresh_heap_stats()?;
    debug!(
        allocated_bytes = heap_stats.allocated_bytes,
        resident_bytes = heap_stats.resident_bytes,
        epoch = heap_stats.epoch,
        "allocator statistics refreshed"
    );

    if !heap_profiling_active() {
        error!("could not write memory profile: heap profiling is not active");
        return Err(SinkError::HeapUnavailable);
    }

    let dump = dump_to_temp_file(path)?;
    let write_err = |e: io::Error| {
        error!(path = %path.display(), error = %e, "could not write memory profile");
        SinkError::write(path, e)
    };

    let mut source = File::open(dump.path()).map_err(write_err)?;
    io::copy(&mut source, &mut file).map_err(write_err)?;
    file.flush().map_err(write_err)?;
    file.sync_all().map_err(|e| {
        error!(path = %path.display(), error = %e, "failed to close mem profile file");
        SinkError::write(path, e)
    })?;
    drop(file);

    let artifact = FileArtifact::from_path(path).map_err(write_err)?;
    info!(
        path = %artifact.path.display(),
        bytes = artifact.size_bytes,
        allocated_bytes = heap_stats.allocated_bytes,
        "heap profile written"
    );
    Ok((artifact, heap_stats))
}

/// Ask jemalloc to dump its heap profile next to `target`
///
/// jemalloc writes the dump itself by file name, so it goes to a temporary
/// file that is removed once copied.
fn dump_to_temp_file(target: &Path) -> Result<tempfile::NamedTempFile> {
    let dir = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let dump = tempfile::Builder::new()
        .prefix(".mem-dump-")
        .suffix(".heap")
        .tempfile_in(dir)
        .map_err(|e| SinkError::create(dir, e))?;

    let dump_path = CString::new(dump.path().as_os_str().as_encoded_bytes())
        .map_err(|e| SinkError::HeapDump(anyhow::anyhow!("invalid dump path: {e}")))?;

    // SAFETY: `prof.dump` takes a `const char *` naming the output file; the
    // pointer stays valid for the duration of the call and jemalloc does not
    // keep it.
    unsafe { raw::write(b"prof.dump\0", dump_path.as_ptr()) }.map_err(|e| {
        error!(error = %e, "could not write memory profile");
        SinkError::HeapDump(anyhow::anyhow!("prof.dump failed: {e}"))
    })?;

    Ok(dump)
}
