//! Type definitions shared by the profile sinks
//!
//! Contains the fixed output file names, the resolved output paths of a
//! session, and the artifact summaries returned when a session is finalized.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the CPU profile
pub const CPU_PROFILE_FILE: &str = "cpu.pprof";

/// File name of the execution trace
pub const TRACE_FILE: &str = "trace.out";

/// File name of the heap profile
pub const HEAP_PROFILE_FILE: &str = "mem.pprof";

/// CPU sampling frequency in Hz
pub const CPU_SAMPLE_FREQUENCY: i32 = 100;

/// Libraries whose frames are skipped while unwinding from the SIGPROF handler
pub const CPU_BLOCKLIST: [&str; 4] = ["libc", "libgcc", "pthread", "vdso"];

/// Resolved locations of the three profile outputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPaths {
    /// CPU profile (`cpu.pprof`)
    pub cpu: PathBuf,
    /// Execution trace (`trace.out`)
    pub trace: PathBuf,
    /// Heap profile (`mem.pprof`)
    pub heap: PathBuf,
}

impl OutputPaths {
    /// Resolve the fixed file names under `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            cpu: dir.join(CPU_PROFILE_FILE),
            trace: dir.join(TRACE_FILE),
            heap: dir.join(HEAP_PROFILE_FILE),
        }
    }
}

/// A finalized output file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileArtifact {
    /// Where the file was written
    pub path: PathBuf,
    /// Size of the file on disk after it was closed
    pub size_bytes: u64,
}

impl FileArtifact {
    /// Stat `path` after it has been closed
    pub fn from_path(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let size_bytes = std::fs::metadata(&path)?.len();
        Ok(Self { path, size_bytes })
    }
}

/// The three files produced by a completed session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileArtifacts {
    /// CPU profile
    pub cpu: FileArtifact,
    /// Execution trace
    pub trace: FileArtifact,
    /// Heap profile
    pub heap: FileArtifact,
}

/// Allocator statistics captured right before the heap snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeapStats {
    /// Bytes currently allocated by the application
    pub allocated_bytes: u64,
    /// Bytes in physically resident data pages mapped by the allocator
    pub resident_bytes: u64,
    /// Allocator statistics epoch after the refresh
    pub epoch: u64,
}
