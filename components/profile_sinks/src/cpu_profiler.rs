//! CPU profile sink
//!
//! Samples the whole process with a SIGPROF timer and writes the collected
//! stacks to `cpu.pprof` as an uncompressed pprof protobuf.

use pprof::protos::Message;
use pprof::{ProfilerGuard, ProfilerGuardBuilder};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info};

use crate::error::{Result, SinkError};
use crate::types::{FileArtifact, CPU_BLOCKLIST, CPU_SAMPLE_FREQUENCY};

/// A running CPU sampler together with the file it will be written to
pub struct CpuProfiler {
    /// Output file, created when sampling starts
    file: File,
    /// Output path
    path: PathBuf,
    /// Sampler guard; sampling stops when it is dropped
    guard: ProfilerGuard<'static>,
    /// When sampling started
    started_at: Instant,
}

impl std::fmt::Debug for CpuProfiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuProfiler")
            .field("path", &self.path)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl CpuProfiler {
    /// Create (or truncate) `path` and start sampling the process
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be created
    /// - The sampler is already running elsewhere in the process
    pub fn start(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let file = File::create(&path).map_err(|e| {
            error!(path = %path.display(), error = %e, "could not create CPU profile");
            SinkError::create(&path, e)
        })?;

        let guard = ProfilerGuardBuilder::default()
            .frequency(CPU_SAMPLE_FREQUENCY)
            .blocklist(&CPU_BLOCKLIST)
            .build()
            .map_err(|e| {
                error!(error = %e, "could not start CPU profile");
                SinkError::CpuStart(e)
            })?;

        debug!(
            path = %path.display(),
            frequency = CPU_SAMPLE_FREQUENCY,
            "CPU profiling started"
        );

        Ok(Self {
            file,
            path,
            guard,
            started_at: Instant::now(),
        })
    }

    /// Output path of this profile
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop sampling and keep the collected profile until it is written
    ///
    /// The sampler is released before this returns, so a new profiler can be
    /// started even if the halted profile is never written.
    pub fn halt(self) -> Result<HaltedCpuProfile> {
        let Self {
            file,
            path,
            guard,
            started_at,
        } = self;

        let report = guard.report().build().map_err(|e| {
            error!(error = %e, "could not build CPU profile report");
            SinkError::CpuReport(e)
        })?;
        drop(guard);

        let stacks = report.data.len();
        let profile = report.pprof().map_err(SinkError::CpuReport)?;

        debug!(
            stacks,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "CPU profiling halted"
        );

        Ok(HaltedCpuProfile {
            file,
            path,
            profile,
            stacks,
        })
    }
}

/// A CPU profile whose sampling has stopped but which is not yet on disk
pub struct HaltedCpuProfile {
    file: File,
    path: PathBuf,
    profile: pprof::protos::Profile,
    stacks: usize,
}

impl HaltedCpuProfile {
    /// Number of distinct stacks sampled while the profiler was running
    pub fn stacks(&self) -> usize {
        self.stacks
    }

    /// Encode the profile into the output file, then sync and close it
    pub fn finish(self) -> Result<FileArtifact> {
        let Self {
            mut file,
            path,
            profile,
            stacks,
        } = self;

        let mut content = Vec::with_capacity(profile.encoded_len());
        profile
            .encode(&mut content)
            .map_err(|e| SinkError::Encode(e.to_string()))?;

        let write_err = |e: std::io::Error| {
            error!(path = %path.display(), error = %e, "failed to write CPU profile");
            SinkError::write(&path, e)
        };
        file.write_all(&content).map_err(write_err)?;
        file.flush().map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        drop(file);

        let artifact = FileArtifact::from_path(&path).map_err(|e| SinkError::write(&path, e))?;
        info!(
            path = %artifact.path.display(),
            bytes = artifact.size_bytes,
            stacks,
            "CPU profile written"
        );
        Ok(artifact)
    }
}
