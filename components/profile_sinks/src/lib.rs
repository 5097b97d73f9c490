//! Profile sinks: CPU sampling, execution tracing and heap snapshots
//!
//! This crate owns the three outputs of a profiling session and the
//! process-wide machinery behind them.
//!
//! # Sinks
//!
//! - **CpuProfiler**: SIGPROF sampling at 100 Hz, written as pprof protobuf (`cpu.pprof`)
//! - **TraceRecorder**: every `tracing` span and event as a Chrome trace (`trace.out`)
//! - **write_heap_profile**: jemalloc heap snapshot after a statistics refresh (`mem.pprof`)
//!
//! The process subscriber that carries both log output and the trace is
//! installed by [`install_subscriber`]. Heap snapshots additionally need the
//! allocator declared by [`jemalloc_profiling!`] in the final binary.

mod allocator;
mod cpu_profiler;
mod error;
mod heap_profiler;
mod trace_recorder;
mod types;

pub use allocator::JEMALLOC_PROFILING_CONF;
pub use cpu_profiler::{CpuProfiler, HaltedCpuProfile};
pub use error::{Result, SinkError};
pub use heap_profiler::{heap_profiling_active, refresh_heap_stats, write_heap_profile};
pub use trace_recorder::{
    install_subscriber, subscriber_installed, TraceRecorder, DEFAULT_LOG_FILTER,
};
pub use types::*;

#[doc(hidden)]
pub use tikv_jemallocator;

#[cfg(test)]
crate::jemalloc_profiling!();
