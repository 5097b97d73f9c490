//! Profile a process from startup to shutdown
//!
//! Starts CPU profiling and execution tracing when the application boots and,
//! on `stop` or SIGINT/SIGTERM, saves `cpu.pprof`, `trace.out` and
//! `mem.pprof`. See [`Profiler`] and [`profile_until_shutdown`].

pub use profiler_api::*;

pub mod workload;
