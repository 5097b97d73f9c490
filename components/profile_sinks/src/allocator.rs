//! Allocator wiring for heap profiling
//!
//! Heap snapshots need jemalloc as the global allocator with its sampling
//! profiler switched on from the very first allocation. Both have to be
//! declared by the final binary, which is what [`jemalloc_profiling!`]
//! expands to.
//!
//! [`jemalloc_profiling!`]: crate::jemalloc_profiling

/// jemalloc options exported as `malloc_conf`: profiling enabled and active,
/// one sample per 512 KiB of allocation on average
pub const JEMALLOC_PROFILING_CONF: &[u8] = b"prof:true,prof_active:true,lg_prof_sample:19\0";

/// Declare jemalloc as the global allocator with heap profiling enabled
///
/// Invoke once, at the root of the binary (or test) crate:
///
/// ```ignore
/// profile_sinks::jemalloc_profiling!();
///
/// #[tokio::main]
/// async fn main() { /* ... */ }
/// ```
///
/// Setting `MALLOC_CONF` in the environment overrides the exported options.
#[macro_export]
macro_rules! jemalloc_profiling {
    () => {
        #[global_allocator]
        static PROFILING_ALLOCATOR: $crate::tikv_jemallocator::Jemalloc =
            $crate::tikv_jemallocator::Jemalloc;

        #[allow(non_upper_case_globals)]
        #[cfg_attr(target_os = "linux", export_name = "malloc_conf")]
        #[cfg_attr(not(target_os = "linux"), export_name = "_rjem_malloc_conf")]
        pub static malloc_conf: &[u8] = $crate::JEMALLOC_PROFILING_CONF;
    };
}
