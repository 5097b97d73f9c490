//! The three sinks driven together, in the order a session uses them

use pprof::protos::Message;
use profile_sinks::{
    install_subscriber, write_heap_profile, CpuProfiler, OutputPaths, TraceRecorder,
};

profile_sinks::jemalloc_profiling!();

#[test]
fn test_cpu_trace_and_heap_sinks() {
    let dir = tempfile::tempdir().unwrap();
    let paths = OutputPaths::in_dir(dir.path());

    install_subscriber("warn").unwrap();
    let cpu = CpuProfiler::start(&paths.cpu).unwrap();
    let trace = TraceRecorder::start(&paths.trace).unwrap();

    let retained: Vec<Vec<u64>> = (0..16u64)
        .map(|i| {
            tracing::info_span!("fill_block", block = i)
                .in_scope(|| (0..50_000u64).map(|j| j.rotate_left(i as u32)).collect())
        })
        .collect();

    let halted = cpu.halt().unwrap();
    trace.halt();

    let (heap, stats) = write_heap_profile(&paths.heap).unwrap();
    let cpu = halted.finish().unwrap();
    let trace = trace.finish().unwrap();

    assert!(stats.allocated_bytes >= (16 * 50_000 * 8) as u64);
    assert!(heap.size_bytes > 0);
    assert!(cpu.size_bytes > 0);
    assert!(trace.size_bytes > 0);

    let profile =
        pprof::protos::Profile::decode(std::fs::read(&paths.cpu).unwrap().as_slice()).unwrap();
    assert!(!profile.sample_type.is_empty());

    let events: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&paths.trace).unwrap()).unwrap();
    let fill_blocks = events
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["name"].as_str() == Some("fill_block"))
        .count();
    assert!(fill_blocks >= 16);

    drop(retained);
}
