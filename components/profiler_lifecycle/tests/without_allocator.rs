//! A session in a binary that never declared the profiling allocator
//!
//! Heap snapshots are unavailable there, but stopping must still finalize the
//! CPU profile and the trace, and free the profilers for the next session.

use profiler_lifecycle::{ProfilingConfig, ProfilingError, ProfilingSession, SinkError};

#[tokio::test]
async fn test_stop_without_heap_profiling_still_closes_other_sinks() {
    let dir = tempfile::tempdir().unwrap();
    let config = ProfilingConfig::builder()
        .output_dir(dir.path())
        .log_filter("warn")
        .listen_for_signals(false)
        .build();

    let session = ProfilingSession::start(config.clone()).await.unwrap();
    tracing::info_span!("work_without_heap").in_scope(|| {
        std::hint::black_box((0..100_000u64).sum::<u64>());
    });

    match session.stop().await {
        Err(ProfilingError::Sink(SinkError::HeapUnavailable)) => {}
        other => panic!("Expected HeapUnavailable, got {:?}", other),
    }

    let cpu = std::fs::metadata(dir.path().join("cpu.pprof")).unwrap();
    assert!(cpu.len() > 0);

    let trace = std::fs::read_to_string(dir.path().join("trace.out")).unwrap();
    let events: serde_json::Value = serde_json::from_str(&trace).unwrap();
    assert!(events.is_array());
    assert!(trace.contains("work_without_heap"));

    // The failed stop still released the profilers
    let session = ProfilingSession::start(config).await.unwrap();
    assert!(session.stop().await.is_err());
}
