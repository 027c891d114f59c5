//! Scenario: a scan with every phase enabled runs to completion across two
//! nodes.

use crate::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strix_core::{ScanPhase, ScanStatus};
use strix_engine::Registry;
use strix_storage::MemoryDatabase;

fn full_registry(executions: &Arc<AtomicU32>) -> Arc<Registry> {
    const PHASES: &[(ScanPhase, &str)] = &[
        (ScanPhase::Crawling, "crawl"),
        (ScanPhase::Fingerprinting, "fingerprint"),
        (ScanPhase::Discovering, "discovery"),
        (ScanPhase::Nuclei, "nuclei"),
        (ScanPhase::ActiveScan, "active_scan"),
        (ScanPhase::WebsocketScan, "websocket_scan"),
    ];
    let mut b = builder();
    for &(phase, job_type) in PHASES {
        b = b
            .handler(
                job_type,
                Arc::new(CountingOk {
                    executions: Arc::clone(executions),
                    issues: 1,
                }),
            )
            .seeder(phase, Arc::new(PerUrlSeeder { job_type }));
    }
    Arc::new(b.build())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn two_nodes_run_all_phases_to_completion() {
    let db = MemoryDatabase::new();
    let executions = Arc::new(AtomicU32::new(0));

    let node_a = node(
        &db,
        full_registry(&executions),
        fast_config("node-a", 4),
    );
    let node_b = node(
        &db,
        full_registry(&executions),
        fast_config("node-b", 4),
    );
    node_a.start().await.unwrap();
    node_b.start().await.unwrap();

    let scan = node_a
        .create_scan(1, "happy path", options(&["https://example.test/"]))
        .await
        .unwrap();
    assert_eq!(scan.status, ScanStatus::Crawling);
    assert_eq!(scan.phase, ScanPhase::Crawling);

    let done = wait_status(&db, scan.id, ScanStatus::Completed, Duration::from_secs(30)).await;
    assert_eq!(done.phase, ScanPhase::Completed);
    assert_eq!(done.counters.completed, 6, "one job per phase");
    assert_eq!(done.counters.failed, 0);
    assert_eq!(executions.load(Ordering::SeqCst), 6);
    assert!(done.started_at_ms.unwrap() <= done.completed_at_ms.unwrap());

    assert_invariants(&db, scan.id).await;

    node_a.stop().await.unwrap();
    node_b.stop().await.unwrap();

    // Both nodes deregistered cleanly.
    for n in db.list_nodes().await.unwrap() {
        assert_eq!(n.status, strix_core::NodeStatus::Stopped);
    }
}
