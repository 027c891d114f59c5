//! Scenario: a node dies holding claimed jobs; the survivor's reaper
//! resurrects them and the scan still completes.

use crate::prelude::*;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::Duration;
use strix_core::{
    JobStatus, NewJob, NodeCounters, NodeId, Scan, ScanPhase, ScanStatus, WorkerNode,
};
use strix_storage::{JobFilter, MemoryDatabase, Page};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn survivor_reaps_and_finishes_the_dead_nodes_jobs() {
    let db = MemoryDatabase::new();
    let executions = Arc::new(AtomicU32::new(0));

    // Node A exists only as database state: registered, heartbeated once,
    // then silent, as if the process was killed mid-flight.
    let dead = NodeId::new("node-a-100-dead");
    let now = 1_700_000_000_000u64;
    db.register_node(WorkerNode::new(dead.clone(), "node-a".to_string(), 4, now))
        .await
        .unwrap();
    db.heartbeat_node(&dead, NodeCounters::default(), now)
        .await
        .unwrap();

    // The scan the dead node was working: three claimed jobs.
    let scan = Scan::new(1, "crash recovery", options(&["https://example.test/"]));
    let sid = db.insert_scan(scan, now).await.unwrap();
    db.set_scan_status(sid, &[ScanStatus::Pending], ScanStatus::Crawling, now)
        .await
        .unwrap();
    for _ in 0..3 {
        db.insert_job(NewJob::new(sid, "unit"), now).await.unwrap();
    }
    let held = db
        .claim_jobs(&dead, &["unit".to_string()], 3, now)
        .await
        .unwrap();
    assert_eq!(held.len(), 3);
    db.recompute_scan_counters(sid).await.unwrap();

    // Node B: a live node that knows the job type. Its reaper interval is
    // stale_threshold / 2 = 250ms.
    let registry = Arc::new(
        builder()
            .handler(
                "unit",
                Arc::new(CountingOk {
                    executions: Arc::clone(&executions),
                    issues: 0,
                }),
            )
            .seeder(ScanPhase::Crawling, Arc::new(DeclaredSeeder { job_type: "unit" }))
            .build(),
    );
    let node_b = node(&db, registry, fast_config("node-b", 4));
    node_b.start().await.unwrap();

    let done = wait_status(&db, sid, ScanStatus::Completed, Duration::from_secs(30)).await;
    assert_eq!(done.counters.completed, 3);
    assert_eq!(done.counters.failed, 0);

    // Every job went through exactly one reset: attempts = 1.
    let jobs = db
        .list_jobs(sid, &JobFilter::default(), Page::all())
        .await
        .unwrap();
    for job in &jobs {
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempts, 1, "one increment from the stale reset");
    }

    // The dead node was declared stopped by the reaper.
    let node_a = db.get_node(&dead).await.unwrap();
    assert_eq!(node_a.status, strix_core::NodeStatus::Stopped);

    assert_invariants(&db, sid).await;
    node_b.stop().await.unwrap();
}
