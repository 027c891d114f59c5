//! Scenario: eight dispatchers racing over one queue claim every job
//! exactly once.

use crate::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strix_core::{JobStatus, NewJob, Scan, ScanPhase, ScanStatus};
use strix_storage::{JobFilter, MemoryDatabase, Page};

const NODES: usize = 8;
const JOBS: usize = 1000;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn one_thousand_jobs_complete_exactly_once_across_eight_nodes() {
    let db = MemoryDatabase::new();
    let executions = Arc::new(AtomicU32::new(0));

    // Pre-seed the queue: one active scan with a thousand unit jobs.
    let sid = db
        .insert_scan(
            Scan::new(1, "contention", options(&["https://example.test/"])),
            0,
        )
        .await
        .unwrap();
    db.set_scan_status(sid, &[ScanStatus::Pending], ScanStatus::Crawling, 0)
        .await
        .unwrap();
    for _ in 0..JOBS {
        db.insert_job(NewJob::new(sid, "unit"), 0).await.unwrap();
    }
    db.recompute_scan_counters(sid).await.unwrap();

    let mut nodes = Vec::new();
    for i in 0..NODES {
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
        // A generous stale threshold keeps the reapers quiet even when the
        // runner is slow; this spec is about claim exclusivity.
        let mut config = fast_config(&format!("race-{i}"), 4);
        config.node.stale_threshold = Duration::from_secs(10);
        let manager = node(&db, registry, config);
        manager.start().await.unwrap();
        nodes.push(manager);
    }

    let done = wait_status(&db, sid, ScanStatus::Completed, Duration::from_secs(60)).await;
    assert_eq!(done.counters.completed, JOBS as i64);
    assert_eq!(done.counters.failed, 0);

    // Exactly J executions in aggregate: no job ran twice, none was lost.
    assert_eq!(executions.load(Ordering::SeqCst), JOBS as u32);

    let jobs = db
        .list_jobs(sid, &JobFilter::default(), Page::all())
        .await
        .unwrap();
    assert_eq!(jobs.len(), JOBS);
    for job in &jobs {
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempts, 0, "no job needed a second attempt");
    }

    assert_invariants(&db, sid).await;

    // Work was actually spread: the per-node cumulative counters sum to J.
    let claimed_total: u64 = db
        .list_nodes()
        .await
        .unwrap()
        .iter()
        .map(|n| n.jobs_claimed)
        .sum();
    assert_eq!(claimed_total, JOBS as u64);

    for manager in &nodes {
        manager.stop().await.unwrap();
    }
}
