//! Scenario: pause stops new claims while in-flight jobs finish; resume
//! restores the previous status and the scan completes.

use crate::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use strix_core::{JobStatus, ScanPhase, ScanStatus};
use strix_storage::MemoryDatabase;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pause_quiesces_and_resume_continues() {
    let db = MemoryDatabase::new();

    // 20 slow jobs on 2 workers: the run lasts long enough to pause it.
    let registry = Arc::new(
        builder()
            .handler(
                "unit",
                Arc::new(SlowOk {
                    delay: Duration::from_millis(50),
                }),
            )
            .seeder(
                ScanPhase::Crawling,
                Arc::new(BatchSeeder {
                    job_type: "unit",
                    count: 20,
                }),
            )
            .build(),
    );
    let manager = node(&db, registry, fast_config("pauser", 2));
    manager.start().await.unwrap();

    let scan = manager
        .create_scan(1, "pause me", options(&["https://example.test/"]))
        .await
        .unwrap();

    // Let some work start, then pause.
    tokio::time::sleep(Duration::from_millis(120)).await;
    manager.pause_scan(scan.id).await.unwrap();
    let paused = db.get_scan(scan.id).await.unwrap();
    assert_eq!(paused.status, ScanStatus::Paused);
    assert_eq!(paused.previous_status, Some(ScanStatus::Crawling));
    assert!(paused.paused_at_ms.is_some());

    // In-flight jobs quiesce; afterwards nothing new is claimed.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let live_before = db
        .count_jobs(
            scan.id,
            &[JobStatus::Claimed, JobStatus::Running],
            &[],
        )
        .await
        .unwrap();
    assert_eq!(live_before, 0, "in-flight jobs ran to completion");
    let pending_before = db
        .count_jobs(scan.id, &[JobStatus::Pending], &[])
        .await
        .unwrap();
    assert!(pending_before > 0, "pause left unclaimed work");

    tokio::time::sleep(Duration::from_millis(300)).await;
    let pending_after = db
        .count_jobs(scan.id, &[JobStatus::Pending], &[])
        .await
        .unwrap();
    assert_eq!(
        pending_before, pending_after,
        "no claims while paused"
    );

    // Resume restores the captured status and the scan completes.
    let restored = manager.resume_scan(scan.id).await.unwrap();
    assert_eq!(restored, ScanStatus::Crawling);

    let done = wait_status(&db, scan.id, ScanStatus::Completed, Duration::from_secs(30)).await;
    assert_eq!(done.counters.completed, 20);
    assert_eq!(done.counters.failed, 0);
    assert_invariants(&db, scan.id).await;

    manager.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pause_then_resume_is_a_lifecycle_round_trip() {
    let db = MemoryDatabase::new();
    let registry = crawl_registry(
        "crawl",
        Arc::new(SlowOk {
            delay: Duration::from_millis(10),
        }),
    );
    let manager = node(&db, registry, fast_config("round-trip", 1));

    // No loops running: the status round-trip is purely store-level.
    let scan = manager
        .create_scan(1, "round trip", options(&["https://example.test/"]))
        .await
        .unwrap();
    let before = db.get_scan(scan.id).await.unwrap().status;

    manager.pause_scan(scan.id).await.unwrap();
    let restored = manager.resume_scan(scan.id).await.unwrap();
    assert_eq!(restored, before, "resume restores the pre-pause status");
    assert_eq!(db.get_scan(scan.id).await.unwrap().status, before);
}
