//! Scenario: cancel during a run. Pending jobs flip to cancelled in batch,
//! running jobs observe the flag, and the scan lands terminally cancelled.

use crate::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use strix_core::{JobStatus, ScanPhase, ScanStatus};
use strix_storage::{JobFilter, MemoryDatabase, Page};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_quiesces_all_work() {
    let db = MemoryDatabase::new();
    let registry = Arc::new(
        builder()
            .handler(
                "unit",
                Arc::new(SlowOk {
                    delay: Duration::from_millis(60),
                }),
            )
            .seeder(
                ScanPhase::Crawling,
                Arc::new(BatchSeeder {
                    job_type: "unit",
                    count: 15,
                }),
            )
            .build(),
    );
    let manager = node(&db, registry, fast_config("canceller", 2));
    manager.start().await.unwrap();

    let scan = manager
        .create_scan(1, "cancel me", options(&["https://example.test/"]))
        .await
        .unwrap();

    // Let work start, then cancel mid-run.
    tokio::time::sleep(Duration::from_millis(100)).await;
    manager.cancel_scan(scan.id).await.unwrap();

    let cancelled = db.get_scan(scan.id).await.unwrap();
    assert_eq!(cancelled.status, ScanStatus::Cancelled);
    assert!(cancelled.completed_at_ms.is_some());

    // Within the quiescence window every job reaches a terminal state; the
    // ones that were running observed the cancellation flag.
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        let live = db
            .count_jobs(
                scan.id,
                &[JobStatus::Pending, JobStatus::Claimed, JobStatus::Running],
                &[],
            )
            .await
            .unwrap();
        if live == 0 {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "jobs failed to quiesce after cancel"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let jobs = db
        .list_jobs(scan.id, &JobFilter::default(), Page::all())
        .await
        .unwrap();
    assert_eq!(jobs.len(), 15);
    let cancelled_jobs = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Cancelled)
        .count();
    assert!(cancelled_jobs > 0, "batch cancel hit the pending jobs");
    for job in &jobs {
        assert!(
            matches!(job.status, JobStatus::Cancelled | JobStatus::Completed),
            "job {} ended as {}",
            job.id,
            job.status
        );
        assert!(job.completed_at_ms.is_some());
    }

    assert_invariants(&db, scan.id).await;
    manager.stop().await.unwrap();
}
