//! Scenario: a handler that always asks for a retry is attempted exactly
//! `max_attempts` times, then failed with `max_attempts_exceeded`.

use crate::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strix_core::{JobStatus, ScanStatus};
use strix_storage::{JobFilter, MemoryDatabase, Page};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retry_budget_is_exactly_max_attempts() {
    let db = MemoryDatabase::new();
    let executions = Arc::new(AtomicU32::new(0));
    let registry = crawl_registry(
        "crawl",
        Arc::new(AlwaysRetry {
            executions: Arc::clone(&executions),
        }),
    );
    let manager = node(&db, registry, fast_config("retry-node", 1));
    manager.start().await.unwrap();

    let scan = manager
        .create_scan(1, "flaky job", options(&["https://example.test/"]))
        .await
        .unwrap();

    // Retry delays are 1s then 2s, so the third execution lands within a
    // few seconds; the scan then fails nothing else and completes.
    let done = wait_status(&db, scan.id, ScanStatus::Completed, Duration::from_secs(30)).await;
    assert_eq!(done.counters.failed, 1);
    assert_eq!(done.counters.completed, 0);

    assert_eq!(
        executions.load(Ordering::SeqCst),
        3,
        "default max_attempts executions"
    );

    let jobs = db
        .list_jobs(scan.id, &JobFilter::default(), Page::all())
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_type.as_deref(), Some("max_attempts_exceeded"));
    assert_eq!(job.attempts, 2, "two requeues before the terminal failure");
    assert!(job.completed_at_ms.is_some());

    assert_invariants(&db, scan.id).await;
    manager.stop().await.unwrap();
}
