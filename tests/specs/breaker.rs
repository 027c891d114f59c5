//! Scenario: ten consecutive failures trip the per-scan circuit breaker
//! and no further jobs of that scan are claimed while it is throttled.

use crate::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use strix_core::{JobStatus, ScanPhase, SystemClock};
use strix_core::Clock;
use strix_storage::MemoryDatabase;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn consecutive_failures_throttle_the_scan() {
    let db = MemoryDatabase::new();
    // 12 jobs, every one fails; one worker so failures land sequentially.
    let registry = Arc::new(
        builder()
            .handler("unit", Arc::new(AlwaysFail))
            .seeder(
                ScanPhase::Crawling,
                Arc::new(BatchSeeder {
                    job_type: "unit",
                    count: 12,
                }),
            )
            .build(),
    );
    let manager = node(&db, registry, fast_config("breaker-node", 1));
    manager.start().await.unwrap();

    let scan = manager
        .create_scan(1, "flaky target", options(&["https://example.test/"]))
        .await
        .unwrap();

    // Wait until the tenth failure trips the breaker.
    let deadline = std::time::Instant::now() + Duration::from_secs(15);
    let throttled = loop {
        let scan = db.get_scan(scan.id).await.unwrap();
        if scan.throttled_until_ms.is_some() {
            break scan;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "breaker never tripped (failures: {})",
            scan.consecutive_failures
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    assert_eq!(throttled.consecutive_failures, 10);
    let now_ms = SystemClock.epoch_ms();
    assert!(
        throttled.throttled_until_ms.unwrap() > now_ms,
        "throttle window reaches into the future"
    );

    // Give the dispatcher time to drain anything already claimed, then
    // verify the remaining jobs sit untouched while the scan is throttled.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let pending = db
        .count_jobs(scan.id, &[JobStatus::Pending], &[])
        .await
        .unwrap();
    assert_eq!(pending, 2, "jobs 11 and 12 wait out the throttle");

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(
        db.count_jobs(scan.id, &[JobStatus::Pending], &[])
            .await
            .unwrap(),
        2,
        "no claims while throttled"
    );

    manager.cancel_scan(scan.id).await.unwrap();
    manager.stop().await.unwrap();
}
