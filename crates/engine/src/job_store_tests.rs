// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use strix_core::test_support::RecordingSink;
use strix_core::{FakeClock, NodeId, Scan, ScanOptions};
use strix_storage::MemoryDatabase;

struct Harness {
    db: Arc<MemoryDatabase>,
    sink: Arc<RecordingSink>,
    clock: FakeClock,
    store: JobStore<FakeClock>,
    worker: NodeId,
}

async fn harness() -> Harness {
    harness_with(Config::default()).await
}

async fn harness_with(config: Config) -> Harness {
    let db = MemoryDatabase::new();
    let sink = Arc::new(RecordingSink::new());
    let clock = FakeClock::new();
    let store = JobStore::new(
        db.clone() as Arc<dyn Database>,
        sink.clone() as Arc<dyn EventSink>,
        clock.clone(),
        &config,
    );
    Harness {
        db,
        sink,
        clock,
        store,
        worker: NodeId::new("node-1"),
    }
}

impl Harness {
    async fn active_scan(&self) -> ScanId {
        let id = self
            .db
            .insert_scan(Scan::new(1, "s", ScanOptions::default()), 0)
            .await
            .unwrap();
        self.db
            .set_scan_status(id, &[ScanStatus::Pending], ScanStatus::Crawling, 0)
            .await
            .unwrap();
        id
    }

    async fn claimed_job(&self, scan_id: ScanId) -> JobId {
        let id = self
            .store
            .enqueue(NewJob::new(scan_id, "crawl"))
            .await
            .unwrap();
        let batch = self
            .store
            .claim(&self.worker, &["crawl".to_string()], 10)
            .await
            .unwrap();
        assert!(batch.iter().any(|j| j.id == id));
        id
    }

    async fn counters(&self, scan_id: ScanId) -> strix_core::JobCounters {
        self.db.get_scan(scan_id).await.unwrap().counters
    }
}

#[tokio::test]
async fn enqueue_applies_default_attempts_and_counts() {
    let h = harness().await;
    let sid = h.active_scan().await;
    let jid = h.store.enqueue(NewJob::new(sid, "crawl")).await.unwrap();

    let job = h.db.get_job(jid).await.unwrap();
    assert_eq!(job.max_attempts, 3);

    let counters = h.counters(sid).await;
    assert_eq!(counters.total, 1);
    assert_eq!(counters.pending, 1);
    assert!(h.sink.names().contains(&"job:enqueued"));
}

#[tokio::test]
async fn claim_moves_counters_and_emits() {
    let h = harness().await;
    let sid = h.active_scan().await;
    h.store.enqueue(NewJob::new(sid, "crawl")).await.unwrap();
    h.store.enqueue(NewJob::new(sid, "crawl")).await.unwrap();

    let batch = h
        .store
        .claim(&h.worker, &["crawl".to_string()], 10)
        .await
        .unwrap();
    assert_eq!(batch.len(), 2);

    let counters = h.counters(sid).await;
    assert_eq!(counters.pending, 0);
    assert_eq!(counters.running, 2);
    assert!(counters.is_consistent());
    assert_eq!(
        h.sink.names().iter().filter(|n| **n == "job:claimed").count(),
        2
    );
}

#[tokio::test]
async fn complete_ok_resets_breaker_and_counts() {
    let h = harness().await;
    let sid = h.active_scan().await;
    let jid = h.claimed_job(sid).await;
    h.db.bump_scan_failures(sid, 0).await.unwrap();

    h.store
        .complete(
            jid,
            &h.worker,
            JobResolution::Completed {
                issues_found: 2,
                http_status: Some(200),
            },
        )
        .await
        .unwrap();

    let job = h.db.get_job(jid).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.issues_found, 2);
    assert_eq!(job.http_status, Some(200));

    let scan = h.db.get_scan(sid).await.unwrap();
    assert_eq!(scan.consecutive_failures, 0, "success resets the breaker");
    assert_eq!(scan.counters.completed, 1);
    assert_eq!(scan.counters.running, 0);
    assert!(scan.counters.is_consistent());
}

#[tokio::test]
async fn retry_requeues_with_backoff_until_budget_exhausted() {
    let h = harness().await;
    let sid = h.active_scan().await;
    let jid = h.claimed_job(sid).await;

    // Attempt 1 of 3: requeued with a delay.
    h.store
        .complete(
            jid,
            &h.worker,
            JobResolution::Retry {
                kind: "net_timeout".to_string(),
                message: "read timed out".to_string(),
            },
        )
        .await
        .unwrap();
    let job = h.db.get_job(jid).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 1);
    let first_delay = job.throttled_until_ms.unwrap() - h.clock.epoch_ms();
    assert_eq!(first_delay, 1_000);

    // Attempt 2 of 3: delay doubles.
    h.clock.advance(Duration::from_secs(2));
    let batch = h
        .store
        .claim(&h.worker, &["crawl".to_string()], 10)
        .await
        .unwrap();
    assert_eq!(batch.len(), 1);
    h.store
        .complete(
            jid,
            &h.worker,
            JobResolution::Retry {
                kind: "net_timeout".to_string(),
                message: "again".to_string(),
            },
        )
        .await
        .unwrap();
    let job = h.db.get_job(jid).await.unwrap();
    assert_eq!(job.attempts, 2);
    let second_delay = job.throttled_until_ms.unwrap() - h.clock.epoch_ms();
    assert_eq!(second_delay, 2_000);

    // Attempt 3 of 3: budget exhausted, terminally failed.
    h.clock.advance(Duration::from_secs(3));
    h.store
        .claim(&h.worker, &["crawl".to_string()], 10)
        .await
        .unwrap();
    h.store
        .complete(
            jid,
            &h.worker,
            JobResolution::Retry {
                kind: "net_timeout".to_string(),
                message: "still down".to_string(),
            },
        )
        .await
        .unwrap();
    let job = h.db.get_job(jid).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_type.as_deref(), Some("max_attempts_exceeded"));
    assert!(job.completed_at_ms.is_some());

    let counters = h.counters(sid).await;
    assert_eq!(counters.failed, 1);
    assert!(counters.is_consistent());
}

#[tokio::test]
async fn breaker_trips_after_threshold_failures() {
    let mut config = Config::default();
    config.breaker.failure_threshold = 3;
    let h = harness_with(config).await;
    let sid = h.active_scan().await;

    for i in 0..3 {
        let jid = h.claimed_job(sid).await;
        h.store
            .complete(
                jid,
                &h.worker,
                JobResolution::Failed {
                    kind: "probe_error".to_string(),
                    message: format!("failure {i}"),
                },
            )
            .await
            .unwrap();
    }

    let scan = h.db.get_scan(sid).await.unwrap();
    assert_eq!(scan.consecutive_failures, 3);
    let until = scan.throttled_until_ms.unwrap();
    assert_eq!(until - h.clock.epoch_ms(), 30_000, "initial backoff is 30s");
    assert!(h.sink.names().contains(&"scan:throttled"));

    // While throttled no jobs are claimable; a fourth failure doubles the
    // backoff window.
    let pending = h.store.enqueue(NewJob::new(sid, "crawl")).await.unwrap();
    assert!(h
        .store
        .claim(&h.worker, &["crawl".to_string()], 10)
        .await
        .unwrap()
        .is_empty());

    h.clock.advance(Duration::from_secs(31));
    let batch = h
        .store
        .claim(&h.worker, &["crawl".to_string()], 10)
        .await
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, pending);
    h.store
        .complete(
            pending,
            &h.worker,
            JobResolution::Failed {
                kind: "probe_error".to_string(),
                message: "failure 4".to_string(),
            },
        )
        .await
        .unwrap();
    let scan = h.db.get_scan(sid).await.unwrap();
    assert_eq!(
        scan.throttled_until_ms.unwrap() - h.clock.epoch_ms(),
        60_000
    );
}

#[tokio::test]
async fn cancelled_jobs_do_not_trip_the_breaker() {
    let mut config = Config::default();
    config.breaker.failure_threshold = 1;
    let h = harness_with(config).await;
    let sid = h.active_scan().await;
    let jid = h.claimed_job(sid).await;

    h.store
        .complete(jid, &h.worker, JobResolution::Cancelled)
        .await
        .unwrap();

    let scan = h.db.get_scan(sid).await.unwrap();
    assert_eq!(scan.consecutive_failures, 0);
    assert!(scan.throttled_until_ms.is_none());
    assert_eq!(scan.counters.cancelled, 1);

    let job = h.db.get_job(jid).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.error_type.as_deref(), Some("cancelled"));
}

#[tokio::test]
async fn complete_retries_transient_writes() {
    let h = harness().await;
    let sid = h.active_scan().await;
    let jid = h.claimed_job(sid).await;

    h.db.fail_next_completes(2);
    h.store
        .complete(
            jid,
            &h.worker,
            JobResolution::Completed {
                issues_found: 0,
                http_status: None,
            },
        )
        .await
        .unwrap();

    let job = h.db.get_job(jid).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed, "third write attempt lands");
}

#[tokio::test]
async fn complete_abandons_after_retry_budget() {
    let h = harness().await;
    let sid = h.active_scan().await;
    let jid = h.claimed_job(sid).await;

    h.db.fail_next_completes(5);
    // Abandons without surfacing an error; the job row stays held.
    h.store
        .complete(
            jid,
            &h.worker,
            JobResolution::Completed {
                issues_found: 0,
                http_status: None,
            },
        )
        .await
        .unwrap();
    let job = h.db.get_job(jid).await.unwrap();
    assert_eq!(job.status, JobStatus::Claimed);
}

#[tokio::test]
async fn double_complete_is_a_no_op() {
    let h = harness().await;
    let sid = h.active_scan().await;
    let jid = h.claimed_job(sid).await;

    let done = JobResolution::Completed {
        issues_found: 1,
        http_status: None,
    };
    h.store.complete(jid, &h.worker, done.clone()).await.unwrap();
    h.store.complete(jid, &h.worker, done).await.unwrap();

    let counters = h.counters(sid).await;
    assert_eq!(counters.completed, 1, "counters move once");
    assert!(counters.is_consistent());
}

#[tokio::test]
async fn reset_stale_returns_distinct_scans_and_emits() {
    let h = harness().await;
    let sid = h.active_scan().await;
    h.store.enqueue(NewJob::new(sid, "crawl")).await.unwrap();
    h.store.enqueue(NewJob::new(sid, "crawl")).await.unwrap();
    h.store
        .claim(&h.worker, &["crawl".to_string()], 10)
        .await
        .unwrap();

    let scans = h.store.reset_stale(&[h.worker.clone()]).await.unwrap();
    assert_eq!(scans, vec![sid]);
    assert_eq!(
        h.sink.names().iter().filter(|n| **n == "job:reset").count(),
        2
    );
}

#[tokio::test]
async fn is_cancelled_reflects_scan_status() {
    let h = harness().await;
    let sid = h.active_scan().await;
    let jid = h.claimed_job(sid).await;

    assert!(!h.store.is_cancelled(jid).await.unwrap());
    h.db.set_scan_status(sid, &[ScanStatus::Crawling], ScanStatus::Cancelled, 1)
        .await
        .unwrap();
    assert!(h.store.is_cancelled(jid).await.unwrap());
}

#[tokio::test]
async fn start_reports_ownership() {
    let h = harness().await;
    let sid = h.active_scan().await;
    let jid = h.claimed_job(sid).await;

    assert!(!h.store.start(jid, &NodeId::new("intruder")).await.unwrap());
    assert!(h.store.start(jid, &h.worker).await.unwrap());
    assert!(h.sink.names().contains(&"job:started"));
}
