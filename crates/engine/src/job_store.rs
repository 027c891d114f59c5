// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The job store: queue operations plus the policy wired around them.
//!
//! Wraps the raw [`Database`] transitions with counter aggregation, retry
//! backoff, the per-scan circuit breaker, and event emission. All callers
//! (dispatcher, worker pool, reaper, orchestrator) go through here so every
//! transition updates counters and emits exactly once.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use strix_core::{
    error_kind, Clock, CounterDelta, Event, EventSink, JobId, JobStatus, NewJob, NodeId, ScanId,
    ScanJob, ScanStatus,
};
use strix_storage::{CompletedJob, Database, JobCompletion, StorageError};
use tracing::{error, warn};

use crate::config::{BreakerConfig, Config};
use crate::counters::status_delta;
use crate::EngineError;

/// Base and cap for the per-job retry delay (doubles per attempt).
const RETRY_BACKOFF_BASE_MS: u64 = 1_000;
const RETRY_BACKOFF_CAP_MS: u64 = 60_000;

/// Attempts for the job store's own terminal writes before abandoning;
/// the reconciliation pass restores consistency afterwards.
const COMPLETE_WRITE_ATTEMPTS: u32 = 3;

/// How a finished invocation resolves, produced by the worker pool from the
/// handler outcome (or from its own panic/timeout/cancel observations).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResolution {
    Completed {
        issues_found: u32,
        http_status: Option<u16>,
    },
    Failed {
        kind: String,
        message: String,
    },
    /// Retry if the attempt budget allows, else promote to failed.
    Retry {
        kind: String,
        message: String,
    },
    Cancelled,
    Skipped,
}

/// Durable queue facade shared by every engine component on a node.
pub struct JobStore<C: Clock> {
    db: Arc<dyn Database>,
    sink: Arc<dyn EventSink>,
    clock: C,
    breaker: BreakerConfig,
    default_max_attempts: u32,
}

impl<C: Clock> JobStore<C> {
    pub fn new(
        db: Arc<dyn Database>,
        sink: Arc<dyn EventSink>,
        clock: C,
        config: &Config,
    ) -> Self {
        Self {
            db,
            sink,
            clock,
            breaker: config.breaker.clone(),
            default_max_attempts: config.job.default_max_attempts,
        }
    }

    pub fn database(&self) -> Arc<dyn Database> {
        Arc::clone(&self.db)
    }

    /// Insert a pending job and account for it in the scan counters.
    pub async fn enqueue(&self, mut new: NewJob) -> Result<JobId, EngineError> {
        if new.max_attempts.is_none() {
            new.max_attempts = Some(self.default_max_attempts);
        }
        let scan_id = new.scan_id;
        let job_type = new.job_type.clone();
        let id = self.db.insert_job(new, self.clock.epoch_ms()).await?;
        self.db
            .adjust_scan_counters(scan_id, status_delta(None, JobStatus::Pending))
            .await?;
        self.sink.emit(&Event::JobEnqueued {
            job_id: id,
            scan_id,
            job_type,
        });
        Ok(id)
    }

    /// Claim up to `limit` eligible jobs for `worker`, in
    /// (priority DESC, id ASC) order.
    pub async fn claim(
        &self,
        worker: &NodeId,
        job_types: &[String],
        limit: usize,
    ) -> Result<Vec<ScanJob>, EngineError> {
        let jobs = self
            .db
            .claim_jobs(worker, job_types, limit, self.clock.epoch_ms())
            .await?;

        let mut per_scan: BTreeMap<ScanId, CounterDelta> = BTreeMap::new();
        for job in &jobs {
            per_scan
                .entry(job.scan_id)
                .or_default()
                .accumulate(status_delta(Some(JobStatus::Pending), JobStatus::Claimed));
        }
        for (scan_id, delta) in per_scan {
            if let Err(e) = self.db.adjust_scan_counters(scan_id, delta).await {
                warn!(scan_id = %scan_id, error = %e, "claim counter adjustment failed");
            }
        }
        for job in &jobs {
            self.sink.emit(&Event::JobClaimed {
                job_id: job.id,
                scan_id: job.scan_id,
                worker_id: worker.clone(),
            });
        }
        Ok(jobs)
    }

    /// claimed → running for a job this worker owns.
    pub async fn start(&self, id: JobId, worker: &NodeId) -> Result<bool, EngineError> {
        let started = self.db.start_job(id, worker, self.clock.epoch_ms()).await?;
        if started {
            self.sink.emit(&Event::JobStarted {
                job_id: id,
                worker_id: worker.clone(),
            });
        }
        Ok(started)
    }

    /// Resolve a finished invocation. Exactly one terminal write (or a
    /// requeue) happens per call; repeats on an already-terminal job are
    /// no-ops.
    pub async fn complete(
        &self,
        id: JobId,
        worker: &NodeId,
        resolution: JobResolution,
    ) -> Result<(), EngineError> {
        match resolution {
            JobResolution::Completed {
                issues_found,
                http_status,
            } => {
                let completion = JobCompletion {
                    issues_found,
                    http_status,
                    ..JobCompletion::default()
                };
                if let Some(done) = self.finish(id, JobStatus::Completed, completion).await? {
                    self.after_terminal(&done).await;
                    if let Err(e) = self.db.clear_scan_failures(done.job.scan_id).await {
                        warn!(scan_id = %done.job.scan_id, error = %e, "breaker reset failed");
                    }
                }
                Ok(())
            }

            JobResolution::Failed { kind, message } => {
                self.fail_terminal(id, kind, message).await
            }

            JobResolution::Retry { kind, message } => {
                let job = self.db.get_job(id).await?;
                if job.status.is_terminal() {
                    return Ok(());
                }
                if job.attempts + 1 >= job.max_attempts {
                    return self
                        .fail_terminal(
                            id,
                            error_kind::MAX_ATTEMPTS_EXCEEDED.to_string(),
                            format!(
                                "gave up after {} attempts ({}: {})",
                                job.attempts + 1,
                                kind,
                                message
                            ),
                        )
                        .await;
                }
                let now_ms = self.clock.epoch_ms();
                let delay = retry_backoff(job.attempts);
                let requeued = self
                    .db
                    .requeue_job(id, worker, Some(now_ms + delay.as_millis() as u64), now_ms)
                    .await?;
                if requeued {
                    self.adjust(job.scan_id, status_delta(Some(job.status), JobStatus::Pending))
                        .await;
                    self.sink.emit(&Event::JobReset {
                        job_id: id,
                        scan_id: job.scan_id,
                    });
                }
                Ok(())
            }

            JobResolution::Cancelled => {
                let completion = JobCompletion {
                    error_type: Some(error_kind::CANCELLED.to_string()),
                    ..JobCompletion::default()
                };
                if let Some(done) = self.finish(id, JobStatus::Cancelled, completion).await? {
                    self.after_terminal(&done).await;
                }
                Ok(())
            }

            JobResolution::Skipped => {
                if let Some(done) = self
                    .finish(id, JobStatus::Skipped, JobCompletion::default())
                    .await?
                {
                    self.after_terminal(&done).await;
                }
                Ok(())
            }
        }
    }

    /// Persist opaque handler resume state; status is untouched.
    pub async fn checkpoint(&self, id: JobId, blob: Vec<u8>) -> Result<(), EngineError> {
        self.db.set_job_checkpoint(id, Some(blob)).await?;
        Ok(())
    }

    /// Whether the owning scan has been cancelled (the flag handlers poll).
    pub async fn is_cancelled(&self, id: JobId) -> Result<bool, EngineError> {
        let job = self.db.get_job(id).await?;
        let scan = self.db.get_scan(job.scan_id).await?;
        Ok(scan.status == ScanStatus::Cancelled)
    }

    /// Return jobs held by the given workers to pending. Counters for the
    /// affected scans are NOT adjusted here; callers recompute them, which
    /// also heals any drift the dead worker left behind.
    pub async fn reset_stale(&self, workers: &[NodeId]) -> Result<Vec<ScanId>, EngineError> {
        let affected = self
            .db
            .reset_stale_jobs(workers, self.clock.epoch_ms())
            .await?;
        let mut scan_ids: Vec<ScanId> = Vec::new();
        for (job_id, scan_id) in &affected {
            self.sink.emit(&Event::JobReset {
                job_id: *job_id,
                scan_id: *scan_id,
            });
            if !scan_ids.contains(scan_id) {
                scan_ids.push(*scan_id);
            }
        }
        Ok(scan_ids)
    }

    // ── internals ──────────────────────────────────────────────────────

    async fn fail_terminal(
        &self,
        id: JobId,
        kind: String,
        message: String,
    ) -> Result<(), EngineError> {
        let completion = JobCompletion {
            error_type: Some(kind),
            error_message: Some(message),
            ..JobCompletion::default()
        };
        if let Some(done) = self.finish(id, JobStatus::Failed, completion).await? {
            self.after_terminal(&done).await;
            self.record_failure(done.job.scan_id).await;
        }
        Ok(())
    }

    /// Terminal write with internal retry on transient errors. Abandons
    /// after [`COMPLETE_WRITE_ATTEMPTS`]; reconciliation restores counters
    /// and the stale reaper eventually frees an orphaned row.
    async fn finish(
        &self,
        id: JobId,
        status: JobStatus,
        completion: JobCompletion,
    ) -> Result<Option<CompletedJob>, EngineError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .db
                .complete_job(id, status, completion.clone(), self.clock.epoch_ms())
                .await
            {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() && attempt < COMPLETE_WRITE_ATTEMPTS => {
                    warn!(job_id = %id, attempt, error = %e, "terminal write failed, retrying");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Err(StorageError::Unavailable(e)) => {
                    error!(job_id = %id, error = %e, "terminal write abandoned");
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn after_terminal(&self, done: &CompletedJob) {
        self.adjust(
            done.job.scan_id,
            status_delta(Some(done.previous_status), done.job.status),
        )
        .await;
        self.sink.emit(&Event::JobCompleted {
            job_id: done.job.id,
            scan_id: done.job.scan_id,
            status: done.job.status,
            issues_found: done.job.issues_found,
        });
    }

    async fn adjust(&self, scan_id: ScanId, delta: CounterDelta) {
        if let Err(e) = self.db.adjust_scan_counters(scan_id, delta).await {
            warn!(scan_id = %scan_id, error = %e, "counter adjustment failed");
        }
    }

    /// Circuit breaker: trip after `failure_threshold` consecutive failures
    /// with exponential backoff from `backoff_initial` up to `backoff_max`.
    async fn record_failure(&self, scan_id: ScanId) {
        let now_ms = self.clock.epoch_ms();
        let count = match self.db.bump_scan_failures(scan_id, now_ms).await {
            Ok(count) => count,
            Err(e) => {
                warn!(scan_id = %scan_id, error = %e, "failure bump failed");
                return;
            }
        };
        if count < self.breaker.failure_threshold {
            return;
        }
        let exponent = (count - self.breaker.failure_threshold).min(20);
        let backoff_ms = (self.breaker.backoff_initial.as_millis() as u64)
            .saturating_mul(1 << exponent)
            .min(self.breaker.backoff_max.as_millis() as u64);
        let until_ms = now_ms + backoff_ms;
        match self.db.set_scan_throttle(scan_id, Some(until_ms)).await {
            Ok(()) => self.sink.emit(&Event::ScanThrottled { scan_id, until_ms }),
            Err(e) => warn!(scan_id = %scan_id, error = %e, "throttle update failed"),
        }
    }
}

/// Exponential per-job retry delay: 1s, 2s, 4s, ... capped at 60s.
fn retry_backoff(attempts: u32) -> Duration {
    let ms = RETRY_BACKOFF_BASE_MS
        .saturating_mul(1 << attempts.min(16))
        .min(RETRY_BACKOFF_CAP_MS);
    Duration::from_millis(ms)
}

#[cfg(test)]
#[path = "job_store_tests.rs"]
mod tests;
