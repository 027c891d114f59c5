// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded-concurrency executor for claimed jobs.
//!
//! Each slot runs one handler invocation on a dedicated task. The handler
//! future is spawned separately so a panic is contained by the task
//! boundary and translated to a fatal outcome; the slot is always
//! recovered, and the terminal write always reaches the job store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use strix_core::{error_kind, Clock, HandlerOutcome, NodeCounters, NodeId, ScanJob};
use strix_storage::Database;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::handler::{JobContext, Services};
use crate::job_store::{JobResolution, JobStore};
use crate::registry::Registry;
use crate::EngineError;

/// Cumulative per-node counters, shared with the heartbeat.
#[derive(Debug, Default)]
pub struct PoolCounters {
    pub jobs_claimed: AtomicU64,
    pub jobs_completed: AtomicU64,
    pub jobs_failed: AtomicU64,
}

impl PoolCounters {
    pub fn snapshot(&self) -> NodeCounters {
        NodeCounters {
            jobs_claimed: self.jobs_claimed.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
        }
    }
}

pub struct WorkerPool<C: Clock> {
    slots: Arc<Semaphore>,
    capacity: usize,
    store: Arc<JobStore<C>>,
    registry: Arc<Registry>,
    services: Arc<Services>,
    counters: Arc<PoolCounters>,
    worker_id: NodeId,
    default_timeout: Duration,
    clock: C,
}

impl<C: Clock> WorkerPool<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        capacity: usize,
        store: Arc<JobStore<C>>,
        registry: Arc<Registry>,
        services: Arc<Services>,
        counters: Arc<PoolCounters>,
        worker_id: NodeId,
        default_timeout: Duration,
        clock: C,
    ) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            store,
            registry,
            services,
            counters,
            worker_id,
            default_timeout,
            clock,
        }
    }

    /// Slots not currently executing a job.
    pub fn free_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn counters(&self) -> Arc<PoolCounters> {
        Arc::clone(&self.counters)
    }

    /// Take a slot and run the job on its own task. The dispatcher only
    /// submits up to `free_slots`, so acquisition does not block in
    /// practice; a closed semaphore means the pool is shutting down.
    pub async fn submit(self: &Arc<Self>, job: ScanJob) -> Result<(), EngineError> {
        let Ok(permit) = Arc::clone(&self.slots).acquire_owned().await else {
            return Ok(());
        };
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = permit;
            pool.run_job(job).await;
        });
        Ok(())
    }

    /// Wait for every in-flight job to finish.
    pub async fn drain(&self) {
        if let Ok(all) = self.slots.acquire_many(self.capacity as u32).await {
            drop(all);
        }
    }

    async fn run_job(&self, job: ScanJob) {
        let job_id = job.id;

        let Some(handler) = self.registry.handler(&job.job_type) else {
            self.resolve(
                job_id,
                JobResolution::Failed {
                    kind: error_kind::UNKNOWN_JOB_TYPE.to_string(),
                    message: format!("no handler for job type {:?}", job.job_type),
                },
            )
            .await;
            return;
        };

        // Ownership may have moved (stale reset) between claim and start.
        match self.store.start(job_id, &self.worker_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(job_id = %job_id, "lost claim before start; skipping");
                return;
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "start failed");
                return;
            }
        }

        let timeout = handler.timeout().unwrap_or(self.default_timeout);
        let deadline = self.clock.now() + timeout;
        let db: Arc<dyn Database> = self.store.database();
        let ctx = JobContext::new(job_id, job.scan_id, deadline, Arc::clone(&db));
        let services = Arc::clone(&self.services);

        // A separate task contains handler panics; the join error tells
        // panic apart from outcome.
        let mut invocation = tokio::spawn({
            let job = job.clone();
            async move { handler.run(&ctx, &job, &services).await }
        });

        let outcome = tokio::select! {
            joined = &mut invocation => match joined {
                Ok(outcome) => outcome,
                Err(join_err) if join_err.is_panic() => HandlerOutcome::Fatal {
                    kind: error_kind::PANIC.to_string(),
                    message: "handler panicked".to_string(),
                },
                Err(_) => HandlerOutcome::Retryable {
                    kind: error_kind::WORKER_LOST.to_string(),
                    message: "handler task aborted".to_string(),
                },
            },
            _ = tokio::time::sleep(timeout) => {
                invocation.abort();
                HandlerOutcome::Retryable {
                    kind: error_kind::TIMEOUT.to_string(),
                    message: format!("deadline of {:?} exceeded", timeout),
                }
            }
        };

        // A cancel observed while the job ran supersedes the outcome and
        // does not count toward the failure budget.
        let resolution = if self.store.is_cancelled(job_id).await.unwrap_or(false) {
            JobResolution::Cancelled
        } else {
            match outcome {
                HandlerOutcome::Ok { issues_found } => {
                    self.counters.jobs_completed.fetch_add(1, Ordering::Relaxed);
                    JobResolution::Completed {
                        issues_found,
                        http_status: None,
                    }
                }
                HandlerOutcome::Retryable { kind, message } => {
                    self.counters.jobs_failed.fetch_add(1, Ordering::Relaxed);
                    JobResolution::Retry { kind, message }
                }
                HandlerOutcome::Fatal { kind, message } => {
                    self.counters.jobs_failed.fetch_add(1, Ordering::Relaxed);
                    JobResolution::Failed { kind, message }
                }
            }
        };

        self.resolve(job_id, resolution).await;
    }

    async fn resolve(&self, job_id: strix_core::JobId, resolution: JobResolution) {
        if let Err(e) = self.store.complete(job_id, &self.worker_id, resolution).await {
            warn!(job_id = %job_id, error = %e, "job resolution failed");
        }
    }
}

#[cfg(test)]
#[path = "worker_pool_tests.rs"]
mod tests;
