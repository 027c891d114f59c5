// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Counter aggregation.
//!
//! Scan counters are denormalized caches over job rows. The job store
//! applies a [`CounterDelta`] on every transition; the [`Reconciler`]
//! periodically recomputes the true values from an aggregation query so
//! abandoned writes cannot leave permanent drift.

use std::sync::Arc;
use std::time::Duration;

use strix_core::{CounterDelta, JobStatus, ScanStatus};
use strix_storage::Database;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Counter field a job status maps to. Claimed jobs count as running;
/// skipped jobs count as completed.
fn bucket(status: JobStatus) -> fn(&mut CounterDelta) -> &mut i64 {
    match status {
        JobStatus::Pending => |d| &mut d.pending,
        JobStatus::Claimed | JobStatus::Running => |d| &mut d.running,
        JobStatus::Completed | JobStatus::Skipped => |d| &mut d.completed,
        JobStatus::Failed => |d| &mut d.failed,
        JobStatus::Cancelled => |d| &mut d.cancelled,
    }
}

/// Delta for a single job moving `from → to`. `from = None` is an enqueue
/// (the job enters the total). Transitions within one bucket produce a zero
/// delta.
pub fn status_delta(from: Option<JobStatus>, to: JobStatus) -> CounterDelta {
    let mut delta = CounterDelta::default();
    match from {
        None => delta.total += 1,
        Some(from) => *bucket(from)(&mut delta) -= 1,
    }
    *bucket(to)(&mut delta) += 1;
    delta
}

/// Background sweep that recomputes counters for active scans.
pub struct Reconciler {
    db: Arc<dyn Database>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(db: Arc<dyn Database>, interval: Duration) -> Self {
        Self { db, interval }
    }

    /// One reconciliation pass. Returns the number of scans corrected.
    pub async fn reconcile(&self) -> usize {
        let scans = match self
            .db
            .list_scans_by_status(&[ScanStatus::Crawling, ScanStatus::Scanning])
            .await
        {
            Ok(scans) => scans,
            Err(e) => {
                warn!(error = %e, "counter reconciliation listing failed");
                return 0;
            }
        };

        let mut corrected = 0;
        for scan in scans {
            let before = scan.counters;
            match self.db.recompute_scan_counters(scan.id).await {
                Ok(after) if after != before => {
                    debug!(
                        scan_id = %scan.id,
                        ?before,
                        ?after,
                        "corrected counter drift"
                    );
                    corrected += 1;
                }
                Ok(_) => {}
                Err(e) => warn!(scan_id = %scan.id, error = %e, "counter recompute failed"),
            }
        }
        corrected
    }

    /// Run until the shutdown signal flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => return,
            }
            self.reconcile().await;
        }
    }
}

#[cfg(test)]
#[path = "counters_tests.rs"]
mod tests;
