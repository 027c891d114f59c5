// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stale reaper: resurrects jobs abandoned by dead nodes.
//!
//! Runs on one node at a time per advisory lock, every half stale
//! threshold. A concurrent reaper's sweep is a no-op: `mark_nodes_stopped`
//! only returns nodes this caller transitioned, and jobs of nodes someone
//! else already stopped were reset by that someone.

use std::sync::Arc;
use std::time::Duration;

use strix_core::{Clock, Event, EventSink, NodeId};
use strix_storage::{lock, Database};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::job_store::JobStore;
use crate::EngineError;

pub struct StaleReaper<C: Clock> {
    db: Arc<dyn Database>,
    jobs: Arc<JobStore<C>>,
    sink: Arc<dyn EventSink>,
    clock: C,
    stale_threshold: Duration,
    /// Advisory lock owner (this node's id).
    owner: String,
}

impl<C: Clock> StaleReaper<C> {
    pub fn new(
        db: Arc<dyn Database>,
        jobs: Arc<JobStore<C>>,
        sink: Arc<dyn EventSink>,
        clock: C,
        stale_threshold: Duration,
        owner: String,
    ) -> Self {
        Self {
            db,
            jobs,
            sink,
            clock,
            stale_threshold,
            owner,
        }
    }

    /// One sweep: stop stale nodes, reset their jobs, refresh counters of
    /// the scans touched. Returns the number of nodes reaped.
    pub async fn sweep(&self) -> Result<usize, EngineError> {
        let now_ms = self.clock.epoch_ms();
        let stale = self
            .db
            .stale_nodes(self.stale_threshold.as_millis() as u64, now_ms)
            .await?;
        if stale.is_empty() {
            return Ok(0);
        }

        let ids: Vec<NodeId> = stale.iter().map(|n| n.id.clone()).collect();
        let stopped = self.db.mark_nodes_stopped(&ids, now_ms).await?;
        if stopped.is_empty() {
            return Ok(0);
        }
        for id in &stopped {
            info!(node_id = %id, "stale node stopped");
            self.sink.emit(&Event::NodeStopped {
                node_id: id.clone(),
            });
        }

        let scan_ids = self.jobs.reset_stale(&stopped).await?;
        for scan_id in &scan_ids {
            if let Err(e) = self.db.recompute_scan_counters(*scan_id).await {
                warn!(scan_id = %scan_id, error = %e, "counter refresh failed");
            }
        }
        info!(
            nodes = stopped.len(),
            scans = scan_ids.len(),
            "stale sweep reset abandoned jobs"
        );
        Ok(stopped.len())
    }

    /// Run elected sweeps until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let interval = self.stale_threshold / 2;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => return,
            }
            let leading = match self.db.try_advisory_lock(lock::REAPER, &self.owner).await {
                Ok(leading) => leading,
                Err(e) => {
                    warn!(error = %e, "reaper lock acquisition failed");
                    continue;
                }
            };
            if !leading {
                continue;
            }
            if let Err(e) = self.sweep().await {
                warn!(error = %e, "stale sweep failed");
            }
            if let Err(e) = self.db.release_advisory_lock(lock::REAPER, &self.owner).await {
                warn!(error = %e, "reaper lock release failed");
            }
        }
    }
}

#[cfg(test)]
#[path = "reaper_tests.rs"]
mod tests;
