// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-node dispatch loop: claim eligible jobs, hand them to the pool.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use strix_core::Clock;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::job_store::JobStore;
use crate::node_registry::NodeRegistry;
use crate::registry::Registry;
use crate::worker_pool::WorkerPool;
use crate::EngineError;

/// Claims work for one node. Backpressure falls out of the claim limit:
/// never more than the pool's free slots, so nothing queues node-side.
pub struct Dispatcher<C: Clock> {
    store: Arc<JobStore<C>>,
    pool: Arc<WorkerPool<C>>,
    nodes: Arc<NodeRegistry<C>>,
    registry: Arc<Registry>,
    tick: Duration,
    claim_batch_max: usize,
}

impl<C: Clock> Dispatcher<C> {
    pub fn new(
        store: Arc<JobStore<C>>,
        pool: Arc<WorkerPool<C>>,
        nodes: Arc<NodeRegistry<C>>,
        registry: Arc<Registry>,
        tick: Duration,
        claim_batch_max: usize,
    ) -> Self {
        Self {
            store,
            pool,
            nodes,
            registry,
            tick,
            claim_batch_max,
        }
    }

    /// One tick: heartbeat, then claim up to the free-slot count and submit
    /// in claim order. Returns how many jobs were dispatched.
    pub async fn tick(&self) -> Result<usize, EngineError> {
        if let Err(e) = self.nodes.heartbeat().await {
            warn!(error = %e, "heartbeat failed");
        }

        let slots = self.pool.free_slots();
        if slots == 0 {
            return Ok(0);
        }

        let job_types = self.registry.job_types();
        let limit = slots.min(self.claim_batch_max);
        let batch = self
            .store
            .claim(self.nodes.node_id(), &job_types, limit)
            .await?;
        let dispatched = batch.len();
        if dispatched > 0 {
            debug!(count = dispatched, "dispatching claimed jobs");
        }
        for job in batch {
            self.pool
                .counters()
                .jobs_claimed
                .fetch_add(1, Ordering::Relaxed);
            self.pool.submit(job).await?;
        }
        Ok(dispatched)
    }

    /// Run until the shutdown signal flips. Claim errors are transient by
    /// contract; the next tick retries.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.tick) => {}
                _ = shutdown.changed() => return,
            }
            if let Err(e) = self.tick().await {
                warn!(error = %e, "dispatcher tick failed");
            }
        }
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
