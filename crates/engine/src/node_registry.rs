// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker node registry handle: identity, heartbeats, graceful shutdown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use strix_core::{node, Clock, Event, EventSink, NodeId, NodeStatus, WorkerNode};
use strix_storage::Database;
use tracing::{info, warn};

use crate::worker_pool::PoolCounters;

use crate::EngineError;

/// This node's presence in the shared database.
///
/// `heartbeat` is throttled internally, so callers (the dispatcher ticks
/// far more often than the heartbeat interval) can invoke it every tick.
pub struct NodeRegistry<C: Clock> {
    db: Arc<dyn Database>,
    sink: Arc<dyn EventSink>,
    clock: C,
    node_id: NodeId,
    hostname: String,
    worker_count: u32,
    heartbeat_interval: Duration,
    counters: Arc<PoolCounters>,
    last_beat_ms: AtomicU64,
}

impl<C: Clock> NodeRegistry<C> {
    pub fn new(
        db: Arc<dyn Database>,
        sink: Arc<dyn EventSink>,
        clock: C,
        hostname: Option<String>,
        worker_count: u32,
        heartbeat_interval: Duration,
        counters: Arc<PoolCounters>,
    ) -> Self {
        let hostname = hostname.unwrap_or_else(node::hostname);
        let node_id = NodeId::generate(&hostname, clock.epoch_ms());
        Self {
            db,
            sink,
            clock,
            node_id,
            hostname,
            worker_count,
            heartbeat_interval,
            counters,
            last_beat_ms: AtomicU64::new(0),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Register this node and publish the first heartbeat.
    pub async fn register(&self) -> Result<(), EngineError> {
        let now_ms = self.clock.epoch_ms();
        let node = WorkerNode::new(
            self.node_id.clone(),
            self.hostname.clone(),
            self.worker_count,
            now_ms,
        );
        self.db.register_node(node).await?;
        self.db
            .heartbeat_node(&self.node_id, self.counters.snapshot(), now_ms)
            .await?;
        self.last_beat_ms.store(now_ms, Ordering::Relaxed);
        info!(node_id = %self.node_id, workers = self.worker_count, "node registered");
        self.sink.emit(&Event::NodeRegistered {
            node_id: self.node_id.clone(),
            worker_count: self.worker_count,
        });
        Ok(())
    }

    /// Publish a heartbeat if the interval elapsed; otherwise a no-op.
    ///
    /// A node the reaper already declared dead re-registers here, so a
    /// briefly-partitioned node rejoins instead of silently working
    /// unregistered.
    pub async fn heartbeat(&self) -> Result<(), EngineError> {
        let now_ms = self.clock.epoch_ms();
        let last = self.last_beat_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) < self.heartbeat_interval.as_millis() as u64 {
            return Ok(());
        }
        let alive = self
            .db
            .heartbeat_node(&self.node_id, self.counters.snapshot(), now_ms)
            .await?;
        if !alive {
            warn!(node_id = %self.node_id, "heartbeat rejected; re-registering");
            self.register().await?;
            return Ok(());
        }
        self.last_beat_ms.store(now_ms, Ordering::Relaxed);
        self.sink.emit(&Event::NodeHeartbeat {
            node_id: self.node_id.clone(),
        });
        Ok(())
    }

    /// Graceful shutdown: publish final counters, then stopping → stopped.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let now_ms = self.clock.epoch_ms();
        let _ = self
            .db
            .heartbeat_node(&self.node_id, self.counters.snapshot(), now_ms)
            .await;
        self.db
            .set_node_status(&self.node_id, NodeStatus::Stopping, now_ms)
            .await?;
        self.db
            .set_node_status(&self.node_id, NodeStatus::Stopped, now_ms)
            .await?;
        info!(node_id = %self.node_id, "node stopped");
        self.sink.emit(&Event::NodeStopped {
            node_id: self.node_id.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
#[path = "node_registry_tests.rs"]
mod tests;
