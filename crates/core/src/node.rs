// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker node record and identity.

use crate::id::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a worker node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Starting => "starting",
            NodeStatus::Running => "running",
            NodeStatus::Stopping => "stopping",
            NodeStatus::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// Cumulative per-node counters published with each heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCounters {
    pub jobs_claimed: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
}

/// A worker node registration row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerNode {
    pub id: NodeId,
    pub hostname: String,
    pub version: String,
    pub status: NodeStatus,
    /// Configured worker-pool concurrency on that node.
    pub worker_count: u32,
    pub started_at_ms: u64,
    pub last_seen_at_ms: u64,
    pub jobs_claimed: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
}

impl WorkerNode {
    pub fn new(id: NodeId, hostname: String, worker_count: u32, now_ms: u64) -> Self {
        Self {
            id,
            hostname,
            version: env!("CARGO_PKG_VERSION").to_string(),
            status: NodeStatus::Starting,
            worker_count,
            started_at_ms: now_ms,
            last_seen_at_ms: now_ms,
            jobs_claimed: 0,
            jobs_completed: 0,
            jobs_failed: 0,
        }
    }

    /// A running node whose heartbeat silence exceeds the threshold is stale
    /// and will be reaped.
    pub fn is_stale(&self, threshold_ms: u64, now_ms: u64) -> bool {
        self.status == NodeStatus::Running
            && now_ms.saturating_sub(self.last_seen_at_ms) > threshold_ms
    }
}

/// Best-effort hostname for node identity. Overridable via configuration.
pub fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

impl NodeId {
    /// Generate a node id for this process instance.
    ///
    /// `{hostname}-{start_epoch_secs}-{suffix}`: the hostname prefix lets a
    /// restarting node reclaim jobs its prior incarnation held, while the
    /// suffix keeps concurrent instances on one host distinct.
    pub fn generate(hostname: &str, start_epoch_ms: u64) -> NodeId {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        NodeId::new(format!(
            "{}-{}-{}",
            hostname,
            start_epoch_ms / 1000,
            &suffix[..8]
        ))
    }

    /// The reclaim prefix shared by every incarnation on `hostname`.
    pub fn host_prefix(hostname: &str) -> String {
        format!("{}-", hostname)
    }
}

#[cfg(test)]
#[path = "node_tests.rs"]
mod tests;
