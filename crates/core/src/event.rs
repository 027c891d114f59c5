// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Observability events emitted on every state transition.
//!
//! The engine only emits; delivery is an external collaborator's concern.
//! Serializes with `{"type": "scan:status_changed", ...fields}` format.

use crate::id::{JobId, NodeId, ScanId};
use crate::job::JobStatus;
use crate::scan::{ScanPhase, ScanStatus};
use serde::{Deserialize, Serialize};

/// Typed state-transition events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    // -- scan --
    #[serde(rename = "scan:created")]
    ScanCreated { scan_id: ScanId, workspace_id: i64 },

    #[serde(rename = "scan:status_changed")]
    ScanStatusChanged {
        scan_id: ScanId,
        from: ScanStatus,
        to: ScanStatus,
    },

    #[serde(rename = "scan:phase_advanced")]
    PhaseAdvanced {
        scan_id: ScanId,
        from: ScanPhase,
        to: ScanPhase,
    },

    #[serde(rename = "scan:throttled")]
    ScanThrottled { scan_id: ScanId, until_ms: u64 },

    // -- job --
    #[serde(rename = "job:enqueued")]
    JobEnqueued {
        job_id: JobId,
        scan_id: ScanId,
        job_type: String,
    },

    #[serde(rename = "job:claimed")]
    JobClaimed {
        job_id: JobId,
        scan_id: ScanId,
        worker_id: NodeId,
    },

    #[serde(rename = "job:started")]
    JobStarted { job_id: JobId, worker_id: NodeId },

    #[serde(rename = "job:completed")]
    JobCompleted {
        job_id: JobId,
        scan_id: ScanId,
        status: JobStatus,
        issues_found: u32,
    },

    #[serde(rename = "job:reset")]
    JobReset { job_id: JobId, scan_id: ScanId },

    // -- node --
    #[serde(rename = "node:registered")]
    NodeRegistered { node_id: NodeId, worker_count: u32 },

    #[serde(rename = "node:heartbeat")]
    NodeHeartbeat { node_id: NodeId },

    #[serde(rename = "node:stopped")]
    NodeStopped { node_id: NodeId },
}

impl Event {
    /// Short name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Event::ScanCreated { .. } => "scan:created",
            Event::ScanStatusChanged { .. } => "scan:status_changed",
            Event::PhaseAdvanced { .. } => "scan:phase_advanced",
            Event::ScanThrottled { .. } => "scan:throttled",
            Event::JobEnqueued { .. } => "job:enqueued",
            Event::JobClaimed { .. } => "job:claimed",
            Event::JobStarted { .. } => "job:started",
            Event::JobCompleted { .. } => "job:completed",
            Event::JobReset { .. } => "job:reset",
            Event::NodeRegistered { .. } => "node:registered",
            Event::NodeHeartbeat { .. } => "node:heartbeat",
            Event::NodeStopped { .. } => "node:stopped",
        }
    }
}

/// Where emitted events go. Implementations must be cheap and non-blocking;
/// the engine calls this inline on state transitions.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &Event) {}
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
