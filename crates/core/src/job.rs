// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scan job record, status machine, and the handler outcome contract.

use crate::id::{JobId, NodeId, ScanId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Well-known `error_type` values set by the engine itself. Handlers are
/// free to report their own kinds alongside these.
pub mod error_kind {
    /// Retries exhausted; the job is terminally failed.
    pub const MAX_ATTEMPTS_EXCEEDED: &str = "max_attempts_exceeded";
    /// The handler panicked; translated to a fatal outcome.
    pub const PANIC: &str = "panic";
    /// The handler exceeded the job deadline.
    pub const TIMEOUT: &str = "timeout";
    /// The scan was cancelled while the job was in flight.
    pub const CANCELLED: &str = "cancelled";
    /// The claiming worker went stale and the job was reset.
    pub const WORKER_LOST: &str = "worker_lost";
    /// No handler is registered for the job's type.
    pub const UNKNOWN_JOB_TYPE: &str = "unknown_job_type";
}

/// Status of a job through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Claimed,
    Running,
    Completed,
    Failed,
    Cancelled,
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Skipped
        )
    }

    /// Statuses that tie the job to a worker.
    pub fn is_held(self) -> bool {
        matches!(self, JobStatus::Claimed | JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Claimed => "claimed",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// Parameters for enqueueing a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub scan_id: ScanId,
    pub job_type: String,
    pub priority: i32,
    pub target_host: Option<String>,
    pub url: Option<String>,
    pub method: Option<String>,
    pub history_id: Option<i64>,
    pub websocket_connection_id: Option<i64>,
    /// Retry budget; `None` takes the engine-configured default.
    pub max_attempts: Option<u32>,
    pub payload: Vec<u8>,
}

impl NewJob {
    pub fn new(scan_id: ScanId, job_type: impl Into<String>) -> Self {
        Self {
            scan_id,
            job_type: job_type.into(),
            priority: 0,
            target_host: None,
            url: None,
            method: None,
            history_id: None,
            websocket_connection_id: None,
            max_attempts: None,
            payload: Vec::new(),
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn target_host(mut self, host: impl Into<String>) -> Self {
        self.target_host = Some(host.into());
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn history_id(mut self, id: i64) -> Self {
        self.history_id = Some(id);
        self
    }

    pub fn websocket_connection_id(mut self, id: i64) -> Self {
        self.websocket_connection_id = Some(id);
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = Some(n);
        self
    }

    pub fn payload(mut self, bytes: Vec<u8>) -> Self {
        self.payload = bytes;
        self
    }
}

/// A single unit of work within a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: JobId,
    pub scan_id: ScanId,
    pub status: JobStatus,
    /// Opaque tag selecting the handler; the engine never inspects payloads.
    pub job_type: String,
    /// Higher first; ties break by ascending id (FIFO within a priority).
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub websocket_connection_id: Option<i64>,
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<u64>,
    /// Retry backoff: the row is not claimable until this time passes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttled_until_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default)]
    pub issues_found: u32,
    /// Opaque resume state owned by the handler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Vec<u8>>,
    /// Opaque handler-defined payload bytes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
    pub created_at_ms: u64,
}

impl ScanJob {
    /// Materialize a row from enqueue parameters. The id is assigned by the
    /// storage layer on insert.
    pub fn from_new(new: NewJob, created_at_ms: u64) -> Self {
        Self {
            id: JobId::new(0),
            scan_id: new.scan_id,
            status: JobStatus::Pending,
            job_type: new.job_type,
            priority: new.priority,
            target_host: new.target_host,
            url: new.url,
            method: new.method,
            history_id: new.history_id,
            websocket_connection_id: new.websocket_connection_id,
            attempts: 0,
            max_attempts: new.max_attempts.unwrap_or(3),
            worker_id: None,
            claimed_at_ms: None,
            started_at_ms: None,
            completed_at_ms: None,
            throttled_until_ms: None,
            error_type: None,
            error_message: None,
            http_status: None,
            issues_found: 0,
            checkpoint: None,
            payload: new.payload,
            created_at_ms,
        }
    }

    /// Whether another attempt is still within the retry budget.
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// What a handler reports back for a finished invocation.
///
/// This is the entire surface between audit subsystems and the engine:
/// panics are translated to `Fatal { kind: "panic" }` by the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Ok { issues_found: u32 },
    Retryable { kind: String, message: String },
    Fatal { kind: String, message: String },
}

impl HandlerOutcome {
    pub fn ok(issues_found: u32) -> Self {
        HandlerOutcome::Ok { issues_found }
    }

    pub fn retryable(kind: impl Into<String>, message: impl Into<String>) -> Self {
        HandlerOutcome::Retryable {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn fatal(kind: impl Into<String>, message: impl Into<String>) -> Self {
        HandlerOutcome::Fatal {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
