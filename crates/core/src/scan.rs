// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scan record and lifecycle state machine.

use crate::id::ScanId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lifecycle status of a scan.
///
/// Terminal statuses (completed, cancelled, failed) are absorbing: no
/// further transitions are permitted once one is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Pending,
    Crawling,
    Scanning,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl ScanStatus {
    /// Check whether a transition to `to` is allowed by the state machine.
    ///
    /// Pause captures the previous status; resume (paused → crawling or
    /// scanning) restores it. Terminal states allow nothing.
    pub fn can_transition(self, to: ScanStatus) -> bool {
        use ScanStatus::*;
        match (self, to) {
            (Pending, Crawling) | (Pending, Cancelled) => true,
            (Crawling, Scanning) | (Crawling, Paused) | (Crawling, Cancelled)
            | (Crawling, Failed) => true,
            (Scanning, Completed) | (Scanning, Paused) | (Scanning, Cancelled)
            | (Scanning, Failed) => true,
            (Paused, Crawling) | (Paused, Scanning) | (Paused, Cancelled) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ScanStatus::Completed | ScanStatus::Cancelled | ScanStatus::Failed
        )
    }

    /// Statuses whose jobs are eligible for claiming.
    pub fn is_active(self) -> bool {
        matches!(self, ScanStatus::Crawling | ScanStatus::Scanning)
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Crawling => "crawling",
            ScanStatus::Scanning => "scanning",
            ScanStatus::Paused => "paused",
            ScanStatus::Completed => "completed",
            ScanStatus::Cancelled => "cancelled",
            ScanStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Rejected scan status transition.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid scan transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: ScanStatus,
    pub to: ScanStatus,
}

/// Execution phase of a scan. Phases form a linear progression; each phase
/// materializes as a batch of jobs and advances when that batch drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    Pending,
    Crawling,
    Fingerprinting,
    Discovering,
    Nuclei,
    ActiveScan,
    WebsocketScan,
    Completed,
}

impl ScanPhase {
    /// The phase that follows this one, or `None` past the end.
    pub fn next(self) -> Option<ScanPhase> {
        use ScanPhase::*;
        match self {
            Pending => Some(Crawling),
            Crawling => Some(Fingerprinting),
            Fingerprinting => Some(Discovering),
            Discovering => Some(Nuclei),
            Nuclei => Some(ActiveScan),
            ActiveScan => Some(WebsocketScan),
            WebsocketScan => Some(Completed),
            Completed => None,
        }
    }

    /// The scan status that corresponds to executing this phase.
    pub fn running_status(self) -> ScanStatus {
        match self {
            ScanPhase::Pending => ScanStatus::Pending,
            ScanPhase::Crawling => ScanStatus::Crawling,
            ScanPhase::Completed => ScanStatus::Completed,
            _ => ScanStatus::Scanning,
        }
    }
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanPhase::Pending => "pending",
            ScanPhase::Crawling => "crawling",
            ScanPhase::Fingerprinting => "fingerprinting",
            ScanPhase::Discovering => "discovering",
            ScanPhase::Nuclei => "nuclei",
            ScanPhase::ActiveScan => "active_scan",
            ScanPhase::WebsocketScan => "websocket_scan",
            ScanPhase::Completed => "completed",
        };
        write!(f, "{}", s)
    }
}

fn default_true() -> bool {
    true
}

/// Options supplied at scan creation. Immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Seed URLs handed to the crawl phase.
    #[serde(default)]
    pub start_urls: Vec<String>,
    #[serde(default = "default_true")]
    pub fingerprint_enabled: bool,
    #[serde(default = "default_true")]
    pub discovery_enabled: bool,
    #[serde(default = "default_true")]
    pub nuclei_enabled: bool,
    #[serde(default = "default_true")]
    pub websocket_enabled: bool,
    /// Request-rate ceiling enforced by handlers (requests per second).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rps: Option<u32>,
    /// Ceiling on concurrently claimed-or-running jobs for this scan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_jobs: Option<u32>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            start_urls: Vec::new(),
            fingerprint_enabled: true,
            discovery_enabled: true,
            nuclei_enabled: true,
            websocket_enabled: true,
            max_rps: None,
            max_concurrent_jobs: None,
        }
    }
}

impl ScanOptions {
    /// Whether the given phase is enabled for this scan.
    ///
    /// Crawl and the pseudo phases (pending, completed) cannot be disabled.
    pub fn phase_enabled(&self, phase: ScanPhase) -> bool {
        match phase {
            ScanPhase::Fingerprinting => self.fingerprint_enabled,
            ScanPhase::Discovering => self.discovery_enabled,
            ScanPhase::Nuclei => self.nuclei_enabled,
            ScanPhase::WebsocketScan => self.websocket_enabled,
            _ => true,
        }
    }
}

/// Denormalized per-scan job counters.
///
/// These are caches over job rows, updated by atomic per-field increments on
/// every job transition and periodically reconciled against an aggregation
/// query. Claimed jobs count as `running`; skipped jobs count as `completed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    pub total: i64,
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

impl JobCounters {
    /// Invariant: total equals the sum of the per-status counters.
    pub fn is_consistent(&self) -> bool {
        self.total == self.pending + self.running + self.completed + self.failed + self.cancelled
    }

    /// Jobs not yet in a terminal state.
    pub fn live(&self) -> i64 {
        self.pending + self.running
    }

    /// Apply a delta field-by-field. The storage layer performs this with
    /// atomic per-column increments; this helper is the in-memory equivalent.
    pub fn apply(&mut self, delta: CounterDelta) {
        self.total += delta.total;
        self.pending += delta.pending;
        self.running += delta.running;
        self.completed += delta.completed;
        self.failed += delta.failed;
        self.cancelled += delta.cancelled;
    }
}

/// An atomic adjustment to [`JobCounters`], one signed step per field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterDelta {
    pub total: i64,
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

impl CounterDelta {
    pub fn is_zero(&self) -> bool {
        self == &CounterDelta::default()
    }

    /// Fold another delta into this one.
    pub fn accumulate(&mut self, other: CounterDelta) {
        self.total += other.total;
        self.pending += other.pending;
        self.running += other.running;
        self.completed += other.completed;
        self.failed += other.failed;
        self.cancelled += other.cancelled;
    }
}

/// A scan record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    pub id: ScanId,
    pub workspace_id: i64,
    pub title: String,
    pub options: ScanOptions,
    pub status: ScanStatus,
    /// Status captured when the scan was paused; restored on resume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<ScanStatus>,
    pub phase: ScanPhase,
    #[serde(default)]
    pub counters: JobCounters,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<u64>,
    /// Circuit breaker state: consecutive job failures since the last success.
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_at_ms: Option<u64>,
    /// While set and in the future, no jobs of this scan are claimed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttled_until_ms: Option<u64>,
    /// Opaque resume state owned by the phase orchestrator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Vec<u8>>,
}

impl Scan {
    /// Build a new scan record in its initial state. The id is a placeholder
    /// until the storage layer assigns one on insert.
    pub fn new(workspace_id: i64, title: impl Into<String>, options: ScanOptions) -> Self {
        Self {
            id: ScanId::new(0),
            workspace_id,
            title: title.into(),
            options,
            status: ScanStatus::Pending,
            previous_status: None,
            phase: ScanPhase::Pending,
            counters: JobCounters::default(),
            created_at_ms: 0,
            started_at_ms: None,
            paused_at_ms: None,
            completed_at_ms: None,
            consecutive_failures: 0,
            last_failure_at_ms: None,
            throttled_until_ms: None,
            checkpoint: None,
        }
    }

    /// Whether the circuit breaker currently throttles this scan.
    pub fn is_throttled(&self, now_ms: u64) -> bool {
        self.throttled_until_ms.is_some_and(|until| until > now_ms)
    }
}

#[cfg(test)]
#[path = "scan_tests.rs"]
mod tests;
