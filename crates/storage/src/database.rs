// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `Database` trait: every operation the engine needs from a backend.
//!
//! Operations that depend on time take an explicit `now_ms` so that callers
//! drive them from their [`strix_core::Clock`], keeping staleness and
//! backoff behavior deterministic under test.

use async_trait::async_trait;
use std::collections::BTreeMap;
use strix_core::{
    CounterDelta, JobCounters, JobId, JobStatus, NewJob, NodeCounters, NodeId, NodeStatus, Scan,
    ScanId, ScanJob, ScanPhase, ScanStatus, WorkerNode,
};

use crate::StorageError;

/// Well-known advisory lock keys for the cluster-singleton loops.
pub mod lock {
    /// Phase orchestrator leader election.
    pub const ORCHESTRATOR: i64 = 1;
    /// Stale reaper election.
    pub const REAPER: i64 = 2;
}

/// Offset/limit pagination.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    /// No pagination; every matching row.
    pub fn all() -> Self {
        Self {
            offset: 0,
            limit: usize::MAX,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// Filter for scan listings. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    pub workspace_id: Option<i64>,
    pub statuses: Vec<ScanStatus>,
}

/// Filter for job listings. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub statuses: Vec<JobStatus>,
    pub job_types: Vec<String>,
}

/// Aggregate view over a scan's jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ScanStats {
    pub jobs_by_status: BTreeMap<JobStatus, u64>,
    pub jobs_by_type: BTreeMap<String, u64>,
    pub total_issues: u64,
}

/// Terminal fields written by `complete_job`.
#[derive(Debug, Clone, Default)]
pub struct JobCompletion {
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub http_status: Option<u16>,
    pub issues_found: u32,
}

/// Result of a successful `complete_job` transition.
#[derive(Debug, Clone)]
pub struct CompletedJob {
    pub job: ScanJob,
    /// Status the row held before the transition, for counter deltas.
    pub previous_status: JobStatus,
}

/// Storage operations required by the engine.
///
/// Contracts the implementation must honor:
///
/// - Conditional transitions (`set_scan_status`, `claim_jobs`, `start_job`,
///   `complete_job`, `requeue_job`, reset operations) only apply when the
///   row is still in the expected state, and report whether they did. Under
///   contention exactly one caller wins.
/// - `adjust_scan_counters` uses per-field atomic increments, never
///   read-modify-write.
/// - `claim_jobs` orders by (priority DESC, id ASC) and filters out rows of
///   scans that are not active, breaker-throttled, or at their concurrency
///   ceiling, and rows whose own retry delay has not elapsed.
/// - Advisory locks are exclusive per key and released explicitly.
#[async_trait]
pub trait Database: Send + Sync {
    // ── scans ──────────────────────────────────────────────────────────

    /// Insert a scan in its initial state; returns the assigned id.
    async fn insert_scan(&self, scan: Scan, now_ms: u64) -> Result<ScanId, StorageError>;

    async fn get_scan(&self, id: ScanId) -> Result<Scan, StorageError>;

    /// Newest-first listing.
    async fn list_scans(&self, filter: &ScanFilter, page: Page) -> Result<Vec<Scan>, StorageError>;

    async fn list_scans_by_status(
        &self,
        statuses: &[ScanStatus],
    ) -> Result<Vec<Scan>, StorageError>;

    /// Delete the scan and cascade its jobs. Returns false when absent.
    async fn delete_scan(&self, id: ScanId) -> Result<bool, StorageError>;

    /// Conditionally transition status when the current status is in `from`.
    ///
    /// Side effects on success: `started_at` is stamped on the first move to
    /// crawling, `paused_at` + `previous_status` on a move to paused, and
    /// `completed_at` on a move to any terminal status.
    async fn set_scan_status(
        &self,
        id: ScanId,
        from: &[ScanStatus],
        to: ScanStatus,
        now_ms: u64,
    ) -> Result<bool, StorageError>;

    /// Resume a paused scan by restoring `previous_status`. Returns the
    /// restored status, or `None` when the scan is not paused.
    async fn restore_scan_status(
        &self,
        id: ScanId,
        now_ms: u64,
    ) -> Result<Option<ScanStatus>, StorageError>;

    async fn set_scan_phase(&self, id: ScanId, phase: ScanPhase) -> Result<(), StorageError>;

    async fn set_scan_checkpoint(
        &self,
        id: ScanId,
        blob: Option<Vec<u8>>,
    ) -> Result<(), StorageError>;

    /// Atomic per-field counter adjustment keyed on scan id.
    async fn adjust_scan_counters(
        &self,
        id: ScanId,
        delta: CounterDelta,
    ) -> Result<(), StorageError>;

    /// Recompute counters from job rows and store the corrected values.
    async fn recompute_scan_counters(&self, id: ScanId) -> Result<JobCounters, StorageError>;

    /// Increment consecutive failures, stamp `last_failure_at`; returns the
    /// new count.
    async fn bump_scan_failures(&self, id: ScanId, now_ms: u64) -> Result<u32, StorageError>;

    /// Zero consecutive failures and clear the throttle window.
    async fn clear_scan_failures(&self, id: ScanId) -> Result<(), StorageError>;

    async fn set_scan_throttle(
        &self,
        id: ScanId,
        until_ms: Option<u64>,
    ) -> Result<(), StorageError>;

    async fn scan_stats(&self, id: ScanId) -> Result<ScanStats, StorageError>;

    // ── jobs ───────────────────────────────────────────────────────────

    async fn insert_job(&self, new: NewJob, now_ms: u64) -> Result<JobId, StorageError>;

    async fn get_job(&self, id: JobId) -> Result<ScanJob, StorageError>;

    /// Atomically claim up to `limit` eligible pending jobs for `worker`.
    ///
    /// Returns only rows this caller actually transitioned; concurrent
    /// claimers never receive the same row. An empty `job_types` set claims
    /// nothing.
    async fn claim_jobs(
        &self,
        worker: &NodeId,
        job_types: &[String],
        limit: usize,
        now_ms: u64,
    ) -> Result<Vec<ScanJob>, StorageError>;

    /// claimed → running, only for the owning worker.
    async fn start_job(
        &self,
        id: JobId,
        worker: &NodeId,
        now_ms: u64,
    ) -> Result<bool, StorageError>;

    /// claimed|running → terminal. Idempotent on job id: returns `None`
    /// when the row is already terminal (or was never held).
    async fn complete_job(
        &self,
        id: JobId,
        status: JobStatus,
        completion: JobCompletion,
        now_ms: u64,
    ) -> Result<Option<CompletedJob>, StorageError>;

    /// claimed|running → pending for a retry: clears worker fields, bumps
    /// attempts, and arms the row's retry delay. Only the owning worker may
    /// requeue.
    async fn requeue_job(
        &self,
        id: JobId,
        worker: &NodeId,
        throttled_until_ms: Option<u64>,
        now_ms: u64,
    ) -> Result<bool, StorageError>;

    async fn set_job_checkpoint(
        &self,
        id: JobId,
        blob: Option<Vec<u8>>,
    ) -> Result<(), StorageError>;

    /// Return claimed|running jobs held by any of `workers` to pending
    /// (attempts incremented; rows out of attempts fail terminally).
    /// Returns the affected (job, scan) pairs.
    async fn reset_stale_jobs(
        &self,
        workers: &[NodeId],
        now_ms: u64,
    ) -> Result<Vec<(JobId, ScanId)>, StorageError>;

    /// Like `reset_stale_jobs`, but keyed by worker-id prefix and sparing
    /// `exclude` (the caller's own live id). Used at node startup to reclaim
    /// jobs a prior incarnation held.
    async fn reset_jobs_with_worker_prefix(
        &self,
        prefix: &str,
        exclude: &NodeId,
        now_ms: u64,
    ) -> Result<Vec<(JobId, ScanId)>, StorageError>;

    /// Batch-cancel every pending job of a scan. Returns the count.
    async fn cancel_pending_jobs(&self, scan_id: ScanId, now_ms: u64) -> Result<u64, StorageError>;

    /// Ascending-id listing within a scan.
    async fn list_jobs(
        &self,
        scan_id: ScanId,
        filter: &JobFilter,
        page: Page,
    ) -> Result<Vec<ScanJob>, StorageError>;

    /// Count jobs matching the status and type sets (empty set = any).
    async fn count_jobs(
        &self,
        scan_id: ScanId,
        statuses: &[JobStatus],
        job_types: &[String],
    ) -> Result<u64, StorageError>;

    // ── worker nodes ───────────────────────────────────────────────────

    /// Upsert the node row (a restarting node re-registers under a new id).
    async fn register_node(&self, node: WorkerNode) -> Result<(), StorageError>;

    async fn get_node(&self, id: &NodeId) -> Result<WorkerNode, StorageError>;

    async fn list_nodes(&self) -> Result<Vec<WorkerNode>, StorageError>;

    /// Refresh `last_seen_at` and cumulative counters. Returns false when
    /// the node row is gone or already stopped (the node should re-register).
    async fn heartbeat_node(
        &self,
        id: &NodeId,
        counters: NodeCounters,
        now_ms: u64,
    ) -> Result<bool, StorageError>;

    async fn set_node_status(
        &self,
        id: &NodeId,
        status: NodeStatus,
        now_ms: u64,
    ) -> Result<(), StorageError>;

    /// Running nodes whose heartbeat silence exceeds the threshold.
    async fn stale_nodes(
        &self,
        threshold_ms: u64,
        now_ms: u64,
    ) -> Result<Vec<WorkerNode>, StorageError>;

    /// Transition the given nodes to stopped; returns the ids actually
    /// transitioned (a concurrent reaper's repeat is a no-op).
    async fn mark_nodes_stopped(
        &self,
        ids: &[NodeId],
        now_ms: u64,
    ) -> Result<Vec<NodeId>, StorageError>;

    // ── advisory locks ─────────────────────────────────────────────────

    /// Acquire the exclusive lock for `key`, or return false when another
    /// owner holds it. Re-acquiring a key already held by `owner` succeeds.
    async fn try_advisory_lock(&self, key: i64, owner: &str) -> Result<bool, StorageError>;

    /// Release `key` if held by `owner`; otherwise a no-op.
    async fn release_advisory_lock(&self, key: i64, owner: &str) -> Result<(), StorageError>;
}
