// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory `Database` implementation.
//!
//! A single `parking_lot::Mutex` around the row maps gives every operation
//! the same atomicity a relational backend gets from transactions: a claim
//! batch observes and transitions rows under one lock acquisition, so
//! concurrent claimers can never win the same row. `BTreeMap` keys give the
//! ascending-id iteration order the claim tie-break relies on.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use strix_core::{
    error_kind, CounterDelta, JobCounters, JobId, JobStatus, NewJob, NodeCounters, NodeId,
    NodeStatus, Scan, ScanId, ScanJob, ScanPhase, ScanStatus, WorkerNode,
};

use crate::database::{
    CompletedJob, Database, JobCompletion, JobFilter, Page, ScanFilter, ScanStats,
};
use crate::StorageError;

#[derive(Default)]
struct Inner {
    scans: BTreeMap<i64, Scan>,
    jobs: BTreeMap<i64, ScanJob>,
    nodes: HashMap<NodeId, WorkerNode>,
    locks: HashMap<i64, String>,
    next_scan_id: i64,
    next_job_id: i64,
    /// Failure injection: while positive, `complete_job` returns
    /// `Unavailable` and decrements. Drives the engine's write-retry tests.
    fail_completes: u32,
}

/// Serialized durable rows, for single-file state snapshots. Advisory
/// locks and failure injection are runtime-only and not persisted.
#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    scans: BTreeMap<i64, Scan>,
    jobs: BTreeMap<i64, ScanJob>,
    #[serde(default)]
    nodes: HashMap<NodeId, WorkerNode>,
    next_scan_id: i64,
    next_job_id: i64,
}

/// Shared in-memory database. Clone the `Arc` to hand the same medium to
/// multiple nodes.
#[derive(Default)]
pub struct MemoryDatabase {
    inner: Mutex<Inner>,
}

impl MemoryDatabase {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serialize the durable rows to a JSON snapshot.
    pub fn dump(&self) -> Result<Vec<u8>, StorageError> {
        let inner = self.inner.lock();
        let snapshot = Snapshot {
            scans: inner.scans.clone(),
            jobs: inner.jobs.clone(),
            nodes: inner.nodes.clone(),
            next_scan_id: inner.next_scan_id,
            next_job_id: inner.next_job_id,
        };
        Ok(serde_json::to_vec_pretty(&snapshot)?)
    }

    /// Rebuild a database from a snapshot produced by [`Self::dump`].
    pub fn load(bytes: &[u8]) -> Result<Arc<Self>, StorageError> {
        let snapshot: Snapshot = serde_json::from_slice(bytes)?;
        Ok(Arc::new(Self {
            inner: Mutex::new(Inner {
                scans: snapshot.scans,
                jobs: snapshot.jobs,
                nodes: snapshot.nodes,
                locks: HashMap::new(),
                next_scan_id: snapshot.next_scan_id,
                next_job_id: snapshot.next_job_id,
                fail_completes: 0,
            }),
        }))
    }

    /// Make the next `n` `complete_job` calls fail with a transient error.
    pub fn fail_next_completes(&self, n: u32) {
        self.inner.lock().fail_completes = n;
    }

    fn recompute_locked(inner: &mut Inner, id: ScanId) -> Result<JobCounters, StorageError> {
        let mut counters = JobCounters::default();
        for job in inner.jobs.values().filter(|j| j.scan_id == id) {
            counters.total += 1;
            match job.status {
                JobStatus::Pending => counters.pending += 1,
                JobStatus::Claimed | JobStatus::Running => counters.running += 1,
                JobStatus::Completed | JobStatus::Skipped => counters.completed += 1,
                JobStatus::Failed => counters.failed += 1,
                JobStatus::Cancelled => counters.cancelled += 1,
            }
        }
        let scan = inner
            .scans
            .get_mut(&id.get())
            .ok_or(StorageError::ScanNotFound(id))?;
        scan.counters = counters;
        Ok(counters)
    }

    fn fail_job_locked(job: &mut ScanJob, error_type: &str, message: String, now_ms: u64) {
        job.status = JobStatus::Failed;
        job.worker_id = None;
        job.error_type = Some(error_type.to_string());
        job.error_message = Some(message);
        job.completed_at_ms = Some(now_ms);
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn insert_scan(&self, mut scan: Scan, now_ms: u64) -> Result<ScanId, StorageError> {
        let mut inner = self.inner.lock();
        inner.next_scan_id += 1;
        let id = ScanId::new(inner.next_scan_id);
        scan.id = id;
        scan.created_at_ms = now_ms;
        inner.scans.insert(id.get(), scan);
        Ok(id)
    }

    async fn get_scan(&self, id: ScanId) -> Result<Scan, StorageError> {
        self.inner
            .lock()
            .scans
            .get(&id.get())
            .cloned()
            .ok_or(StorageError::ScanNotFound(id))
    }

    async fn list_scans(
        &self,
        filter: &ScanFilter,
        page: Page,
    ) -> Result<Vec<Scan>, StorageError> {
        let inner = self.inner.lock();
        Ok(inner
            .scans
            .values()
            .rev()
            .filter(|s| filter.workspace_id.is_none_or(|w| s.workspace_id == w))
            .filter(|s| filter.statuses.is_empty() || filter.statuses.contains(&s.status))
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect())
    }

    async fn list_scans_by_status(
        &self,
        statuses: &[ScanStatus],
    ) -> Result<Vec<Scan>, StorageError> {
        let inner = self.inner.lock();
        Ok(inner
            .scans
            .values()
            .filter(|s| statuses.contains(&s.status))
            .cloned()
            .collect())
    }

    async fn delete_scan(&self, id: ScanId) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock();
        let existed = inner.scans.remove(&id.get()).is_some();
        if existed {
            inner.jobs.retain(|_, j| j.scan_id != id);
        }
        Ok(existed)
    }

    async fn set_scan_status(
        &self,
        id: ScanId,
        from: &[ScanStatus],
        to: ScanStatus,
        now_ms: u64,
    ) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock();
        let scan = inner
            .scans
            .get_mut(&id.get())
            .ok_or(StorageError::ScanNotFound(id))?;
        if !from.contains(&scan.status) {
            return Ok(false);
        }
        let current = scan.status;
        scan.status = to;
        match to {
            ScanStatus::Crawling if scan.started_at_ms.is_none() => {
                scan.started_at_ms = Some(now_ms);
            }
            ScanStatus::Paused => {
                scan.previous_status = Some(current);
                scan.paused_at_ms = Some(now_ms);
            }
            ScanStatus::Completed | ScanStatus::Cancelled | ScanStatus::Failed => {
                scan.completed_at_ms = Some(now_ms);
            }
            _ => {}
        }
        Ok(true)
    }

    async fn restore_scan_status(
        &self,
        id: ScanId,
        _now_ms: u64,
    ) -> Result<Option<ScanStatus>, StorageError> {
        let mut inner = self.inner.lock();
        let scan = inner
            .scans
            .get_mut(&id.get())
            .ok_or(StorageError::ScanNotFound(id))?;
        if scan.status != ScanStatus::Paused {
            return Ok(None);
        }
        let restored = scan.previous_status.unwrap_or(ScanStatus::Scanning);
        scan.status = restored;
        scan.previous_status = None;
        scan.paused_at_ms = None;
        Ok(Some(restored))
    }

    async fn set_scan_phase(&self, id: ScanId, phase: ScanPhase) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        let scan = inner
            .scans
            .get_mut(&id.get())
            .ok_or(StorageError::ScanNotFound(id))?;
        scan.phase = phase;
        Ok(())
    }

    async fn set_scan_checkpoint(
        &self,
        id: ScanId,
        blob: Option<Vec<u8>>,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        let scan = inner
            .scans
            .get_mut(&id.get())
            .ok_or(StorageError::ScanNotFound(id))?;
        scan.checkpoint = blob;
        Ok(())
    }

    async fn adjust_scan_counters(
        &self,
        id: ScanId,
        delta: CounterDelta,
    ) -> Result<(), StorageError> {
        if delta.is_zero() {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        let scan = inner
            .scans
            .get_mut(&id.get())
            .ok_or(StorageError::ScanNotFound(id))?;
        scan.counters.apply(delta);
        Ok(())
    }

    async fn recompute_scan_counters(&self, id: ScanId) -> Result<JobCounters, StorageError> {
        let mut inner = self.inner.lock();
        Self::recompute_locked(&mut inner, id)
    }

    async fn bump_scan_failures(&self, id: ScanId, now_ms: u64) -> Result<u32, StorageError> {
        let mut inner = self.inner.lock();
        let scan = inner
            .scans
            .get_mut(&id.get())
            .ok_or(StorageError::ScanNotFound(id))?;
        scan.consecutive_failures += 1;
        scan.last_failure_at_ms = Some(now_ms);
        Ok(scan.consecutive_failures)
    }

    async fn clear_scan_failures(&self, id: ScanId) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        let scan = inner
            .scans
            .get_mut(&id.get())
            .ok_or(StorageError::ScanNotFound(id))?;
        scan.consecutive_failures = 0;
        scan.throttled_until_ms = None;
        Ok(())
    }

    async fn set_scan_throttle(
        &self,
        id: ScanId,
        until_ms: Option<u64>,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        let scan = inner
            .scans
            .get_mut(&id.get())
            .ok_or(StorageError::ScanNotFound(id))?;
        scan.throttled_until_ms = until_ms;
        Ok(())
    }

    async fn scan_stats(&self, id: ScanId) -> Result<ScanStats, StorageError> {
        let inner = self.inner.lock();
        if !inner.scans.contains_key(&id.get()) {
            return Err(StorageError::ScanNotFound(id));
        }
        let mut stats = ScanStats::default();
        for job in inner.jobs.values().filter(|j| j.scan_id == id) {
            *stats.jobs_by_status.entry(job.status).or_default() += 1;
            *stats.jobs_by_type.entry(job.job_type.clone()).or_default() += 1;
            stats.total_issues += u64::from(job.issues_found);
        }
        Ok(stats)
    }

    async fn insert_job(&self, new: NewJob, now_ms: u64) -> Result<JobId, StorageError> {
        let mut inner = self.inner.lock();
        if !inner.scans.contains_key(&new.scan_id.get()) {
            return Err(StorageError::ScanNotFound(new.scan_id));
        }
        inner.next_job_id += 1;
        let id = JobId::new(inner.next_job_id);
        let mut job = ScanJob::from_new(new, now_ms);
        job.id = id;
        inner.jobs.insert(id.get(), job);
        Ok(id)
    }

    async fn get_job(&self, id: JobId) -> Result<ScanJob, StorageError> {
        self.inner
            .lock()
            .jobs
            .get(&id.get())
            .cloned()
            .ok_or(StorageError::JobNotFound(id))
    }

    async fn claim_jobs(
        &self,
        worker: &NodeId,
        job_types: &[String],
        limit: usize,
        now_ms: u64,
    ) -> Result<Vec<ScanJob>, StorageError> {
        if job_types.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let mut inner = self.inner.lock();

        // Scans whose jobs are claimable right now, with their remaining
        // concurrency headroom (None = unbounded).
        let mut headroom: HashMap<i64, Option<i64>> = HashMap::new();
        for scan in inner.scans.values() {
            if !scan.status.is_active() || scan.is_throttled(now_ms) {
                continue;
            }
            let room = scan
                .options
                .max_concurrent_jobs
                .map(|m| i64::from(m) - scan.counters.running);
            if room.is_some_and(|r| r <= 0) {
                continue;
            }
            headroom.insert(scan.id.get(), room);
        }

        // BTreeMap iteration is ascending by id; a stable sort on descending
        // priority then yields the (priority DESC, id ASC) claim order.
        let mut candidates: Vec<(i32, i64)> = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .filter(|j| j.throttled_until_ms.is_none_or(|t| t <= now_ms))
            .filter(|j| job_types.contains(&j.job_type))
            .filter(|j| headroom.contains_key(&j.scan_id.get()))
            .map(|j| (j.priority, j.id.get()))
            .collect();
        candidates.sort_by_key(|(priority, _)| std::cmp::Reverse(*priority));

        let mut claimed = Vec::new();
        for (_, job_id) in candidates {
            if claimed.len() >= limit {
                break;
            }
            let Some(job) = inner.jobs.get_mut(&job_id) else {
                continue;
            };
            let scan_key = job.scan_id.get();
            let Some(room) = headroom.get_mut(&scan_key) else {
                continue;
            };
            if room.is_some_and(|r| r <= 0) {
                continue;
            }
            job.status = JobStatus::Claimed;
            job.worker_id = Some(worker.clone());
            job.claimed_at_ms = Some(now_ms);
            job.throttled_until_ms = None;
            claimed.push(job.clone());
            if let Some(r) = room {
                *r -= 1;
            }
        }
        if !claimed.is_empty() {
            tracing::trace!(worker = %worker, count = claimed.len(), "claimed jobs");
        }
        Ok(claimed)
    }

    async fn start_job(
        &self,
        id: JobId,
        worker: &NodeId,
        now_ms: u64,
    ) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock();
        let job = inner
            .jobs
            .get_mut(&id.get())
            .ok_or(StorageError::JobNotFound(id))?;
        if job.status != JobStatus::Claimed || job.worker_id.as_ref() != Some(worker) {
            return Ok(false);
        }
        job.status = JobStatus::Running;
        job.started_at_ms = Some(now_ms);
        Ok(true)
    }

    async fn complete_job(
        &self,
        id: JobId,
        status: JobStatus,
        completion: JobCompletion,
        now_ms: u64,
    ) -> Result<Option<CompletedJob>, StorageError> {
        if !status.is_terminal() {
            return Err(StorageError::Conflict(format!(
                "complete_job target must be terminal, got {status}"
            )));
        }
        let mut inner = self.inner.lock();
        if inner.fail_completes > 0 {
            inner.fail_completes -= 1;
            return Err(StorageError::Unavailable("injected failure".to_string()));
        }
        let job = inner
            .jobs
            .get_mut(&id.get())
            .ok_or(StorageError::JobNotFound(id))?;
        if !job.status.is_held() {
            return Ok(None);
        }
        let previous_status = job.status;
        job.status = status;
        job.completed_at_ms = Some(now_ms);
        job.error_type = completion.error_type;
        job.error_message = completion.error_message;
        job.http_status = completion.http_status;
        job.issues_found = completion.issues_found;
        job.worker_id = None;
        Ok(Some(CompletedJob {
            job: job.clone(),
            previous_status,
        }))
    }

    async fn requeue_job(
        &self,
        id: JobId,
        worker: &NodeId,
        throttled_until_ms: Option<u64>,
        _now_ms: u64,
    ) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock();
        let job = inner
            .jobs
            .get_mut(&id.get())
            .ok_or(StorageError::JobNotFound(id))?;
        if !job.status.is_held() || job.worker_id.as_ref() != Some(worker) {
            return Ok(false);
        }
        job.status = JobStatus::Pending;
        job.worker_id = None;
        job.claimed_at_ms = None;
        job.started_at_ms = None;
        job.attempts += 1;
        job.throttled_until_ms = throttled_until_ms;
        Ok(true)
    }

    async fn set_job_checkpoint(
        &self,
        id: JobId,
        blob: Option<Vec<u8>>,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        let job = inner
            .jobs
            .get_mut(&id.get())
            .ok_or(StorageError::JobNotFound(id))?;
        job.checkpoint = blob;
        Ok(())
    }

    async fn reset_stale_jobs(
        &self,
        workers: &[NodeId],
        now_ms: u64,
    ) -> Result<Vec<(JobId, ScanId)>, StorageError> {
        let mut inner = self.inner.lock();
        let mut affected = Vec::new();
        for job in inner.jobs.values_mut() {
            if !job.status.is_held() {
                continue;
            }
            let held_by_stale = job
                .worker_id
                .as_ref()
                .is_some_and(|w| workers.contains(w));
            if !held_by_stale {
                continue;
            }
            job.attempts += 1;
            if job.attempts >= job.max_attempts {
                Self::fail_job_locked(
                    job,
                    error_kind::MAX_ATTEMPTS_EXCEEDED,
                    format!("worker lost after {} attempts", job.attempts),
                    now_ms,
                );
            } else {
                job.status = JobStatus::Pending;
                job.worker_id = None;
                job.claimed_at_ms = None;
                job.started_at_ms = None;
                job.error_type = Some(error_kind::WORKER_LOST.to_string());
            }
            affected.push((job.id, job.scan_id));
        }
        Ok(affected)
    }

    async fn reset_jobs_with_worker_prefix(
        &self,
        prefix: &str,
        exclude: &NodeId,
        now_ms: u64,
    ) -> Result<Vec<(JobId, ScanId)>, StorageError> {
        let holders: Vec<NodeId> = {
            let inner = self.inner.lock();
            let mut ids: Vec<NodeId> = inner
                .jobs
                .values()
                .filter(|j| j.status.is_held())
                .filter_map(|j| j.worker_id.clone())
                .filter(|w| w.as_str().starts_with(prefix) && w != exclude)
                .collect();
            ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
            ids.dedup();
            ids
        };
        if holders.is_empty() {
            return Ok(Vec::new());
        }
        self.reset_stale_jobs(&holders, now_ms).await
    }

    async fn cancel_pending_jobs(
        &self,
        scan_id: ScanId,
        now_ms: u64,
    ) -> Result<u64, StorageError> {
        let mut inner = self.inner.lock();
        let mut cancelled = 0;
        for job in inner.jobs.values_mut() {
            if job.scan_id == scan_id && job.status == JobStatus::Pending {
                job.status = JobStatus::Cancelled;
                job.completed_at_ms = Some(now_ms);
                job.error_type = Some(error_kind::CANCELLED.to_string());
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    async fn list_jobs(
        &self,
        scan_id: ScanId,
        filter: &JobFilter,
        page: Page,
    ) -> Result<Vec<ScanJob>, StorageError> {
        let inner = self.inner.lock();
        Ok(inner
            .jobs
            .values()
            .filter(|j| j.scan_id == scan_id)
            .filter(|j| filter.statuses.is_empty() || filter.statuses.contains(&j.status))
            .filter(|j| filter.job_types.is_empty() || filter.job_types.contains(&j.job_type))
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect())
    }

    async fn count_jobs(
        &self,
        scan_id: ScanId,
        statuses: &[JobStatus],
        job_types: &[String],
    ) -> Result<u64, StorageError> {
        let inner = self.inner.lock();
        Ok(inner
            .jobs
            .values()
            .filter(|j| j.scan_id == scan_id)
            .filter(|j| statuses.is_empty() || statuses.contains(&j.status))
            .filter(|j| job_types.is_empty() || job_types.contains(&j.job_type))
            .count() as u64)
    }

    async fn register_node(&self, node: WorkerNode) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        inner.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    async fn get_node(&self, id: &NodeId) -> Result<WorkerNode, StorageError> {
        self.inner
            .lock()
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NodeNotFound(id.to_string()))
    }

    async fn list_nodes(&self) -> Result<Vec<WorkerNode>, StorageError> {
        let mut nodes: Vec<WorkerNode> = self.inner.lock().nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(nodes)
    }

    async fn heartbeat_node(
        &self,
        id: &NodeId,
        counters: NodeCounters,
        now_ms: u64,
    ) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock();
        let Some(node) = inner.nodes.get_mut(id) else {
            return Ok(false);
        };
        if matches!(node.status, NodeStatus::Stopped) {
            return Ok(false);
        }
        node.status = NodeStatus::Running;
        node.last_seen_at_ms = now_ms;
        node.jobs_claimed = counters.jobs_claimed;
        node.jobs_completed = counters.jobs_completed;
        node.jobs_failed = counters.jobs_failed;
        Ok(true)
    }

    async fn set_node_status(
        &self,
        id: &NodeId,
        status: NodeStatus,
        now_ms: u64,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        let node = inner
            .nodes
            .get_mut(id)
            .ok_or_else(|| StorageError::NodeNotFound(id.to_string()))?;
        node.status = status;
        node.last_seen_at_ms = now_ms;
        Ok(())
    }

    async fn stale_nodes(
        &self,
        threshold_ms: u64,
        now_ms: u64,
    ) -> Result<Vec<WorkerNode>, StorageError> {
        let inner = self.inner.lock();
        Ok(inner
            .nodes
            .values()
            .filter(|n| n.is_stale(threshold_ms, now_ms))
            .cloned()
            .collect())
    }

    async fn mark_nodes_stopped(
        &self,
        ids: &[NodeId],
        now_ms: u64,
    ) -> Result<Vec<NodeId>, StorageError> {
        let mut inner = self.inner.lock();
        let mut transitioned = Vec::new();
        for id in ids {
            if let Some(node) = inner.nodes.get_mut(id) {
                if node.status != NodeStatus::Stopped {
                    node.status = NodeStatus::Stopped;
                    node.last_seen_at_ms = now_ms;
                    transitioned.push(id.clone());
                }
            }
        }
        Ok(transitioned)
    }

    async fn try_advisory_lock(&self, key: i64, owner: &str) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock();
        match inner.locks.get(&key) {
            Some(holder) if holder != owner => Ok(false),
            _ => {
                inner.locks.insert(key, owner.to_string());
                Ok(true)
            }
        }
    }

    async fn release_advisory_lock(&self, key: i64, owner: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        if inner.locks.get(&key).is_some_and(|h| h == owner) {
            inner.locks.remove(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
