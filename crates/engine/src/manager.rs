// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scan manager: the composition root for one node.
//!
//! Owns the lifetimes of the dispatcher, worker pool, orchestrator, stale
//! reaper, and counter reconciler, and exposes the command interface the
//! outer surfaces (REST, CLI) consume.

use std::sync::Arc;

use parking_lot::Mutex;
use strix_core::{
    Clock, EventSink, NodeId, Scan, ScanId, ScanJob, ScanOptions, ScanStatus,
};
use strix_storage::{Database, JobFilter, Page, ScanFilter, ScanStats};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::counters::Reconciler;
use crate::dispatcher::Dispatcher;
use crate::handler::Services;
use crate::job_store::JobStore;
use crate::node_registry::NodeRegistry;
use crate::orchestrator::PhaseOrchestrator;
use crate::reaper::StaleReaper;
use crate::registry::Registry;
use crate::scan_store::ScanStore;
use crate::worker_pool::{PoolCounters, WorkerPool};
use crate::EngineError;

/// Everything a node needs injected at boot. Handlers and seeders are
/// registered before construction; nothing is registered afterwards.
pub struct ManagerDeps {
    pub db: Arc<dyn Database>,
    pub registry: Arc<Registry>,
    pub services: Arc<Services>,
    pub sink: Arc<dyn EventSink>,
    pub config: Config,
}

struct RunState {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct ScanManager<C: Clock> {
    config: Config,
    db: Arc<dyn Database>,
    clock: C,
    hostname: String,
    scans: Arc<ScanStore<C>>,
    jobs: Arc<JobStore<C>>,
    nodes: Arc<NodeRegistry<C>>,
    pool: Arc<WorkerPool<C>>,
    dispatcher: Arc<Dispatcher<C>>,
    orchestrator: Arc<PhaseOrchestrator<C>>,
    reaper: Arc<StaleReaper<C>>,
    state: Mutex<Option<RunState>>,
}

impl<C: Clock> ScanManager<C> {
    pub fn new(deps: ManagerDeps, clock: C) -> Self {
        let ManagerDeps {
            db,
            registry,
            services,
            sink,
            config,
        } = deps;

        let counters = Arc::new(PoolCounters::default());
        let nodes = Arc::new(NodeRegistry::new(
            Arc::clone(&db),
            Arc::clone(&sink),
            clock.clone(),
            config.node.hostname.clone(),
            config.workers.count_per_node,
            config.node.heartbeat_interval,
            Arc::clone(&counters),
        ));
        let hostname = nodes.hostname().to_string();
        let jobs = Arc::new(JobStore::new(
            Arc::clone(&db),
            Arc::clone(&sink),
            clock.clone(),
            &config,
        ));
        let scans = Arc::new(ScanStore::new(
            Arc::clone(&db),
            Arc::clone(&sink),
            clock.clone(),
        ));
        let pool = Arc::new(WorkerPool::new(
            config.workers.count_per_node as usize,
            Arc::clone(&jobs),
            Arc::clone(&registry),
            Arc::clone(&services),
            counters,
            nodes.node_id().clone(),
            config.job.default_timeout,
            clock.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&jobs),
            Arc::clone(&pool),
            Arc::clone(&nodes),
            Arc::clone(&registry),
            config.dispatcher.tick,
            config.claim_batch_max(),
        ));
        let orchestrator = Arc::new(PhaseOrchestrator::new(
            Arc::clone(&db),
            Arc::clone(&scans),
            Arc::clone(&jobs),
            registry,
            services,
            Arc::clone(&sink),
            clock.clone(),
            config.orchestrator.clone(),
            nodes.node_id().to_string(),
        ));
        let reaper = Arc::new(StaleReaper::new(
            Arc::clone(&db),
            Arc::clone(&jobs),
            sink,
            clock.clone(),
            config.node.stale_threshold,
            nodes.node_id().to_string(),
        ));

        Self {
            config,
            db,
            clock,
            hostname,
            scans,
            jobs,
            nodes,
            pool,
            dispatcher,
            orchestrator,
            reaper,
            state: Mutex::new(None),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        self.nodes.node_id()
    }

    pub fn job_store(&self) -> Arc<JobStore<C>> {
        Arc::clone(&self.jobs)
    }

    pub fn scan_store(&self) -> Arc<ScanStore<C>> {
        Arc::clone(&self.scans)
    }

    /// Start the node: register, reclaim anything a prior incarnation of
    /// this host held, and spawn the background loops. Idempotent.
    pub async fn start(&self) -> Result<(), EngineError> {
        if self.state.lock().is_some() {
            return Ok(());
        }

        self.nodes.register().await?;
        self.reclaim_prior_incarnation().await?;

        let (tx, rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(Arc::clone(&self.dispatcher).run(rx.clone())),
            tokio::spawn(Arc::clone(&self.orchestrator).run(rx.clone())),
            tokio::spawn(Arc::clone(&self.reaper).run(rx.clone())),
            tokio::spawn(
                Reconciler::new(Arc::clone(&self.db), self.config.reconciler.interval).run(rx),
            ),
        ];
        *self.state.lock() = Some(RunState { shutdown: tx, tasks });
        info!(node_id = %self.nodes.node_id(), "scan manager started");
        Ok(())
    }

    /// Stop the node: halt the loops, let in-flight jobs finish, deregister.
    /// Idempotent.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let Some(state) = self.state.lock().take() else {
            return Ok(());
        };
        let _ = state.shutdown.send(true);
        for task in state.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "background loop join failed");
            }
        }
        self.pool.drain().await;
        self.nodes.shutdown().await?;
        info!(node_id = %self.nodes.node_id(), "scan manager stopped");
        Ok(())
    }

    /// Jobs claimed by a prior incarnation of this host are reset so they
    /// do not wait out the full stale threshold.
    async fn reclaim_prior_incarnation(&self) -> Result<(), EngineError> {
        let prefix = NodeId::host_prefix(&self.hostname);
        let affected = self
            .db
            .reset_jobs_with_worker_prefix(&prefix, self.nodes.node_id(), self.clock.epoch_ms())
            .await?;
        if affected.is_empty() {
            return Ok(());
        }
        let mut scan_ids: Vec<ScanId> = affected.iter().map(|(_, sid)| *sid).collect();
        scan_ids.sort();
        scan_ids.dedup();
        for scan_id in &scan_ids {
            if let Err(e) = self.db.recompute_scan_counters(*scan_id).await {
                warn!(scan_id = %scan_id, error = %e, "counter refresh failed");
            }
        }
        info!(
            jobs = affected.len(),
            scans = scan_ids.len(),
            "reclaimed jobs from a prior incarnation"
        );
        Ok(())
    }

    // ── command interface ──────────────────────────────────────────────

    /// Create a scan and kick it into its crawl phase.
    pub async fn create_scan(
        &self,
        workspace_id: i64,
        title: impl Into<String>,
        options: ScanOptions,
    ) -> Result<Scan, EngineError> {
        let scan = self.scans.create(workspace_id, title, options).await?;
        self.orchestrator.start_scan(scan.id).await?;
        self.scans.get(scan.id).await
    }

    pub async fn pause_scan(&self, id: ScanId) -> Result<(), EngineError> {
        self.scans.pause(id).await?;
        Ok(())
    }

    /// Resume a paused scan. The phase-timeout window restarts so the
    /// paused interval does not count as time spent stuck.
    pub async fn resume_scan(&self, id: ScanId) -> Result<ScanStatus, EngineError> {
        let restored = self.scans.resume(id).await?;
        self.orchestrator.phase_resumed(id).await?;
        Ok(restored)
    }

    pub async fn cancel_scan(&self, id: ScanId) -> Result<(), EngineError> {
        self.scans.cancel(id).await?;
        Ok(())
    }

    pub async fn delete_scan(&self, id: ScanId) -> Result<bool, EngineError> {
        self.scans.delete(id).await
    }

    pub async fn list_scans(
        &self,
        filter: &ScanFilter,
        page: Page,
    ) -> Result<Vec<Scan>, EngineError> {
        self.scans.list(filter, page).await
    }

    pub async fn get_scan(&self, id: ScanId) -> Result<(Scan, ScanStats), EngineError> {
        self.scans.get_with_stats(id).await
    }

    pub async fn list_scan_jobs(
        &self,
        id: ScanId,
        filter: &JobFilter,
        page: Page,
    ) -> Result<Vec<ScanJob>, EngineError> {
        Ok(self.db.list_jobs(id, filter, page).await?)
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
