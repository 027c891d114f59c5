// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Phase orchestrator: advances each active scan through its phase
//! progression, seeding jobs as phases open and completing or failing the
//! scan at the end.
//!
//! One instance runs per cluster at a time, elected per tick through an
//! advisory lock. Everything inside a tick is idempotent (conditional
//! transitions no-op when another node got there first), so a leader dying
//! mid-tick just hands the work to the next election.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strix_core::{
    Clock, Event, EventSink, JobStatus, Scan, ScanId, ScanPhase, ScanStatus,
};
use strix_storage::{lock, Database};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::handler::Services;
use crate::job_store::JobStore;
use crate::registry::Registry;
use crate::scan_store::ScanStore;
use crate::EngineError;

/// Orchestrator-owned resume state, persisted in the scan checkpoint blob.
#[derive(Debug, Serialize, Deserialize)]
struct PhaseCheckpoint {
    phase_started_at_ms: u64,
}

pub struct PhaseOrchestrator<C: Clock> {
    db: Arc<dyn Database>,
    scans: Arc<ScanStore<C>>,
    jobs: Arc<JobStore<C>>,
    registry: Arc<Registry>,
    services: Arc<Services>,
    sink: Arc<dyn EventSink>,
    clock: C,
    config: OrchestratorConfig,
    /// Advisory lock owner (this node's id).
    owner: String,
}

impl<C: Clock> PhaseOrchestrator<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<dyn Database>,
        scans: Arc<ScanStore<C>>,
        jobs: Arc<JobStore<C>>,
        registry: Arc<Registry>,
        services: Arc<Services>,
        sink: Arc<dyn EventSink>,
        clock: C,
        config: OrchestratorConfig,
        owner: String,
    ) -> Self {
        Self {
            db,
            scans,
            jobs,
            registry,
            services,
            sink,
            clock,
            config,
            owner,
        }
    }

    /// Kick a newly created scan into its crawl phase.
    pub async fn start_scan(&self, id: ScanId) -> Result<(), EngineError> {
        self.scans.set_status(id, ScanStatus::Crawling).await?;
        let scan = self.scans.get(id).await?;
        self.enter_phase(&scan, ScanPhase::Crawling).await
    }

    /// Restart the phase-timeout window after a resume. Time spent paused
    /// must not count against the phase, so the checkpoint is re-stamped
    /// and the current phase gets a fresh window.
    pub async fn phase_resumed(&self, id: ScanId) -> Result<(), EngineError> {
        self.save_checkpoint(id).await
    }

    /// One pass over every active scan.
    pub async fn tick(&self) -> Result<(), EngineError> {
        for scan in self.scans.list_active().await? {
            if let Err(e) = self.advance_scan(&scan).await {
                warn!(scan_id = %scan.id, error = %e, "phase advance failed");
            }
        }
        Ok(())
    }

    /// Run as the cluster singleton: acquire the advisory lock per tick,
    /// skip the tick when another node leads.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.tick) => {}
                _ = shutdown.changed() => return,
            }
            let leading = match self.db.try_advisory_lock(lock::ORCHESTRATOR, &self.owner).await {
                Ok(leading) => leading,
                Err(e) => {
                    warn!(error = %e, "orchestrator lock acquisition failed");
                    continue;
                }
            };
            if !leading {
                continue;
            }
            if let Err(e) = self.tick().await {
                warn!(error = %e, "orchestrator tick failed");
            }
            if let Err(e) = self
                .db
                .release_advisory_lock(lock::ORCHESTRATOR, &self.owner)
                .await
            {
                warn!(error = %e, "orchestrator lock release failed");
            }
        }
    }

    /// Advance one scan: fail it on phase timeout, otherwise move to the
    /// next enabled phase once the current one drains.
    async fn advance_scan(&self, scan: &Scan) -> Result<(), EngineError> {
        // Repair path: an interrupted start left the status active but the
        // phase untouched.
        if scan.phase == ScanPhase::Pending {
            return self.enter_phase(scan, ScanPhase::Crawling).await;
        }
        if scan.phase == ScanPhase::Completed {
            self.scans.mark_completed(scan.id).await?;
            return Ok(());
        }

        let now_ms = self.clock.epoch_ms();
        let phase_started = self
            .phase_started_at(scan)
            .unwrap_or_else(|| scan.started_at_ms.unwrap_or(scan.created_at_ms));
        if now_ms.saturating_sub(phase_started) > self.config.phase_timeout.as_millis() as u64 {
            warn!(
                scan_id = %scan.id,
                phase = %scan.phase,
                "phase timed out; failing scan"
            );
            self.scans.mark_failed(scan.id).await?;
            return Ok(());
        }

        if !self.phase_drained(scan).await? {
            return Ok(());
        }

        let Some(next) = self.next_enabled_phase(scan) else {
            return Ok(());
        };

        // Leaving the crawl phase shifts the scan into scanning.
        if scan.status == ScanStatus::Crawling && next != ScanPhase::Crawling {
            self.scans.set_status(scan.id, ScanStatus::Scanning).await?;
        }
        let scan = self.scans.get(scan.id).await?;
        self.enter_phase(&scan, next).await
    }

    /// True when no job of the current phase's types is pending, claimed,
    /// or running. A phase with no seeder has no job types and is vacuously
    /// drained.
    async fn phase_drained(&self, scan: &Scan) -> Result<bool, EngineError> {
        let job_types = self.registry.phase_job_types(scan.phase);
        if job_types.is_empty() {
            return Ok(true);
        }
        let live = self
            .db
            .count_jobs(
                scan.id,
                &[JobStatus::Pending, JobStatus::Claimed, JobStatus::Running],
                &job_types,
            )
            .await?;
        Ok(live == 0)
    }

    /// The next phase that is enabled for this scan and this deployment.
    /// Disabled or seeder-less phases are skipped; the terminal `Completed`
    /// pseudo-phase is always reachable.
    fn next_enabled_phase(&self, scan: &Scan) -> Option<ScanPhase> {
        let mut phase = scan.phase;
        while let Some(next) = phase.next() {
            if next == ScanPhase::Completed {
                return Some(next);
            }
            if self.phase_enabled(scan, next) && self.registry.seeder(next).is_some() {
                return Some(next);
            }
            phase = next;
        }
        None
    }

    fn phase_enabled(&self, scan: &Scan, phase: ScanPhase) -> bool {
        let deployment = match phase {
            ScanPhase::Fingerprinting => self.config.enable_fingerprint,
            ScanPhase::Discovering => self.config.enable_discovery,
            ScanPhase::Nuclei => self.config.enable_nuclei,
            ScanPhase::WebsocketScan => self.config.enable_websocket,
            _ => true,
        };
        deployment && scan.options.phase_enabled(phase)
    }

    /// Move the scan into `phase`, stamping the checkpoint and seeding its
    /// jobs. A seeding error fails the scan.
    async fn enter_phase(&self, scan: &Scan, phase: ScanPhase) -> Result<(), EngineError> {
        let from = scan.phase;
        self.db.set_scan_phase(scan.id, phase).await?;
        self.save_checkpoint(scan.id).await?;
        info!(scan_id = %scan.id, %from, to = %phase, "phase advanced");
        self.sink.emit(&Event::PhaseAdvanced {
            scan_id: scan.id,
            from,
            to: phase,
        });

        if phase == ScanPhase::Completed {
            self.scans.mark_completed(scan.id).await?;
            return Ok(());
        }

        let Some(seeder) = self.registry.seeder(phase) else {
            debug!(scan_id = %scan.id, %phase, "no seeder; phase will drain empty");
            return Ok(());
        };
        match seeder.seed(scan, &self.services).await {
            Ok(batch) => {
                let count = batch.len();
                for new in batch {
                    self.jobs.enqueue(new).await?;
                }
                debug!(scan_id = %scan.id, %phase, count, "phase seeded");
                Ok(())
            }
            Err(e) => {
                warn!(scan_id = %scan.id, %phase, error = %e, "seeding failed; failing scan");
                self.scans.mark_failed(scan.id).await?;
                Err(EngineError::SeedFailed {
                    phase: phase.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    fn phase_started_at(&self, scan: &Scan) -> Option<u64> {
        scan.checkpoint
            .as_deref()
            .and_then(|blob| serde_json::from_slice::<PhaseCheckpoint>(blob).ok())
            .map(|c| c.phase_started_at_ms)
    }

    async fn save_checkpoint(&self, id: ScanId) -> Result<(), EngineError> {
        let checkpoint = PhaseCheckpoint {
            phase_started_at_ms: self.clock.epoch_ms(),
        };
        let blob = serde_json::to_vec(&checkpoint).map_err(strix_storage::StorageError::from)?;
        self.db.set_scan_checkpoint(id, Some(blob)).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
