// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The scan store: lifecycle transitions validated against the state
//! machine, plus listing and aggregate queries.

use std::sync::Arc;

use strix_core::{
    Clock, CounterDelta, Event, EventSink, Scan, ScanId, ScanOptions, ScanStatus, TransitionError,
};
use strix_storage::{Database, Page, ScanFilter, ScanStats};
use tracing::info;

use crate::EngineError;

pub struct ScanStore<C: Clock> {
    db: Arc<dyn Database>,
    sink: Arc<dyn EventSink>,
    clock: C,
}

impl<C: Clock> ScanStore<C> {
    pub fn new(db: Arc<dyn Database>, sink: Arc<dyn EventSink>, clock: C) -> Self {
        Self { db, sink, clock }
    }

    /// Create a scan in pending state.
    pub async fn create(
        &self,
        workspace_id: i64,
        title: impl Into<String>,
        options: ScanOptions,
    ) -> Result<Scan, EngineError> {
        let scan = Scan::new(workspace_id, title, options);
        let id = self.db.insert_scan(scan, self.clock.epoch_ms()).await?;
        self.sink.emit(&Event::ScanCreated {
            scan_id: id,
            workspace_id,
        });
        Ok(self.db.get_scan(id).await?)
    }

    pub async fn get(&self, id: ScanId) -> Result<Scan, EngineError> {
        Ok(self.db.get_scan(id).await?)
    }

    pub async fn get_with_stats(&self, id: ScanId) -> Result<(Scan, ScanStats), EngineError> {
        let scan = self.db.get_scan(id).await?;
        let stats = self.db.scan_stats(id).await?;
        Ok((scan, stats))
    }

    pub async fn list(&self, filter: &ScanFilter, page: Page) -> Result<Vec<Scan>, EngineError> {
        Ok(self.db.list_scans(filter, page).await?)
    }

    /// Scans whose jobs are currently being executed.
    pub async fn list_active(&self) -> Result<Vec<Scan>, EngineError> {
        Ok(self
            .db
            .list_scans_by_status(&[ScanStatus::Crawling, ScanStatus::Scanning])
            .await?)
    }

    pub async fn list_paused(&self) -> Result<Vec<Scan>, EngineError> {
        Ok(self.db.list_scans_by_status(&[ScanStatus::Paused]).await?)
    }

    /// Validated transition. Returns the refreshed scan; rejects moves the
    /// state machine forbids. A lost race (another node transitioned first)
    /// surfaces as the re-checked transition error.
    pub async fn set_status(&self, id: ScanId, to: ScanStatus) -> Result<Scan, EngineError> {
        let scan = self.db.get_scan(id).await?;
        let from = scan.status;
        if !from.can_transition(to) {
            return Err(TransitionError { from, to }.into());
        }
        let moved = self
            .db
            .set_scan_status(id, &[from], to, self.clock.epoch_ms())
            .await?;
        if !moved {
            let current = self.db.get_scan(id).await?;
            return Err(TransitionError {
                from: current.status,
                to,
            }
            .into());
        }
        info!(scan_id = %id, %from, %to, "scan status changed");
        self.sink.emit(&Event::ScanStatusChanged {
            scan_id: id,
            from,
            to,
        });
        Ok(self.db.get_scan(id).await?)
    }

    /// Pause: stops new claims; in-flight jobs run to completion.
    pub async fn pause(&self, id: ScanId) -> Result<Scan, EngineError> {
        self.set_status(id, ScanStatus::Paused).await
    }

    /// Resume: restores the status captured at pause time.
    pub async fn resume(&self, id: ScanId) -> Result<ScanStatus, EngineError> {
        let restored = self
            .db
            .restore_scan_status(id, self.clock.epoch_ms())
            .await?
            .ok_or(EngineError::NotPaused)?;
        info!(scan_id = %id, to = %restored, "scan resumed");
        self.sink.emit(&Event::ScanStatusChanged {
            scan_id: id,
            from: ScanStatus::Paused,
            to: restored,
        });
        Ok(restored)
    }

    /// Cancel: batch-cancels pending jobs; running jobs observe the flag
    /// and finish as cancelled on their own.
    pub async fn cancel(&self, id: ScanId) -> Result<Scan, EngineError> {
        let scan = self.set_status(id, ScanStatus::Cancelled).await?;
        let cancelled = self
            .db
            .cancel_pending_jobs(id, self.clock.epoch_ms())
            .await?;
        if cancelled > 0 {
            self.db
                .adjust_scan_counters(
                    id,
                    CounterDelta {
                        pending: -(cancelled as i64),
                        cancelled: cancelled as i64,
                        ..CounterDelta::default()
                    },
                )
                .await?;
            info!(scan_id = %id, cancelled, "pending jobs cancelled");
        }
        Ok(scan)
    }

    pub async fn mark_completed(&self, id: ScanId) -> Result<Scan, EngineError> {
        self.set_status(id, ScanStatus::Completed).await
    }

    /// Fail the scan (phase timeout or seeding error). Pending jobs are
    /// cancelled so a terminal scan never owns claimable rows.
    pub async fn mark_failed(&self, id: ScanId) -> Result<Scan, EngineError> {
        let scan = self.set_status(id, ScanStatus::Failed).await?;
        let cancelled = self
            .db
            .cancel_pending_jobs(id, self.clock.epoch_ms())
            .await?;
        if cancelled > 0 {
            self.db
                .adjust_scan_counters(
                    id,
                    CounterDelta {
                        pending: -(cancelled as i64),
                        cancelled: cancelled as i64,
                        ..CounterDelta::default()
                    },
                )
                .await?;
        }
        Ok(scan)
    }

    /// Delete the scan and its jobs. Active scans are cancelled first so
    /// running jobs quiesce through the cancellation flag.
    pub async fn delete(&self, id: ScanId) -> Result<bool, EngineError> {
        let scan = match self.db.get_scan(id).await {
            Ok(scan) => scan,
            Err(strix_storage::StorageError::ScanNotFound(_)) => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if !scan.status.is_terminal() {
            self.cancel(id).await?;
        }
        Ok(self.db.delete_scan(id).await?)
    }
}

#[cfg(test)]
#[path = "scan_store_tests.rs"]
mod tests;
