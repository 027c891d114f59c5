// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The handler contract: what audit subsystems implement.
//!
//! The engine never inspects payloads or outcomes beyond the
//! [`HandlerOutcome`] variants; everything a check needs at runtime arrives
//! through [`JobContext`] and [`Services`].

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strix_core::{HandlerOutcome, JobId, NewJob, Scan, ScanId, ScanJob, ScanStatus};
use strix_storage::Database;

use crate::EngineError;

/// Per-invocation context: deadline and cancellation observation.
///
/// Handlers must treat every await point as a potential cancellation
/// observation point; `cancelled()` reads the scan status through the
/// database, so an in-flight job notices a scan cancel on its next check.
pub struct JobContext {
    job_id: JobId,
    scan_id: ScanId,
    deadline: Instant,
    db: Arc<dyn Database>,
}

impl JobContext {
    pub fn new(job_id: JobId, scan_id: ScanId, deadline: Instant, db: Arc<dyn Database>) -> Self {
        Self {
            job_id,
            scan_id,
            deadline,
            db,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the job deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether the owning scan has been cancelled. Errors read as "not
    /// cancelled" so a flaky read never aborts useful work.
    pub async fn cancelled(&self) -> bool {
        match self.db.get_scan(self.scan_id).await {
            Ok(scan) => scan.status == ScanStatus::Cancelled,
            Err(_) => false,
        }
    }

    /// Persist opaque resume state for this job.
    pub async fn checkpoint(&self, blob: Vec<u8>) -> Result<(), EngineError> {
        self.db.set_job_checkpoint(self.job_id, Some(blob)).await?;
        Ok(())
    }
}

/// Runs one job type. Implementations must be re-entrant on job id: a
/// retried or resurrected job may run again from its checkpoint.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, ctx: &JobContext, job: &ScanJob, services: &Services) -> HandlerOutcome;

    /// Per-type deadline override; the engine default applies when `None`.
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

/// Seeds the job batch for one phase. Registered alongside handlers; the
/// orchestrator enqueues whatever is returned.
#[async_trait]
pub trait PhaseSeeder: Send + Sync {
    /// Job types this phase executes. Drained detection counts these.
    fn job_types(&self) -> Vec<String>;

    async fn seed(&self, scan: &Scan, services: &Services) -> Result<Vec<NewJob>, EngineError>;
}

/// Issues HTTP requests on behalf of checks. The real implementation lives
/// in the audit subsystems.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn fetch(
        &self,
        method: &str,
        url: &str,
        body: &[u8],
    ) -> Result<(u16, Vec<u8>), String>;
}

/// Opaque page token handed out by the browser pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageHandle {
    pub id: String,
}

/// Headless browser page pool.
#[async_trait]
pub trait BrowserPool: Send + Sync {
    async fn acquire_page(&self) -> Result<PageHandle, String>;
    async fn release_page(&self, page: PageHandle);
}

/// Out-of-band interaction sink: hands out callback URLs keyed by a
/// correlation id and reports hits.
pub trait InteractionsManager: Send + Sync {
    fn callback_url(&self, correlation_id: &str) -> String;
}

/// Produces payload variants for a job type from a seed value.
pub trait PayloadGenerators: Send + Sync {
    fn variants(&self, job_type: &str, seed: &[u8]) -> Vec<Vec<u8>>;
}

/// Collaborator handles passed to every handler and seeder.
#[derive(Clone)]
pub struct Services {
    pub http_client: Arc<dyn HttpClient>,
    pub browser_pool: Arc<dyn BrowserPool>,
    pub interactions: Arc<dyn InteractionsManager>,
    pub payloads: Arc<dyn PayloadGenerators>,
}

impl Services {
    /// Inert collaborators, for tests and deployments without the
    /// corresponding subsystems.
    pub fn noop() -> Self {
        Self {
            http_client: Arc::new(NoopHttpClient),
            browser_pool: Arc::new(NoopBrowserPool),
            interactions: Arc::new(NoopInteractions),
            payloads: Arc::new(NoopPayloads),
        }
    }
}

struct NoopHttpClient;

#[async_trait]
impl HttpClient for NoopHttpClient {
    async fn fetch(
        &self,
        _method: &str,
        _url: &str,
        _body: &[u8],
    ) -> Result<(u16, Vec<u8>), String> {
        Err("no http client configured".to_string())
    }
}

struct NoopBrowserPool;

#[async_trait]
impl BrowserPool for NoopBrowserPool {
    async fn acquire_page(&self) -> Result<PageHandle, String> {
        Err("no browser pool configured".to_string())
    }

    async fn release_page(&self, _page: PageHandle) {}
}

struct NoopInteractions;

impl InteractionsManager for NoopInteractions {
    fn callback_url(&self, correlation_id: &str) -> String {
        format!("https://interactions.invalid/{}", correlation_id)
    }
}

struct NoopPayloads;

impl PayloadGenerators for NoopPayloads {
    fn variants(&self, _job_type: &str, _seed: &[u8]) -> Vec<Vec<u8>> {
        Vec::new()
    }
}
