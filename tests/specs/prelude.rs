//! Shared harness for the engine specs.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strix_core::{
    HandlerOutcome, JobStatus, NewJob, NullSink, Scan, ScanId, ScanJob, ScanOptions, ScanPhase,
    ScanStatus, SystemClock,
};
use strix_engine::{
    Config, EngineError, JobContext, JobHandler, ManagerDeps, PhaseSeeder, Registry, RegistryBuilder,
    ScanManager, Services,
};
use strix_storage::{JobFilter, MemoryDatabase, Page};

// Re-exported so every spec gets the storage trait with the prelude glob.
pub use strix_storage::Database;

/// Loop intervals tightened so a full scan lifecycle fits in test time.
pub fn fast_config(hostname: &str, workers: u32) -> Config {
    let mut config = Config::default();
    config.workers.count_per_node = workers;
    config.dispatcher.tick = Duration::from_millis(10);
    config.orchestrator.tick = Duration::from_millis(20);
    config.node.heartbeat_interval = Duration::from_millis(50);
    config.node.stale_threshold = Duration::from_millis(500);
    config.reconciler.interval = Duration::from_millis(200);
    config.node.hostname = Some(hostname.to_string());
    config
}

pub fn node(
    db: &Arc<MemoryDatabase>,
    registry: Arc<Registry>,
    config: Config,
) -> ScanManager<SystemClock> {
    ScanManager::new(
        ManagerDeps {
            db: db.clone() as Arc<dyn Database>,
            registry,
            services: Arc::new(Services::noop()),
            sink: Arc::new(NullSink),
            config,
        },
        SystemClock,
    )
}

pub fn options(urls: &[&str]) -> ScanOptions {
    ScanOptions {
        start_urls: urls.iter().map(|u| u.to_string()).collect(),
        ..ScanOptions::default()
    }
}

// ── handlers ───────────────────────────────────────────────────────────

/// Succeeds and counts its executions.
pub struct CountingOk {
    pub executions: Arc<AtomicU32>,
    pub issues: u32,
}

#[async_trait]
impl JobHandler for CountingOk {
    async fn run(&self, _ctx: &JobContext, _job: &ScanJob, _services: &Services) -> HandlerOutcome {
        self.executions.fetch_add(1, Ordering::SeqCst);
        HandlerOutcome::ok(self.issues)
    }
}

/// Sleeps, then succeeds. For keeping jobs in flight.
pub struct SlowOk {
    pub delay: Duration,
}

#[async_trait]
impl JobHandler for SlowOk {
    async fn run(&self, _ctx: &JobContext, _job: &ScanJob, _services: &Services) -> HandlerOutcome {
        tokio::time::sleep(self.delay).await;
        HandlerOutcome::ok(0)
    }
}

/// Always fails fatally.
pub struct AlwaysFail;

#[async_trait]
impl JobHandler for AlwaysFail {
    async fn run(&self, _ctx: &JobContext, _job: &ScanJob, _services: &Services) -> HandlerOutcome {
        HandlerOutcome::fatal("probe_error", "target said no")
    }
}

/// Always asks for a retry, counting executions.
pub struct AlwaysRetry {
    pub executions: Arc<AtomicU32>,
}

#[async_trait]
impl JobHandler for AlwaysRetry {
    async fn run(&self, _ctx: &JobContext, _job: &ScanJob, _services: &Services) -> HandlerOutcome {
        self.executions.fetch_add(1, Ordering::SeqCst);
        HandlerOutcome::retryable("net_timeout", "connection reset")
    }
}

// ── seeders ────────────────────────────────────────────────────────────

/// One job per start URL.
pub struct PerUrlSeeder {
    pub job_type: &'static str,
}

#[async_trait]
impl PhaseSeeder for PerUrlSeeder {
    fn job_types(&self) -> Vec<String> {
        vec![self.job_type.to_string()]
    }

    async fn seed(&self, scan: &Scan, _services: &Services) -> Result<Vec<NewJob>, EngineError> {
        Ok(scan
            .options
            .start_urls
            .iter()
            .map(|url| NewJob::new(scan.id, self.job_type).url(url.clone()))
            .collect())
    }
}

/// A fixed number of jobs of one type.
pub struct BatchSeeder {
    pub job_type: &'static str,
    pub count: usize,
}

#[async_trait]
impl PhaseSeeder for BatchSeeder {
    fn job_types(&self) -> Vec<String> {
        vec![self.job_type.to_string()]
    }

    async fn seed(&self, scan: &Scan, _services: &Services) -> Result<Vec<NewJob>, EngineError> {
        Ok((0..self.count)
            .map(|i| NewJob::new(scan.id, self.job_type).url(format!("https://t.test/{i}")))
            .collect())
    }
}

/// Declares the job types of a phase without seeding anything; for specs
/// that enqueue rows themselves.
pub struct DeclaredSeeder {
    pub job_type: &'static str,
}

#[async_trait]
impl PhaseSeeder for DeclaredSeeder {
    fn job_types(&self) -> Vec<String> {
        vec![self.job_type.to_string()]
    }

    async fn seed(&self, _scan: &Scan, _services: &Services) -> Result<Vec<NewJob>, EngineError> {
        Ok(Vec::new())
    }
}

/// Crawl-only registry with the given handler behind `job_type`.
pub fn crawl_registry(job_type: &'static str, handler: Arc<dyn JobHandler>) -> Arc<Registry> {
    Arc::new(
        Registry::builder()
            .handler(job_type, handler)
            .seeder(ScanPhase::Crawling, Arc::new(PerUrlSeeder { job_type }))
            .build(),
    )
}

pub fn builder() -> RegistryBuilder {
    Registry::builder()
}

// ── assertions ─────────────────────────────────────────────────────────

/// Poll until the scan reaches `status` or the deadline passes.
pub async fn wait_status(
    db: &Arc<MemoryDatabase>,
    id: ScanId,
    status: ScanStatus,
    within: Duration,
) -> Scan {
    let deadline = std::time::Instant::now() + within;
    loop {
        let scan = db.get_scan(id).await.unwrap();
        if scan.status == status {
            return scan;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "scan {} stuck at {} (phase {}, counters {:?})",
            id,
            scan.status,
            scan.phase,
            scan.counters
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// The cross-cutting invariants every finished scenario must satisfy.
pub async fn assert_invariants(db: &Arc<MemoryDatabase>, id: ScanId) {
    let scan = db.get_scan(id).await.unwrap();
    let jobs = db
        .list_jobs(id, &JobFilter::default(), Page::all())
        .await
        .unwrap();

    let cached = scan.counters;
    let recomputed = db.recompute_scan_counters(id).await.unwrap();
    assert!(recomputed.is_consistent(), "counter sum invariant");
    assert_eq!(recomputed.total, jobs.len() as i64);
    assert_eq!(cached, recomputed, "cached counters match the rows");

    for job in &jobs {
        if job.status.is_terminal() {
            assert!(
                job.completed_at_ms.is_some(),
                "terminal job {} missing completed_at",
                job.id
            );
        }
        if job.status == JobStatus::Claimed {
            assert!(job.worker_id.is_some(), "claimed job {} has no worker", job.id);
            assert!(job.claimed_at_ms.is_some());
        }
        assert!(job.attempts <= job.max_attempts);
    }

    if scan.status.is_terminal() {
        for job in &jobs {
            assert!(
                job.status.is_terminal(),
                "terminal scan {} still owns live job {} ({})",
                id,
                job.id,
                job.status
            );
        }
        assert!(scan.completed_at_ms.is_some());
    }
}
