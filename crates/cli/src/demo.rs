// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Built-in probe handlers for embedded runs.
//!
//! The real audit subsystems register their own handlers at boot; the CLI's
//! embedded node uses these stand-ins so an end-to-end run exercises the
//! whole engine without a target.

use async_trait::async_trait;
use std::sync::Arc;
use strix_core::{HandlerOutcome, NewJob, Scan, ScanJob, ScanPhase};
use strix_engine::{
    EngineError, JobContext, JobHandler, PhaseSeeder, Registry, Services,
};

/// The phase progression with its job types, in execution order.
pub const PHASES: &[(ScanPhase, &str)] = &[
    (ScanPhase::Crawling, "crawl"),
    (ScanPhase::Fingerprinting, "fingerprint"),
    (ScanPhase::Discovering, "discovery"),
    (ScanPhase::Nuclei, "nuclei"),
    (ScanPhase::ActiveScan, "active_scan"),
    (ScanPhase::WebsocketScan, "websocket_scan"),
];

struct ProbeHandler;

#[async_trait]
impl JobHandler for ProbeHandler {
    async fn run(&self, ctx: &JobContext, _job: &ScanJob, _services: &Services) -> HandlerOutcome {
        if ctx.cancelled().await {
            return HandlerOutcome::retryable("cancelled", "scan cancelled");
        }
        HandlerOutcome::ok(0)
    }
}

struct PerUrlSeeder {
    job_type: &'static str,
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

/// A registry covering every phase with probe handlers.
pub fn registry() -> Arc<Registry> {
    let mut builder = Registry::builder();
    for &(phase, job_type) in PHASES {
        builder = builder
            .handler(job_type, Arc::new(ProbeHandler))
            .seeder(phase, Arc::new(PerUrlSeeder { job_type }));
    }
    Arc::new(builder.build())
}
