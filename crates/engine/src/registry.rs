// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handler and seeder registry.
//!
//! Subsystems register at startup; the built registry is immutable and
//! shared across the dispatcher, worker pool, and orchestrator.

use std::collections::HashMap;
use std::sync::Arc;
use strix_core::ScanPhase;

use crate::handler::{JobHandler, PhaseSeeder};

/// Mutable registration surface, consumed into a [`Registry`].
#[derive(Default)]
pub struct RegistryBuilder {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    seeders: HashMap<ScanPhase, Arc<dyn PhaseSeeder>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a job type. Last registration wins.
    pub fn handler(mut self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(job_type.into(), handler);
        self
    }

    /// Register the seeder for a phase.
    pub fn seeder(mut self, phase: ScanPhase, seeder: Arc<dyn PhaseSeeder>) -> Self {
        self.seeders.insert(phase, seeder);
        self
    }

    pub fn build(self) -> Registry {
        Registry {
            handlers: self.handlers,
            seeders: self.seeders,
        }
    }
}

/// Immutable job_type → handler and phase → seeder mapping.
pub struct Registry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    seeders: HashMap<ScanPhase, Arc<dyn PhaseSeeder>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn handler(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    pub fn seeder(&self, phase: ScanPhase) -> Option<Arc<dyn PhaseSeeder>> {
        self.seeders.get(&phase).cloned()
    }

    /// Job types this node can execute; the dispatcher claims only these.
    pub fn job_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Job types belonging to a phase, per its seeder. Empty when the phase
    /// has no seeder registered (the orchestrator then skips it).
    pub fn phase_job_types(&self, phase: ScanPhase) -> Vec<String> {
        self.seeders
            .get(&phase)
            .map(|s| s.job_types())
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
