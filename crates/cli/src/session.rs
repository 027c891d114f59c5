// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Embedded node session, optionally backed by a state snapshot file.
//!
//! With `--state FILE` the embedded database is loaded from the snapshot
//! on open and written back after mutating commands, so scan lifecycle
//! commands compose across invocations. Without it the database is
//! ephemeral and only `scan create --follow` is useful on its own.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use strix_core::{NullSink, SystemClock};
use strix_engine::{Config, ManagerDeps, ScanManager, Services};
use strix_storage::{Database, MemoryDatabase};

use crate::demo;

pub struct Session {
    pub db: Arc<MemoryDatabase>,
    pub manager: ScanManager<SystemClock>,
    state_path: Option<PathBuf>,
}

impl Session {
    pub fn open(config: Config, state_path: Option<PathBuf>) -> Result<Self> {
        let db = match &state_path {
            Some(path) if path.exists() => {
                let bytes = std::fs::read(path)?;
                MemoryDatabase::load(&bytes)?
            }
            _ => MemoryDatabase::new(),
        };
        let manager = ScanManager::new(
            ManagerDeps {
                db: db.clone() as Arc<dyn Database>,
                registry: demo::registry(),
                services: Arc::new(Services::noop()),
                sink: Arc::new(NullSink),
                config,
            },
            SystemClock,
        );
        Ok(Self {
            db,
            manager,
            state_path,
        })
    }

    /// Write the snapshot back, if a state file is configured.
    pub fn persist(&self) -> Result<()> {
        if let Some(path) = &self.state_path {
            std::fs::write(path, self.db.dump()?)?;
        }
        Ok(())
    }
}
