// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the engine.

use strix_core::TransitionError;
use strix_storage::StorageError;
use thiserror::Error;

/// Errors that can occur in the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
    #[error("scan is not paused")]
    NotPaused,
    #[error("seeding failed for phase {phase}: {message}")]
    SeedFailed { phase: String, message: String },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// Whether the underlying cause is a transient storage failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Storage(e) if e.is_transient())
    }
}
