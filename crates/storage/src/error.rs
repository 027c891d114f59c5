// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Storage error type.

use strix_core::{JobId, ScanId};
use thiserror::Error;

/// Errors surfaced by [`crate::Database`] implementations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("scan not found: {0}")]
    ScanNotFound(ScanId),
    #[error("job not found: {0}")]
    JobNotFound(JobId),
    #[error("node not found: {0}")]
    NodeNotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    /// Transient backend failure; callers may retry on their next tick.
    #[error("database unavailable: {0}")]
    Unavailable(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Whether retrying the same operation can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}
