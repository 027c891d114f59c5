// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identifier newtypes.
//!
//! Scans and jobs use database-assigned numeric ids; worker nodes use an
//! opaque string id that is unique per process instance.

/// Define a newtype ID wrapper around `i64`.
///
/// Generates `new()`, `get()`, `Display`, and `From<i64>` implementations.
/// Row ids are assigned monotonically by the storage layer.
#[macro_export]
macro_rules! define_row_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident;
    ) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            serde::Serialize,
            serde::Deserialize,
        )]
        pub struct $name(pub i64);

        impl $name {
            pub fn new(id: i64) -> Self {
                Self(id)
            }

            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

define_row_id! {
    /// Unique identifier for a scan.
    pub struct ScanId;
}

define_row_id! {
    /// Unique identifier for a scan job.
    pub struct JobId;
}

/// Opaque identifier for a worker node instance.
///
/// Formatted as `{hostname}-{start_epoch_secs}-{suffix}` so that prior
/// incarnations of the same node share the `{hostname}-` prefix. See
/// [`crate::node`] for generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a string slice truncated to at most `n` characters, for log display.
    pub fn short(&self, n: usize) -> &str {
        if self.0.len() <= n {
            &self.0
        } else {
            &self.0[..n]
        }
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::borrow::Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
