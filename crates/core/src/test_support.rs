// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for use across crates.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.

use crate::event::{Event, EventSink};
use crate::scan::{Scan, ScanOptions};
use parking_lot::Mutex;

/// Event sink that records everything it sees, for assertions.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Names of recorded events, in emission order.
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.name()).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }
}

/// A scan fixture with a single start URL and all phases enabled.
pub fn scan_fixture(title: &str) -> Scan {
    Scan::new(
        1,
        title,
        ScanOptions {
            start_urls: vec!["https://example.test/".to_string()],
            ..ScanOptions::default()
        },
    )
}
