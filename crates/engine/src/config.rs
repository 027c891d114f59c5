// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine configuration.
//!
//! Every knob has the documented default; deployments override through a
//! TOML file where durations are human strings ("500ms", "2s", "1h").

use serde::Deserialize;
use std::time::Duration;

use crate::EngineError;

/// Parse a duration string like "500ms", "30s", "5m", "1h" into a Duration
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the numeric prefix
    let (num_str, suffix) = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| (&s[..i], &s[i..]))
        .unwrap_or((s, ""));

    let num: u64 = num_str
        .parse()
        .map_err(|_| format!("invalid number in duration: {}", s))?;

    let multiplier = match suffix.trim() {
        "ms" | "millis" | "millisecond" | "milliseconds" => {
            return Ok(Duration::from_millis(num));
        }
        "" | "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "m" | "min" | "mins" | "minute" | "minutes" => 60,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3600,
        "d" | "day" | "days" => 86400,
        other => return Err(format!("unknown duration suffix: {}", other)),
    };

    Ok(Duration::from_secs(num * multiplier))
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

fn default_worker_count() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(4)
}

fn default_true() -> bool {
    true
}

/// Worker pool sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Worker pool slots per node. Defaults to the CPU count.
    pub count_per_node: u32,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count_per_node: default_worker_count(),
        }
    }
}

/// Job dispatcher loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    #[serde(deserialize_with = "deserialize_duration")]
    pub tick: Duration,
    /// Cap on jobs claimed per tick. `None` follows the worker count.
    pub claim_batch_max: Option<u32>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(500),
            claim_batch_max: None,
        }
    }
}

/// Phase orchestrator loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    #[serde(deserialize_with = "deserialize_duration")]
    pub tick: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub phase_timeout: Duration,
    #[serde(default = "default_true")]
    pub enable_fingerprint: bool,
    #[serde(default = "default_true")]
    pub enable_discovery: bool,
    #[serde(default = "default_true")]
    pub enable_nuclei: bool,
    #[serde(default = "default_true")]
    pub enable_websocket: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(2),
            phase_timeout: Duration::from_secs(3600),
            enable_fingerprint: true,
            enable_discovery: true,
            enable_nuclei: true,
            enable_websocket: true,
        }
    }
}

/// Node identity and liveness.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    #[serde(deserialize_with = "deserialize_duration")]
    pub heartbeat_interval: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub stale_threshold: Duration,
    /// Hostname override for node identity; detected when unset.
    pub hostname: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            stale_threshold: Duration::from_secs(120),
            hostname: None,
        }
    }
}

/// Per-job defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub default_max_attempts: u32,
    #[serde(deserialize_with = "deserialize_duration")]
    pub default_timeout: Duration,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: 3,
            default_timeout: Duration::from_secs(300),
        }
    }
}

/// Per-scan circuit breaker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    #[serde(deserialize_with = "deserialize_duration")]
    pub backoff_initial: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub backoff_max: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 10,
            backoff_initial: Duration::from_secs(30),
            backoff_max: Duration::from_secs(600),
        }
    }
}

/// Counter reconciliation sweep.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    #[serde(deserialize_with = "deserialize_duration")]
    pub interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// Engine configuration tree.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub workers: WorkersConfig,
    pub dispatcher: DispatcherConfig,
    pub orchestrator: OrchestratorConfig,
    pub node: NodeConfig,
    pub job: JobConfig,
    pub breaker: BreakerConfig,
    pub reconciler: ReconcilerConfig,
}

impl Config {
    /// Parse from TOML, falling back to defaults for anything unset.
    pub fn from_toml(text: &str) -> Result<Self, EngineError> {
        toml::from_str(text).map_err(|e| EngineError::InvalidConfig(e.to_string()))
    }

    /// Effective claim-batch ceiling for one dispatcher tick.
    pub fn claim_batch_max(&self) -> usize {
        self.dispatcher
            .claim_batch_max
            .unwrap_or(self.workers.count_per_node) as usize
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
