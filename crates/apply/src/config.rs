//! Reconciler configuration, read from `SETTLE_*` environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use settle_core::NamespacePolicy;
use tracing::warn;

/// Timing for every convergence wait the reconciler starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    pub delay: Duration,
    pub min_interval: Duration,
    pub poll_interval: Option<Duration>,
    pub continuous_target_occurrence: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            min_interval: Duration::from_secs(5),
            poll_interval: None,
            continuous_target_occurrence: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    pub namespace_policy: NamespacePolicy,
    /// Record the last-applied annotation before create/update.
    pub annotate: bool,
    pub wait_for_ready: bool,
    pub wait_for_deletion: bool,
    pub poll: PollConfig,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            namespace_policy: NamespacePolicy::default(),
            annotate: true,
            wait_for_ready: true,
            wait_for_deletion: true,
            poll: PollConfig::default(),
        }
    }
}

impl ReconcileConfig {
    /// Defaults overridden by whatever `SETTLE_*` variables are set and valid.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(v) = get("SETTLE_NAMESPACE_POLICY") {
            match v.parse::<NamespacePolicy>() {
                Ok(p) => cfg.namespace_policy = p,
                Err(e) => warn!(error = %e, "ignoring SETTLE_NAMESPACE_POLICY"),
            }
        }
        if let Some(b) = get("SETTLE_ANNOTATE").and_then(|v| parse_flag(&v)) { cfg.annotate = b; }
        if let Some(b) = get("SETTLE_WAIT_READY").and_then(|v| parse_flag(&v)) { cfg.wait_for_ready = b; }
        if let Some(b) = get("SETTLE_WAIT_DELETE").and_then(|v| parse_flag(&v)) { cfg.wait_for_deletion = b; }
        if let Some(d) = get("SETTLE_POLL_DELAY_SECS").and_then(|v| parse_secs(&v)) { cfg.poll.delay = d; }
        if let Some(d) = get("SETTLE_POLL_MIN_INTERVAL_SECS").and_then(|v| parse_secs(&v)) { cfg.poll.min_interval = d; }
        if let Some(d) = get("SETTLE_POLL_INTERVAL_SECS").and_then(|v| parse_secs(&v)) { cfg.poll.poll_interval = Some(d); }
        if let Some(n) = get("SETTLE_TARGET_OCCURRENCE").and_then(|v| v.parse::<u32>().ok()) {
            cfg.poll.continuous_target_occurrence = n.max(1);
        }
        cfg
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_secs(v: &str) -> Option<Duration> {
    v.trim().parse::<f64>().ok().and_then(|s| Duration::try_from_secs_f64(s).ok())
}
