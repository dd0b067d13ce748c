use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::common::duration::serde_opt_duration;
use crate::common::types::Timestamp;

/// Declarative scrape endpoint, keyed by job name in the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Full URL of the metrics endpoint, e.g. `http://10.0.0.5:9100/metrics`.
    pub address: String,
    /// Scrape interval; the global default applies when absent.
    #[serde(default, with = "serde_opt_duration", skip_serializing_if = "Option::is_none")]
    pub interval: Option<Duration>,
    /// Extra labels attached to every sample scraped from this target.
    /// Labels already present on a sample win.
    #[serde(default, skip_serializing_if = "std::collections::HashMap::is_empty")]
    pub labels: AHashMap<String, String>,
}

impl TargetConfig {
    pub fn validate(&self, job: &str) -> Result<(), String> {
        if self.address.is_empty() {
            return Err(format!("target {:?} must have an address", job));
        }
        if reqwest::Url::parse(&self.address).is_err() {
            return Err(format!(
                "target {:?} has an invalid address {:?}",
                job, self.address
            ));
        }
        if let Some(interval) = self.interval {
            if interval.is_zero() {
                return Err(format!("target {:?} interval must be greater than 0", job));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetHealth {
    /// No scrape has completed yet.
    #[default]
    Unknown,
    Up,
    Down,
}

impl Display for TargetHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TargetHealth::Unknown => "unknown",
            TargetHealth::Up => "up",
            TargetHealth::Down => "down",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for TargetHealth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(TargetHealth::Unknown),
            "up" => Ok(TargetHealth::Up),
            "down" => Ok(TargetHealth::Down),
            _ => Err(format!("unknown target health: {}", s)),
        }
    }
}

/// Mutable per-target scrape bookkeeping, updated after every attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetState {
    pub health: TargetHealth,
    pub consecutive_failures: u32,
    pub last_scrape: Timestamp,
    pub last_scrape_duration: Option<Duration>,
    /// Samples accepted by the store during the last successful scrape.
    pub last_samples: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl TargetState {
    pub fn record_success(&mut self, at: Timestamp, took: Duration, samples: usize) {
        self.health = TargetHealth::Up;
        self.consecutive_failures = 0;
        self.last_scrape = at;
        self.last_scrape_duration = Some(took);
        self.last_samples = samples;
        self.last_error = None;
    }

    /// Registers a failed attempt; returns true when the failure pushed the
    /// target over `threshold` into the Down state.
    pub fn record_failure(&mut self, at: Timestamp, error: String, threshold: u32) -> bool {
        self.consecutive_failures += 1;
        self.last_scrape = at;
        self.last_scrape_duration = None;
        self.last_error = Some(error);
        if self.consecutive_failures > threshold && self.health != TargetHealth::Down {
            self.health = TargetHealth::Down;
            return true;
        }
        false
    }

    pub fn is_down(&self) -> bool {
        self.health == TargetHealth::Down
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn down_transition_fires_once_past_threshold() {
        let mut state = TargetState::default();
        assert!(!state.record_failure(1, "refused".into(), 2));
        assert!(!state.record_failure(2, "refused".into(), 2));
        assert_eq!(state.health, TargetHealth::Unknown);
        // third consecutive failure crosses threshold 2
        assert!(state.record_failure(3, "refused".into(), 2));
        assert_eq!(state.health, TargetHealth::Down);
        // already down, no second transition
        assert!(!state.record_failure(4, "refused".into(), 2));
    }

    #[test]
    fn success_resets_failure_count() {
        let mut state = TargetState::default();
        state.record_failure(1, "refused".into(), 2);
        state.record_success(2, Duration::from_millis(12), 10);
        assert_eq!(state.health, TargetHealth::Up);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.last_error, None);
    }

    #[test]
    fn validate_rejects_bad_address() {
        let cfg = TargetConfig {
            address: "not a url".into(),
            ..Default::default()
        };
        assert!(cfg.validate("node").is_err());
    }
}
