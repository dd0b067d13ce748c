use std::path::Path;
use std::time::Duration;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::duration::serde_opt_duration;
use crate::rules::{RuleConfig, RuleError};
use crate::scrape::TargetConfig;

pub const DEFAULT_SCRAPE_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_SCRAPE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_EVALUATION_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_LOOK_BACK: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(2 * 60 * 60);
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 2;
pub const DEFAULT_NOTIFY_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_NOTIFY_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Resolved process-wide engine settings. Built once from the configuration
/// file and passed by reference into each component; never ambient state.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Default interval between scrapes of one target.
    pub scrape_interval: Duration,
    /// Upper bound on a single fetch.
    pub scrape_timeout: Duration,
    /// Consecutive failures beyond which a target is marked down.
    pub failure_threshold: u32,
    /// Interval between rule evaluation ticks.
    pub evaluation_interval: Duration,
    /// How far instant queries look back for the latest sample.
    pub look_back: Duration,
    /// Sample retention horizon; eviction happens lazily on write.
    pub retention: Duration,
    /// Labels merged into every rule's label set (rule labels win).
    pub external_labels: AHashMap<String, String>,
    /// Delivery attempts per notification before it is dropped.
    pub notify_max_attempts: u32,
    /// Initial delivery backoff, doubled per attempt.
    pub notify_backoff: Duration,
    /// Capacity of the evaluator -> dispatcher event queue.
    pub event_queue_capacity: usize,
    /// How long shutdown waits for in-flight work.
    pub shutdown_grace: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            scrape_interval: DEFAULT_SCRAPE_INTERVAL,
            scrape_timeout: DEFAULT_SCRAPE_TIMEOUT,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            evaluation_interval: DEFAULT_EVALUATION_INTERVAL,
            look_back: DEFAULT_LOOK_BACK,
            retention: DEFAULT_RETENTION,
            external_labels: AHashMap::new(),
            notify_max_attempts: DEFAULT_NOTIFY_MAX_ATTEMPTS,
            notify_backoff: DEFAULT_NOTIFY_BACKOFF,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid yaml: {0}")]
    InvalidYaml(String),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error(transparent)]
    InvalidRule(#[from] RuleError),

    #[error("invalid notifier: {0}")]
    InvalidNotifier(String),
}

/// Optional overrides of the engine defaults, `global:` in the file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default, with = "serde_opt_duration", skip_serializing_if = "Option::is_none")]
    pub scrape_interval: Option<Duration>,
    #[serde(default, with = "serde_opt_duration", skip_serializing_if = "Option::is_none")]
    pub scrape_timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<u32>,
    #[serde(default, with = "serde_opt_duration", skip_serializing_if = "Option::is_none")]
    pub evaluation_interval: Option<Duration>,
    #[serde(default, with = "serde_opt_duration", skip_serializing_if = "Option::is_none")]
    pub look_back: Option<Duration>,
    #[serde(default, with = "serde_opt_duration", skip_serializing_if = "Option::is_none")]
    pub retention: Option<Duration>,
    #[serde(default, skip_serializing_if = "std::collections::HashMap::is_empty")]
    pub external_labels: AHashMap<String, String>,
}

/// `notify:` section of the file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, with = "serde_opt_duration", skip_serializing_if = "Option::is_none")]
    pub backoff: Option<Duration>,
}

/// The full configuration file: engine overrides plus name-keyed targets and
/// rules. Loaded at startup and again on each reload signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub targets: AHashMap<String, TargetConfig>,
    #[serde(default)]
    pub rules: AHashMap<String, RuleConfig>,
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)
            .map_err(|err| ConfigError::InvalidYaml(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (job, target) in &self.targets {
            target.validate(job).map_err(ConfigError::InvalidTarget)?;
        }
        for rule in self.rule_configs() {
            rule.validate()?;
        }
        if let Some(url) = &self.notify.webhook_url {
            if reqwest::Url::parse(url).is_err() {
                return Err(ConfigError::InvalidNotifier(format!(
                    "invalid webhook url {:?}",
                    url
                )));
            }
        }
        Ok(())
    }

    /// Resolved engine settings: defaults overridden by the `global:`
    /// section and the `notify:` tuning knobs.
    pub fn settings(&self) -> Settings {
        let defaults = Settings::default();
        Settings {
            scrape_interval: self.global.scrape_interval.unwrap_or(defaults.scrape_interval),
            scrape_timeout: self.global.scrape_timeout.unwrap_or(defaults.scrape_timeout),
            failure_threshold: self
                .global
                .failure_threshold
                .unwrap_or(defaults.failure_threshold),
            evaluation_interval: self
                .global
                .evaluation_interval
                .unwrap_or(defaults.evaluation_interval),
            look_back: self.global.look_back.unwrap_or(defaults.look_back),
            retention: self.global.retention.unwrap_or(defaults.retention),
            external_labels: self.global.external_labels.clone(),
            notify_max_attempts: self.notify.max_attempts.unwrap_or(defaults.notify_max_attempts),
            notify_backoff: self.notify.backoff.unwrap_or(defaults.notify_backoff),
            event_queue_capacity: defaults.event_queue_capacity,
            shutdown_grace: defaults.shutdown_grace,
        }
    }

    /// Rule definitions with names filled in from the mapping keys and
    /// external labels merged underneath the rule's own labels. Sorted by
    /// name so evaluation order is stable across reloads.
    pub fn rule_configs(&self) -> Vec<RuleConfig> {
        let mut configs: Vec<RuleConfig> = self
            .rules
            .iter()
            .map(|(name, rule)| {
                let mut rule = rule.clone();
                rule.name = name.clone();
                for (k, v) in &self.global.external_labels {
                    rule.labels.entry(k.clone()).or_insert_with(|| v.clone());
                }
                rule
            })
            .collect();
        configs.sort_by(|a, b| a.name.cmp(&b.name));
        configs
    }
}
