use std::collections::VecDeque;
use std::fmt::Display;
use std::time::Duration;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::Xxh3;

use crate::common::duration::serde_opt_duration;
use crate::common::is_valid_metric_name;
use crate::common::types::Timestamp;
use crate::query::parse_expr;
use crate::rules::{RuleError, RuleResult};

pub const DEFAULT_RULE_STATE_ENTRIES: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleType {
    #[default]
    Alerting,
    Recording,
}

impl RuleType {
    pub fn name(&self) -> &'static str {
        match self {
            RuleType::Recording => "recording",
            RuleType::Alerting => "alerting",
        }
    }
}

impl Display for RuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Declarative rule definition, keyed by rule name in the configuration
/// file. A rule with `record` set writes its result back to the store as a
/// new series instead of raising alerts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(skip)]
    pub name: String,
    pub expr: String,
    /// How long the expression must hold before the alert fires.
    #[serde(default, with = "serde_opt_duration", skip_serializing_if = "Option::is_none")]
    pub r#for: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    /// Metric name to record the result under; makes this a recording rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<String>,
    #[serde(default, skip_serializing_if = "std::collections::HashMap::is_empty")]
    pub labels: AHashMap<String, String>,
    #[serde(default, skip_serializing_if = "std::collections::HashMap::is_empty")]
    pub annotations: AHashMap<String, String>,
}

impl RuleConfig {
    pub fn rule_type(&self) -> RuleType {
        if self.record.is_some() {
            RuleType::Recording
        } else {
            RuleType::Alerting
        }
    }

    pub fn hold_duration(&self) -> Duration {
        self.r#for.unwrap_or(Duration::ZERO)
    }

    /// Stable identity over the fields that change evaluation semantics.
    /// Annotations are presentation-only and deliberately excluded, so an
    /// annotation edit survives reload without resetting alert state.
    pub fn hash(&self) -> u64 {
        let mut h = Xxh3::new();
        h.update(self.rule_type().name().as_bytes());
        h.update(b"\xff");
        h.update(self.name.as_bytes());
        h.update(b"\xff");
        h.update(self.expr.as_bytes());
        h.update(b"\xff");
        h.update(&self.hold_duration().as_millis().to_le_bytes());
        if let Some(record) = &self.record {
            h.update(record.as_bytes());
        }
        if let Some(severity) = &self.severity {
            h.update(severity.as_bytes());
        }
        let mut keys: Vec<&String> = self.labels.keys().collect();
        keys.sort();
        for key in keys {
            h.update(key.as_bytes());
            h.update(b"\xff");
            h.update(self.labels[key].as_bytes());
            h.update(b"\xff");
        }
        h.digest()
    }

    pub fn validate(&self) -> RuleResult<()> {
        let err = |reason: String| {
            Err(RuleError::InvalidRule {
                name: self.name.clone(),
                reason,
            })
        };
        if self.name.is_empty() {
            return err("rule must have a name".to_string());
        }
        if self.expr.is_empty() {
            return err("rule must have an expression".to_string());
        }
        if let Err(e) = parse_expr(&self.expr) {
            return err(format!("invalid expression: {}", e));
        }
        if let Some(record) = &self.record {
            if !is_valid_metric_name(record) {
                return err(format!("invalid record metric name {:?}", record));
            }
            if self.r#for.is_some() {
                return err("recording rules cannot have a for duration".to_string());
            }
            if self.severity.is_some() {
                return err("recording rules cannot have a severity".to_string());
            }
        }
        Ok(())
    }
}

impl Display for RuleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} rule {}; expr: {}", self.rule_type(), self.name, self.expr)
    }
}

/// A single evaluation outcome kept for introspection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleStateEntry {
    /// Wall time when the evaluation ran.
    pub time: Timestamp,
    /// The timestamp the rule was evaluated at.
    pub at: Timestamp,
    pub duration: Duration,
    /// Last error; reset on every successful evaluation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
    /// Number of instances the expression produced.
    pub samples: usize,
}

/// Bounded history of recent evaluations of one rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleState {
    entries: VecDeque<RuleStateEntry>,
    capacity: usize,
}

impl RuleState {
    pub fn new(capacity: usize) -> Self {
        RuleState {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn last(&self) -> Option<&RuleStateEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn add(&mut self, entry: RuleStateEntry) {
        if self.entries.len() == self.capacity {
            let _ = self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn iter(&self) -> std::collections::vec_deque::Iter<'_, RuleStateEntry> {
        self.entries.iter()
    }
}
