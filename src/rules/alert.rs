use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::common::types::Timestamp;

/// AlertState is the state of an alert instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertState {
    /// Neither firing nor pending.
    #[default]
    Inactive,
    /// Active for less than the rule's hold duration.
    Pending,
    /// Active for at least the rule's hold duration.
    Firing,
}

impl Display for AlertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertState::Inactive => "inactive",
            AlertState::Pending => "pending",
            AlertState::Firing => "firing",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for AlertState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inactive" => Ok(AlertState::Inactive),
            "pending" => Ok(AlertState::Pending),
            "firing" => Ok(AlertState::Firing),
            _ => Err(format!("unknown alert state: {}", s)),
        }
    }
}

/// One alert instance: a rule crossed with one matched label combination.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Instance identity: hash of the processed label set.
    pub id: u64,
    /// Name of the originating rule.
    pub name: String,
    /// Processed labels: instance labels merged with rule labels plus
    /// `alertname` and `severity`.
    pub labels: AHashMap<String, String>,
    pub annotations: AHashMap<String, String>,
    pub state: AlertState,
    /// The expression that produced the alert.
    pub expr: String,
    /// When the instance became active (entered Pending).
    pub active_at: Timestamp,
    /// When the instance transitioned to Firing.
    pub fired_at: Timestamp,
    /// When the instance resolved; zero while active.
    pub resolved_at: Timestamp,
    /// Value of the expression at the last evaluation.
    pub value: f64,
    /// Hold duration the instance needs to stay active before firing.
    #[serde(with = "crate::common::duration::serde_duration")]
    pub r#for: Duration,
}

/// State transition surfaced to the notification path.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertEvent {
    Firing(Alert),
    Resolved(Alert),
}

impl AlertEvent {
    pub fn alert(&self) -> &Alert {
        match self {
            AlertEvent::Firing(alert) | AlertEvent::Resolved(alert) => alert,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            AlertEvent::Firing(_) => "firing",
            AlertEvent::Resolved(_) => "resolved",
        }
    }
}
