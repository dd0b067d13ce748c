mod alert;
mod alerting_rule;
mod evaluator;
mod recording_rule;
mod rule;

pub use alert::{Alert, AlertEvent, AlertState};
pub use alerting_rule::AlertingRule;
pub use evaluator::{Evaluator, RuleSet};
pub use recording_rule::RecordingRule;
pub use rule::{RuleConfig, RuleState, RuleStateEntry, RuleType};

use thiserror::Error;

/// ALERT_NAME_LABEL is the label name carrying the name of an alert.
pub static ALERT_NAME_LABEL: &str = "alertname";
/// SEVERITY_LABEL is the label name carrying a rule's severity.
pub static SEVERITY_LABEL: &str = "severity";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuleError {
    #[error("invalid rule {name:?}: {reason}")]
    InvalidRule { name: String, reason: String },
}

pub type RuleResult<T> = Result<T, RuleError>;
