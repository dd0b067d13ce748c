use std::fmt::Display;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::common::METRIC_NAME_LABEL;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// A single name/value pair attached to a series.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Label {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A single observation in a series.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: Timestamp,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: Timestamp, value: f64) -> Self {
        Sample { timestamp, value }
    }
}

/// Sorts labels by name and drops duplicate names, keeping the last value.
pub fn normalize_labels(mut labels: Vec<Label>) -> Vec<Label> {
    labels.sort();
    labels.dedup_by(|a, b| a.name == b.name);
    labels
}

pub fn label_value<'a>(labels: &'a [Label], name: &str) -> Option<&'a str> {
    labels
        .iter()
        .find(|l| l.name == name)
        .map(|l| l.value.as_str())
}

pub fn metric_name(labels: &[Label]) -> Option<&str> {
    label_value(labels, METRIC_NAME_LABEL)
}

/// Renders a label set in the usual `name{label="value",...}` form.
pub fn labels_to_string(labels: &[Label]) -> String {
    let capacity = labels
        .iter()
        .fold(2, |acc, l| acc + l.name.len() + l.value.len() + 4);
    let mut b = String::with_capacity(capacity);
    if let Some(name) = metric_name(labels) {
        b.push_str(name);
    }
    b.push('{');
    let mut first = true;
    for label in labels {
        if label.name == METRIC_NAME_LABEL {
            continue;
        }
        if !first {
            b.push(',');
        }
        first = false;
        b.push_str(&label.name);
        b.push('=');
        b.push_str(&enquote::enquote('"', &label.value));
    }
    b.push('}');
    b
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOp {
    Equal,
    NotEqual,
    RegexEqual,
    RegexNotEqual,
}

impl Display for MatchOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MatchOp::Equal => "=",
            MatchOp::NotEqual => "!=",
            MatchOp::RegexEqual => "=~",
            MatchOp::RegexNotEqual => "!~",
        };
        write!(f, "{}", s)
    }
}

/// A single label condition of a series selector. Regex matchers are anchored
/// and compiled once at parse time.
#[derive(Debug, Clone)]
pub struct LabelMatcher {
    pub label: String,
    pub op: MatchOp,
    pub value: String,
    re: Option<Regex>,
}

impl LabelMatcher {
    pub fn new(label: impl Into<String>, op: MatchOp, value: impl Into<String>) -> Result<Self, regex::Error> {
        let label = label.into();
        let value = value.into();
        let re = match op {
            MatchOp::RegexEqual | MatchOp::RegexNotEqual => {
                Some(Regex::new(&format!("^(?:{})$", value))?)
            }
            _ => None,
        };
        Ok(LabelMatcher {
            label,
            op,
            value,
            re,
        })
    }

    pub fn matches(&self, value: &str) -> bool {
        match self.op {
            MatchOp::Equal => self.value == value,
            MatchOp::NotEqual => self.value != value,
            MatchOp::RegexEqual => self.re.as_ref().is_some_and(|re| re.is_match(value)),
            MatchOp::RegexNotEqual => !self.re.as_ref().is_some_and(|re| re.is_match(value)),
        }
    }

    /// Applies the matcher to a full label set. A missing label is treated as
    /// an empty value, consistent with Prometheus selector semantics.
    pub fn matches_labels(&self, labels: &[Label]) -> bool {
        let value = label_value(labels, &self.label).unwrap_or("");
        self.matches(value)
    }
}

impl PartialEq for LabelMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label && self.op == other.op && self.value == other.value
    }
}

impl Display for LabelMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.label,
            self.op,
            enquote::enquote('"', &self.value)
        )
    }
}

/// A compiled series selector: all matchers must hold for a series to match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Matchers(pub Vec<LabelMatcher>);

impl Matchers {
    pub fn new(matchers: Vec<LabelMatcher>) -> Self {
        Matchers(matchers)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, labels: &[Label]) -> bool {
        self.0.iter().all(|m| m.matches_labels(labels))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LabelMatcher> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_sorts_and_dedupes() {
        let labels = normalize_labels(vec![
            Label::new("zone", "us-east"),
            Label::new("env", "dev"),
            Label::new("env", "prod"),
        ]);
        assert_eq!(
            labels,
            vec![Label::new("env", "prod"), Label::new("zone", "us-east")]
        );
    }

    #[test]
    fn labels_render_with_metric_name_outside_braces() {
        let labels = vec![
            Label::new(METRIC_NAME_LABEL, "http_requests_total"),
            Label::new("method", "POST"),
        ];
        assert_eq!(
            labels_to_string(&labels),
            r#"http_requests_total{method="POST"}"#
        );
    }

    #[test]
    fn regex_matcher_is_anchored() {
        let m = LabelMatcher::new("env", MatchOp::RegexEqual, "prod.*").unwrap();
        assert!(m.matches("production"));
        assert!(!m.matches("preprod"));
    }

    #[test]
    fn missing_label_matches_empty() {
        let m = LabelMatcher::new("env", MatchOp::NotEqual, "prod").unwrap();
        assert!(m.matches_labels(&[Label::new("job", "node")]));
    }
}
