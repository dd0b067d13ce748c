use std::time::{Duration, Instant};

use ahash::{AHashMap, AHashSet};
use tracing::{debug, warn};

use crate::common::current_time_millis;
use crate::common::hash::hash_label_map;
use crate::common::types::Timestamp;
use crate::common::METRIC_NAME_LABEL;
use crate::query::{eval_instant, Expr, InstantSample};
use crate::rules::rule::DEFAULT_RULE_STATE_ENTRIES;
use crate::rules::{
    Alert, AlertEvent, AlertState, RuleConfig, RuleResult, RuleState, RuleStateEntry,
    ALERT_NAME_LABEL, SEVERITY_LABEL,
};
use crate::storage::MetricStore;

/// An alerting rule and the live state of its instances.
///
/// One instance exists per distinct label combination the expression
/// matches. Instances move Inactive -> Pending -> Firing while the
/// expression holds, and drop straight back to Inactive the moment it stops
/// holding, whatever the prior state.
#[derive(Debug, Clone)]
pub struct AlertingRule {
    rule_id: u64,
    pub name: String,
    expr_src: String,
    expr: Expr,
    pub r#for: Duration,
    severity: Option<String>,
    labels: AHashMap<String, String>,
    annotations: AHashMap<String, String>,
    /// Live alert instances keyed by processed-label hash.
    alerts: AHashMap<u64, Alert>,
    /// Recent evaluation history.
    pub state: RuleState,
}

impl AlertingRule {
    pub fn new(cfg: &RuleConfig) -> RuleResult<Self> {
        cfg.validate()?;
        let expr = crate::query::parse_expr(&cfg.expr).expect("validated above");
        Ok(AlertingRule {
            rule_id: cfg.hash(),
            name: cfg.name.clone(),
            expr_src: cfg.expr.clone(),
            expr,
            r#for: cfg.hold_duration(),
            severity: cfg.severity.clone(),
            labels: cfg.labels.clone(),
            annotations: cfg.annotations.clone(),
            alerts: AHashMap::new(),
            state: RuleState::new(DEFAULT_RULE_STATE_ENTRIES),
        })
    }

    /// Unique id over the rule's evaluation-relevant fields.
    pub fn id(&self) -> u64 {
        self.rule_id
    }

    pub fn expr(&self) -> &str {
        &self.expr_src
    }

    /// Carries presentation-only fields over from a reloaded definition with
    /// the same id. Alert instances and history are deliberately kept.
    pub fn update_with(&mut self, other: &AlertingRule) {
        self.annotations = other.annotations.clone();
    }

    pub fn count_in_state(&self, state: AlertState) -> usize {
        self.alerts.values().filter(|a| a.state == state).count()
    }

    pub fn active_alerts(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.values()
    }

    /// One evaluation pass at `ts`. Returns the events to surface: one
    /// `Firing` per firing instance per tick, one `Resolved` per instance
    /// whose condition stopped holding while it was firing.
    pub fn exec(
        &mut self,
        store: &MetricStore,
        ts: Timestamp,
        lookback: Duration,
    ) -> Vec<AlertEvent> {
        let wall = current_time_millis();
        let clock = Instant::now();
        let mut entry = RuleStateEntry {
            time: wall,
            at: ts,
            duration: Duration::ZERO,
            err: None,
            samples: 0,
        };

        // An evaluation error leaves no matched instances: everything the
        // rule had is swept below, the same as an expression gone false.
        let samples = match eval_instant(store, &self.expr, ts, lookback) {
            Ok(samples) => samples,
            Err(err) => {
                warn!(rule = %self.name, error = %err, "expression evaluation failed");
                entry.err = Some(err.to_string());
                Vec::new()
            }
        };
        entry.samples = samples.len();

        let mut events = Vec::new();
        let mut seen = AHashSet::with_capacity(samples.len());

        for sample in &samples {
            let labels = self.instance_labels(sample);
            let id = hash_label_map(&labels);
            seen.insert(id);

            let alert = self.alerts.entry(id).or_insert_with(|| {
                debug!(rule = %self.name, "instance created in state pending");
                Alert {
                    id,
                    name: self.name.clone(),
                    labels,
                    annotations: self.annotations.clone(),
                    state: AlertState::Pending,
                    expr: self.expr_src.clone(),
                    active_at: ts,
                    fired_at: 0,
                    resolved_at: 0,
                    value: sample.value,
                    r#for: self.r#for,
                }
            });
            alert.value = sample.value;

            if alert.state == AlertState::Pending && ts - alert.active_at >= self.r#for.as_millis() as i64
            {
                alert.state = AlertState::Firing;
                alert.fired_at = ts;
                debug!(rule = %self.name, "instance pending => firing");
            }
            if alert.state == AlertState::Firing {
                events.push(AlertEvent::Firing(alert.clone()));
            }
        }

        // Anything not matched this tick reverts to Inactive immediately.
        let name = self.name.clone();
        self.alerts.retain(|id, alert| {
            if seen.contains(id) {
                return true;
            }
            if alert.state == AlertState::Firing {
                alert.state = AlertState::Inactive;
                alert.resolved_at = ts;
                debug!(rule = %name, "instance firing => inactive");
                events.push(AlertEvent::Resolved(alert.clone()));
            } else {
                debug!(rule = %name, "instance pending => inactive");
            }
            false
        });

        entry.duration = clock.elapsed();
        self.state.add(entry);
        events
    }

    // Processed labels of one instance: sample labels without the metric
    // name, overridden by rule labels, plus the alertname/severity service
    // labels.
    fn instance_labels(&self, sample: &InstantSample) -> AHashMap<String, String> {
        let mut labels = AHashMap::with_capacity(sample.labels.len() + self.labels.len() + 2);
        for label in &sample.labels {
            if label.name == METRIC_NAME_LABEL {
                continue;
            }
            labels.insert(label.name.clone(), label.value.clone());
        }
        for (name, value) in &self.labels {
            labels.insert(name.clone(), value.clone());
        }
        labels.insert(ALERT_NAME_LABEL.to_string(), self.name.clone());
        if let Some(severity) = &self.severity {
            labels.insert(SEVERITY_LABEL.to_string(), severity.clone());
        }
        labels
    }
}
