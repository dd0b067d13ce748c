use std::time::{Duration, Instant};

use ahash::AHashMap;
use tracing::{debug, warn};

use crate::common::current_time_millis;
use crate::common::types::{Label, Sample, Timestamp};
use crate::common::METRIC_NAME_LABEL;
use crate::query::{eval_instant, Expr};
use crate::rules::rule::DEFAULT_RULE_STATE_ENTRIES;
use crate::rules::{RuleConfig, RuleResult, RuleState, RuleStateEntry};
use crate::error::TsdbError;
use crate::storage::MetricStore;

/// A recording rule: evaluates its expression each tick and writes the
/// result back to the store under the record name, with the rule's labels
/// merged in.
#[derive(Debug, Clone)]
pub struct RecordingRule {
    rule_id: u64,
    pub name: String,
    /// Metric name the results are recorded under.
    pub record: String,
    expr_src: String,
    expr: Expr,
    labels: AHashMap<String, String>,
    pub state: RuleState,
}

impl RecordingRule {
    pub fn new(cfg: &RuleConfig) -> RuleResult<Self> {
        cfg.validate()?;
        let expr = crate::query::parse_expr(&cfg.expr).expect("validated above");
        Ok(RecordingRule {
            rule_id: cfg.hash(),
            name: cfg.name.clone(),
            record: cfg.record.clone().unwrap_or_else(|| cfg.name.clone()),
            expr_src: cfg.expr.clone(),
            expr,
            labels: cfg.labels.clone(),
            state: RuleState::new(DEFAULT_RULE_STATE_ENTRIES),
        })
    }

    pub fn id(&self) -> u64 {
        self.rule_id
    }

    pub fn expr(&self) -> &str {
        &self.expr_src
    }

    /// One evaluation pass at `ts`; returns the number of samples recorded.
    pub fn exec(&mut self, store: &MetricStore, ts: Timestamp, lookback: Duration) -> usize {
        let wall = current_time_millis();
        let clock = Instant::now();
        let mut entry = RuleStateEntry {
            time: wall,
            at: ts,
            duration: Duration::ZERO,
            err: None,
            samples: 0,
        };

        let samples = match eval_instant(store, &self.expr, ts, lookback) {
            Ok(samples) => samples,
            Err(err) => {
                warn!(rule = %self.name, error = %err, "expression evaluation failed");
                entry.err = Some(err.to_string());
                Vec::new()
            }
        };

        let mut recorded = 0;
        for sample in samples {
            let labels = self.record_labels(sample.labels);
            match store.append(labels, Sample::new(ts, sample.value)) {
                Ok(()) => recorded += 1,
                // an unchanged evaluation timestamp is not worth a warning
                Err(TsdbError::OutOfOrderSample { .. }) => {
                    debug!(rule = %self.name, "dropping out-of-order recorded sample");
                }
                Err(err) => {
                    warn!(rule = %self.name, error = %err, "failed to record sample");
                    entry.err = Some(err.to_string());
                }
            }
        }

        entry.samples = recorded;
        entry.duration = clock.elapsed();
        self.state.add(entry);
        recorded
    }

    // Result labels: instance labels with `__name__` replaced by the record
    // name and rule labels layered on top.
    fn record_labels(&self, labels: Vec<Label>) -> Vec<Label> {
        let mut out: Vec<Label> = labels
            .into_iter()
            .filter(|l| l.name != METRIC_NAME_LABEL && !self.labels.contains_key(&l.name))
            .collect();
        out.push(Label::new(METRIC_NAME_LABEL, self.record.clone()));
        for (name, value) in &self.labels {
            out.push(Label::new(name.clone(), value.clone()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::Matchers;
    use crate::common::types::{LabelMatcher, MatchOp};

    const LOOKBACK: Duration = Duration::from_secs(300);

    fn record_rule() -> RecordingRule {
        RecordingRule::new(&RuleConfig {
            name: "instance:cpu:percent".to_string(),
            expr: "cpu_usage * 100".to_string(),
            record: Some("instance:cpu:percent".to_string()),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn records_result_under_new_name() {
        let store = MetricStore::new(Duration::ZERO);
        store
            .append(
                vec![
                    Label::new(METRIC_NAME_LABEL, "cpu_usage"),
                    Label::new("core", "0"),
                ],
                Sample::new(1000, 0.5),
            )
            .unwrap();

        let mut rule = record_rule();
        assert_eq!(rule.exec(&store, 1000, LOOKBACK), 1);

        let matchers = Matchers::new(vec![LabelMatcher::new(
            METRIC_NAME_LABEL,
            MatchOp::Equal,
            "instance:cpu:percent",
        )
        .unwrap()]);
        let got = store.query(&matchers, 0, 2000).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].samples[0].value, 50.0);
        assert!(got[0].labels.contains(&Label::new("core", "0")));
    }

    #[test]
    fn repeated_timestamp_is_not_an_error() {
        let store = MetricStore::new(Duration::ZERO);
        store
            .append(
                vec![Label::new(METRIC_NAME_LABEL, "cpu_usage")],
                Sample::new(1000, 0.5),
            )
            .unwrap();
        let mut rule = record_rule();
        assert_eq!(rule.exec(&store, 1000, LOOKBACK), 1);
        // same evaluation timestamp again: silently dropped
        assert_eq!(rule.exec(&store, 1000, LOOKBACK), 0);
        assert!(rule.state.last().unwrap().err.is_none());
    }
}
