use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::common::current_time_millis;
use crate::common::types::Timestamp;
use crate::rules::{AlertEvent, AlertingRule, RecordingRule, RuleConfig, RuleError, RuleResult};
use crate::storage::MetricStore;

/// All live rules, grouped by kind. Swapped wholesale on reload, with state
/// carried over for rules whose definition has not changed.
#[derive(Debug, Default)]
pub struct RuleSet {
    pub alerting: Vec<AlertingRule>,
    pub recording: Vec<RecordingRule>,
}

impl RuleSet {
    pub fn from_configs(configs: &[RuleConfig]) -> RuleResult<Self> {
        let mut set = RuleSet::default();
        let mut ids = HashMap::new();
        for cfg in configs {
            if let Some(previous) = ids.insert(cfg.hash(), cfg.name.clone()) {
                return Err(RuleError::InvalidRule {
                    name: cfg.name.clone(),
                    reason: format!("duplicate of rule {:?}", previous),
                });
            }
            match cfg.record {
                Some(_) => set.recording.push(RecordingRule::new(cfg)?),
                None => set.alerting.push(AlertingRule::new(cfg)?),
            }
        }
        Ok(set)
    }

    pub fn rule_count(&self) -> usize {
        self.alerting.len() + self.recording.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rule_count() == 0
    }

    /// Replaces this set with `new`, preserving instance state and history
    /// for rules whose id (name, expression, hold, labels) is unchanged.
    pub fn update_with(&mut self, mut new: RuleSet) {
        let mut old_alerting: HashMap<u64, AlertingRule> =
            self.alerting.drain(..).map(|r| (r.id(), r)).collect();
        for rule in new.alerting.iter_mut() {
            if let Some(mut kept) = old_alerting.remove(&rule.id()) {
                kept.update_with(rule);
                *rule = kept;
            }
        }
        let mut old_recording: HashMap<u64, RecordingRule> =
            self.recording.drain(..).map(|r| (r.id(), r)).collect();
        for rule in new.recording.iter_mut() {
            if let Some(kept) = old_recording.remove(&rule.id()) {
                *rule = kept;
            }
        }
        self.alerting = new.alerting;
        self.recording = new.recording;
    }
}

/// Drives sequential evaluation ticks over the rule set. Ticks never
/// overlap; surfacing events to the dispatcher is non-blocking.
pub struct Evaluator {
    store: Arc<MetricStore>,
    rules: Arc<Mutex<RuleSet>>,
    events_tx: mpsc::Sender<AlertEvent>,
    interval: Duration,
    lookback: Duration,
}

impl Evaluator {
    pub fn new(
        store: Arc<MetricStore>,
        rules: Arc<Mutex<RuleSet>>,
        events_tx: mpsc::Sender<AlertEvent>,
        interval: Duration,
        lookback: Duration,
    ) -> Self {
        Evaluator {
            store,
            rules,
            events_tx,
            interval,
            lookback,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "rule evaluator started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick of tokio's interval completes immediately
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.eval_tick(current_time_millis());
                }
                _ = shutdown.changed() => {
                    debug!("rule evaluator stopped");
                    return;
                }
            }
        }
    }

    /// One full evaluation pass at `ts`. Recording rules run first so that
    /// alerting expressions can reference freshly recorded series.
    pub fn eval_tick(&self, ts: Timestamp) {
        let mut rules = self.rules.lock().unwrap();
        for rule in rules.recording.iter_mut() {
            rule.exec(&self.store, ts, self.lookback);
        }
        for rule in rules.alerting.iter_mut() {
            for event in rule.exec(&self.store, ts, self.lookback) {
                self.surface(event);
            }
        }
    }

    // Fire-and-forget: the evaluator never waits on the notification path.
    fn surface(&self, event: AlertEvent) {
        match self.events_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(
                    alert = %event.alert().name,
                    status = event.status(),
                    "notification queue full, dropping event"
                );
            }
            Err(TrySendError::Closed(_)) => {
                debug!("notification queue closed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{Label, Sample};
    use crate::common::METRIC_NAME_LABEL;
    use crate::rules::AlertState;

    fn configs(rules: &[(&str, &str)]) -> Vec<RuleConfig> {
        rules
            .iter()
            .map(|(name, expr)| RuleConfig {
                name: name.to_string(),
                expr: expr.to_string(),
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn duplicate_rules_are_rejected() {
        let cfgs = configs(&[("high_cpu", "cpu > 0.8"), ("high_cpu", "cpu > 0.8")]);
        assert!(RuleSet::from_configs(&cfgs).is_err());
    }

    #[test]
    fn update_preserves_state_of_unchanged_rules() {
        let store = MetricStore::new(Duration::ZERO);
        store
            .append(
                vec![Label::new(METRIC_NAME_LABEL, "cpu")],
                Sample::new(0, 0.9),
            )
            .unwrap();

        let mut set =
            RuleSet::from_configs(&configs(&[("high_cpu", "cpu > 0.8")])).unwrap();
        set.alerting[0].exec(&store, 0, Duration::from_secs(300));
        assert_eq!(set.alerting[0].count_in_state(AlertState::Firing), 1);

        // same definition plus one new rule: firing state survives
        let new = RuleSet::from_configs(&configs(&[
            ("high_cpu", "cpu > 0.8"),
            ("low_mem", "mem < 0.1"),
        ]))
        .unwrap();
        set.update_with(new);
        assert_eq!(set.rule_count(), 2);
        let kept = set
            .alerting
            .iter()
            .find(|r| r.name == "high_cpu")
            .unwrap();
        assert_eq!(kept.count_in_state(AlertState::Firing), 1);

        // changed expression: state resets
        let new = RuleSet::from_configs(&configs(&[("high_cpu", "cpu > 0.9")])).unwrap();
        set.update_with(new);
        assert_eq!(set.alerting[0].count_in_state(AlertState::Firing), 0);
    }

    #[tokio::test]
    async fn eval_tick_surfaces_events_without_blocking() {
        let store = Arc::new(MetricStore::new(Duration::ZERO));
        store
            .append(
                vec![Label::new(METRIC_NAME_LABEL, "cpu")],
                Sample::new(0, 0.9),
            )
            .unwrap();
        let rules = Arc::new(Mutex::new(
            RuleSet::from_configs(&configs(&[("high_cpu", "cpu > 0.8")])).unwrap(),
        ));
        // capacity 1: the second tick's event overflows and is dropped,
        // but the tick itself must not block
        let (tx, mut rx) = mpsc::channel(1);
        let evaluator = Evaluator::new(
            store,
            rules,
            tx,
            Duration::from_secs(15),
            Duration::from_secs(300),
        );
        evaluator.eval_tick(0);
        evaluator.eval_tick(1);
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, AlertEvent::Firing(_)));
    }
}
