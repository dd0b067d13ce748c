use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::common::types::{Label, Matchers, Sample};
use crate::common::METRIC_NAME_LABEL;
use crate::config::{Config, Settings};
use crate::engine::Engine;
use crate::notify::{Dispatcher, Notifier};
use crate::rules::{AlertingRule, RuleConfig};
use crate::scrape::{ScrapeTask, TargetConfig, TargetHealth};
use crate::storage::MetricStore;
use crate::tests::support::{
    generate_samples, FailingFetcher, RecordingNotifier, StaticFetcher,
};

const MINUTE: i64 = 60_000;

fn dispatcher_pair(
    notifier: Arc<RecordingNotifier>,
) -> (mpsc::Sender<crate::rules::AlertEvent>, Dispatcher) {
    let (tx, rx) = mpsc::channel(64);
    let notifiers: Vec<Arc<dyn Notifier>> = vec![notifier];
    (tx, Dispatcher::new(rx, notifiers, 3, Duration::from_millis(1)))
}

#[test]
fn random_in_order_appends_read_back_in_order() {
    let store = MetricStore::new(Duration::ZERO);
    let labels = vec![Label::new(METRIC_NAME_LABEL, "walk")];
    let samples = generate_samples(42, 0, 500);
    for sample in &samples {
        store.append(labels.clone(), *sample).unwrap();
    }
    let matchers = Matchers::new(vec![crate::common::types::LabelMatcher::new(
        METRIC_NAME_LABEL,
        crate::common::types::MatchOp::Equal,
        "walk",
    )
    .unwrap()]);
    let got = store.query(&matchers, 0, i64::MAX).unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].samples, samples);
}

/// `cpu > 0.8` with a five minute hold, load held at 0.9 for six minutes:
/// exactly one firing transition and exactly one notification.
#[tokio::test]
async fn held_cpu_load_fires_once_and_notifies_once() {
    let store = MetricStore::new(Duration::ZERO);
    let mut rule = AlertingRule::new(&RuleConfig {
        name: "high_cpu".to_string(),
        expr: "cpu > 0.8".to_string(),
        r#for: Some(Duration::from_secs(300)),
        ..Default::default()
    })
    .unwrap();

    let notifier = RecordingNotifier::new();
    let (_tx, mut dispatcher) = dispatcher_pair(notifier.clone());

    let labels = vec![Label::new(METRIC_NAME_LABEL, "cpu")];
    for minute in 0..=6 {
        let ts = minute * MINUTE;
        store.append(labels.clone(), Sample::new(ts, 0.9)).unwrap();
        for event in rule.exec(&store, ts, Duration::from_secs(300)) {
            dispatcher.handle(event).await;
        }
    }

    let seen = notifier.seen();
    assert_eq!(seen, vec![("high_cpu".to_string(), "firing".to_string())]);
}

/// Firing, resolution, firing again: the sink sees the full cycle but never
/// two consecutive firing notifications for one instance.
#[tokio::test]
async fn flapping_alert_alternates_firing_and_resolved() {
    let store = MetricStore::new(Duration::ZERO);
    let mut rule = AlertingRule::new(&RuleConfig {
        name: "high_cpu".to_string(),
        expr: "cpu > 0.8".to_string(),
        ..Default::default()
    })
    .unwrap();
    let notifier = RecordingNotifier::new();
    let (_tx, mut dispatcher) = dispatcher_pair(notifier.clone());

    let labels = vec![Label::new(METRIC_NAME_LABEL, "cpu")];
    let loads = [0.9, 0.9, 0.1, 0.9, 0.9, 0.2];
    for (i, load) in loads.iter().enumerate() {
        let ts = i as i64 * MINUTE;
        store.append(labels.clone(), Sample::new(ts, *load)).unwrap();
        for event in rule.exec(&store, ts, Duration::from_secs(300)) {
            dispatcher.handle(event).await;
        }
    }

    let statuses: Vec<String> = notifier.seen().into_iter().map(|(_, s)| s).collect();
    assert_eq!(statuses, vec!["firing", "resolved", "firing", "resolved"]);
    assert!(
        statuses.windows(2).all(|w| w[0] != w[1] || w[0] != "firing"),
        "no two consecutive firing notifications"
    );
}

/// Failure threshold 2, three consecutive failed scrapes: the target goes
/// down and `up=0` lands in the store.
#[tokio::test]
async fn failing_target_is_marked_down_with_up_zero() {
    let settings = Settings {
        failure_threshold: 2,
        ..Default::default()
    };
    let store = Arc::new(MetricStore::new(Duration::ZERO));
    let task = ScrapeTask::new(
        "node",
        TargetConfig {
            address: "http://10.0.0.5:9100/metrics".to_string(),
            ..Default::default()
        },
        &settings,
        store.clone(),
        Arc::new(FailingFetcher),
    );

    for i in 1..=3 {
        task.scrape_once(i * 1000).await;
    }

    let state = task.state();
    let state = state.read().unwrap().clone();
    assert_eq!(state.health, TargetHealth::Down);
    assert_eq!(state.consecutive_failures, 3);

    let up = store
        .query(
            &Matchers::new(vec![crate::common::types::LabelMatcher::new(
                METRIC_NAME_LABEL,
                crate::common::types::MatchOp::Equal,
                "up",
            )
            .unwrap()]),
            0,
            i64::MAX,
        )
        .unwrap();
    assert_eq!(up.len(), 1);
    assert_eq!(up[0].samples.last().unwrap().value, 0.0);
    assert!(up[0]
        .labels
        .contains(&Label::new("instance", "http://10.0.0.5:9100/metrics")));
}

/// Recovery after a down period: `up` flips back to 1 and the failure
/// counter clears.
#[tokio::test]
async fn recovered_target_reports_up_one() {
    let settings = Settings {
        failure_threshold: 1,
        ..Default::default()
    };
    let store = Arc::new(MetricStore::new(Duration::ZERO));
    let task = ScrapeTask::new(
        "node",
        TargetConfig {
            address: "http://10.0.0.5:9100/metrics".to_string(),
            ..Default::default()
        },
        &settings,
        store.clone(),
        StaticFetcher::new("node_load1 0.7\n"),
    );

    task.scrape_once(1000).await;
    let state = task.state();
    assert_eq!(state.read().unwrap().health, TargetHealth::Up);
    assert_eq!(state.read().unwrap().last_samples, 1);

    let series = store
        .query(
            &Matchers::new(vec![crate::common::types::LabelMatcher::new(
                METRIC_NAME_LABEL,
                crate::common::types::MatchOp::Equal,
                "node_load1",
            )
            .unwrap()]),
            0,
            i64::MAX,
        )
        .unwrap();
    assert_eq!(series.len(), 1);
    assert!(series[0].labels.contains(&Label::new("job", "node")));
}

const E2E_CONFIG: &str = r#"
global:
  scrape_interval: 100ms
  evaluation_interval: 100ms
targets:
  demo:
    address: http://demo.internal/metrics
rules:
  queue_backlog:
    expr: queue_depth > 10
    severity: warning
"#;

/// Full pipeline: scrape -> store -> evaluate -> notify, on real timers.
#[tokio::test]
async fn engine_pipeline_end_to_end() {
    let config = Config::from_yaml(E2E_CONFIG).unwrap();
    let notifier = RecordingNotifier::new();
    let engine = Engine::start_with(
        config,
        StaticFetcher::new("queue_depth 42\n"),
        vec![notifier.clone()],
    )
    .unwrap();

    tokio::time::sleep(Duration::from_millis(800)).await;

    let now = crate::common::current_time_millis();
    let series = engine.query("queue_depth", now - 60_000, now).unwrap();
    assert_eq!(series.len(), 1, "scraped series is queryable");

    let states = engine.target_states();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].1.health, TargetHealth::Up);

    let seen = notifier.seen();
    assert_eq!(
        seen,
        vec![("queue_backlog".to_string(), "firing".to_string())],
        "continuous firing is reported exactly once"
    );

    engine.shutdown(Duration::from_secs(2)).await;
}

/// Reload removes a target and its scrape loop with it.
#[tokio::test]
async fn reload_drops_removed_targets() {
    let config = Config::from_yaml(E2E_CONFIG).unwrap();
    let engine = Engine::start_with(
        config,
        StaticFetcher::new("queue_depth 1\n"),
        Vec::new(),
    )
    .unwrap();
    assert_eq!(engine.target_states().len(), 1);

    engine.reload(Config::default()).unwrap();
    assert!(engine.target_states().is_empty());

    engine.shutdown(Duration::from_secs(2)).await;
}
