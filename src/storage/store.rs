use std::sync::{Arc, RwLock};
use std::time::Duration;

use ahash::AHashMap;
use serde::Serialize;

use crate::common::hash::hash_labels;
use crate::common::types::{
    metric_name, normalize_labels, Label, Matchers, Sample, Timestamp,
};
use crate::common::is_valid_metric_name;
use crate::error::{TsdbError, TsdbResult};
use crate::storage::TimeSeries;

/// A materialized slice of one series, as returned from queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesData {
    pub labels: Vec<Label>,
    pub samples: Vec<Sample>,
}

/// Append-only in-memory store of labeled series.
///
/// The outer map is read-locked for lookups and write-locked only when a new
/// series is created; each series carries its own lock, so appends to
/// different series proceed concurrently while appends to one series are
/// serialized.
pub struct MetricStore {
    retention: Duration,
    series: RwLock<AHashMap<u64, Arc<RwLock<TimeSeries>>>>,
}

impl MetricStore {
    pub fn new(retention: Duration) -> Self {
        MetricStore {
            retention,
            series: RwLock::new(AHashMap::new()),
        }
    }

    pub fn series_count(&self) -> usize {
        self.series.read().unwrap().len()
    }

    /// Appends one sample to the series identified by `labels`, creating the
    /// series on first write. Labels are normalized (sorted, deduplicated)
    /// before the identity hash is computed.
    pub fn append(&self, labels: Vec<Label>, sample: Sample) -> TsdbResult<()> {
        let labels = normalize_labels(labels);
        let name = metric_name(&labels).ok_or(TsdbError::MissingMetricName)?;
        if !is_valid_metric_name(name) {
            return Err(TsdbError::InvalidMetricName(name.to_string()));
        }
        let key = hash_labels(&labels);

        let existing = {
            let map = self.series.read().unwrap();
            map.get(&key).cloned()
        };
        let series = match existing {
            Some(series) => series,
            None => {
                let mut map = self.series.write().unwrap();
                map.entry(key)
                    .or_insert_with(|| Arc::new(RwLock::new(TimeSeries::new(labels))))
                    .clone()
            }
        };

        let mut guard = series.write().unwrap();
        guard.append(sample, self.retention)
    }

    /// All series whose label sets satisfy `matchers`.
    fn select(&self, matchers: &Matchers) -> Vec<Arc<RwLock<TimeSeries>>> {
        let map = self.series.read().unwrap();
        map.values()
            .filter(|s| matchers.matches(&s.read().unwrap().labels))
            .cloned()
            .collect()
    }

    /// Range query: per matching series, samples within `[start, end]` in
    /// time order. Series with no samples in the range are omitted.
    pub fn query(
        &self,
        matchers: &Matchers,
        start: Timestamp,
        end: Timestamp,
    ) -> TsdbResult<Vec<SeriesData>> {
        if start > end {
            return Err(TsdbError::InvalidRange { start, end });
        }
        let mut out: Vec<SeriesData> = self
            .select(matchers)
            .into_iter()
            .filter_map(|series| {
                let guard = series.read().unwrap();
                let samples = guard.range(start, end);
                if samples.is_empty() {
                    return None;
                }
                Some(SeriesData {
                    labels: guard.labels.clone(),
                    samples,
                })
            })
            .collect();
        out.sort_by(|a, b| a.labels.cmp(&b.labels));
        Ok(out)
    }

    /// Instant query: per matching series, the most recent sample within the
    /// lookback window ending at `ts`.
    pub fn latest(
        &self,
        matchers: &Matchers,
        ts: Timestamp,
        lookback: Duration,
    ) -> Vec<(Vec<Label>, Sample)> {
        let mut out: Vec<(Vec<Label>, Sample)> = self
            .select(matchers)
            .into_iter()
            .filter_map(|series| {
                let guard = series.read().unwrap();
                let sample = guard.latest_in_window(ts, lookback)?;
                Some((guard.labels.clone(), sample))
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{LabelMatcher, MatchOp};
    use crate::common::METRIC_NAME_LABEL;

    fn cpu_labels(core: &str) -> Vec<Label> {
        vec![
            Label::new(METRIC_NAME_LABEL, "cpu_usage"),
            Label::new("core", core),
        ]
    }

    fn name_matcher(name: &str) -> Matchers {
        Matchers::new(vec![
            LabelMatcher::new(METRIC_NAME_LABEL, MatchOp::Equal, name).unwrap(),
        ])
    }

    #[test]
    fn append_creates_series_once() {
        let store = MetricStore::new(Duration::ZERO);
        store.append(cpu_labels("0"), Sample::new(1000, 0.5)).unwrap();
        store.append(cpu_labels("0"), Sample::new(2000, 0.6)).unwrap();
        store.append(cpu_labels("1"), Sample::new(1000, 0.1)).unwrap();
        assert_eq!(store.series_count(), 2);
    }

    #[test]
    fn label_order_does_not_split_series() {
        let store = MetricStore::new(Duration::ZERO);
        store
            .append(
                vec![Label::new("core", "0"), Label::new(METRIC_NAME_LABEL, "cpu_usage")],
                Sample::new(1000, 0.5),
            )
            .unwrap();
        store.append(cpu_labels("0"), Sample::new(2000, 0.6)).unwrap();
        assert_eq!(store.series_count(), 1);
    }

    #[test]
    fn append_requires_metric_name() {
        let store = MetricStore::new(Duration::ZERO);
        let err = store
            .append(vec![Label::new("core", "0")], Sample::new(1000, 0.5))
            .unwrap_err();
        assert_eq!(err, TsdbError::MissingMetricName);
    }

    #[test]
    fn query_returns_samples_in_append_order() {
        let store = MetricStore::new(Duration::ZERO);
        for i in 1..=5 {
            store
                .append(cpu_labels("0"), Sample::new(i * 1000, i as f64))
                .unwrap();
        }
        let got = store.query(&name_matcher("cpu_usage"), 0, 10_000).unwrap();
        assert_eq!(got.len(), 1);
        let stamps: Vec<_> = got[0].samples.iter().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![1000, 2000, 3000, 4000, 5000]);
    }

    #[test]
    fn query_rejects_inverted_range() {
        let store = MetricStore::new(Duration::ZERO);
        assert_eq!(
            store.query(&name_matcher("cpu_usage"), 10, 5).unwrap_err(),
            TsdbError::InvalidRange { start: 10, end: 5 }
        );
    }

    #[test]
    fn latest_filters_by_matchers() {
        let store = MetricStore::new(Duration::ZERO);
        store.append(cpu_labels("0"), Sample::new(1000, 0.5)).unwrap();
        store.append(cpu_labels("1"), Sample::new(1000, 0.9)).unwrap();
        let matchers = Matchers::new(vec![
            LabelMatcher::new(METRIC_NAME_LABEL, MatchOp::Equal, "cpu_usage").unwrap(),
            LabelMatcher::new("core", MatchOp::Equal, "1").unwrap(),
        ]);
        let got = store.latest(&matchers, 1500, Duration::from_secs(5));
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].1.value, 0.9);
    }
}
