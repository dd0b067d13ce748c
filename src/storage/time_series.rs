use std::collections::VecDeque;
use std::time::Duration;

use crate::common::types::{metric_name, Label, Sample, Timestamp};
use crate::error::{TsdbError, TsdbResult};

/// A single uniquely-labeled series. Samples are kept strictly time-ordered;
/// the append path rejects anything at or before the last stored timestamp.
///
/// Retention is lazy: expired samples are only dropped from the head on the
/// next successful append, so an idle series can hold samples past the
/// horizon until it is written to again.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    /// Sorted label set, including `__name__`. Uniquely identifies the series.
    pub labels: Vec<Label>,
    samples: VecDeque<Sample>,
    /// Count of samples ever accepted, including those since evicted.
    pub total_appended: u64,
}

impl TimeSeries {
    pub fn new(labels: Vec<Label>) -> Self {
        TimeSeries {
            labels,
            samples: VecDeque::new(),
            total_appended: 0,
        }
    }

    pub fn metric_name(&self) -> &str {
        metric_name(&self.labels).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn first_timestamp(&self) -> Option<Timestamp> {
        self.samples.front().map(|s| s.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.samples.back().map(|s| s.timestamp)
    }

    pub fn last_sample(&self) -> Option<Sample> {
        self.samples.back().copied()
    }

    pub fn append(&mut self, sample: Sample, retention: Duration) -> TsdbResult<()> {
        if let Some(last) = self.last_timestamp() {
            if sample.timestamp <= last {
                return Err(TsdbError::OutOfOrderSample {
                    last,
                    attempted: sample.timestamp,
                });
            }
        }
        self.samples.push_back(sample);
        self.total_appended += 1;
        self.evict_expired(sample.timestamp, retention);
        Ok(())
    }

    // Drops samples older than `now - retention` from the head. A zero
    // retention disables eviction.
    fn evict_expired(&mut self, now: Timestamp, retention: Duration) {
        if retention.is_zero() {
            return;
        }
        let horizon = now - retention.as_millis() as i64;
        while let Some(front) = self.samples.front() {
            if front.timestamp >= horizon {
                break;
            }
            self.samples.pop_front();
        }
    }

    /// Samples with `start <= timestamp <= end`, in time order.
    pub fn range(&self, start: Timestamp, end: Timestamp) -> Vec<Sample> {
        self.samples
            .iter()
            .filter(|s| s.timestamp >= start && s.timestamp <= end)
            .copied()
            .collect()
    }

    /// The most recent sample in `(ts - lookback, ts]`, if any. This is the
    /// instant-query resolution rule: a series that has not reported within
    /// the lookback window is considered absent.
    pub fn latest_in_window(&self, ts: Timestamp, lookback: Duration) -> Option<Sample> {
        let cutoff = ts - lookback.as_millis() as i64;
        self.samples
            .iter()
            .rev()
            .find(|s| s.timestamp <= ts)
            .filter(|s| s.timestamp > cutoff)
            .copied()
    }
}
