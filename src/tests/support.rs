use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::common::types::{Sample, Timestamp};
use crate::notify::{Notifier, NotifyResult};
use crate::rules::AlertEvent;
use crate::scrape::{Fetch, ScrapeError, ScrapeResult};

/// Fetcher that always returns the same exposition body.
pub struct StaticFetcher {
    body: String,
}

impl StaticFetcher {
    pub fn new(body: impl Into<String>) -> Arc<Self> {
        Arc::new(StaticFetcher { body: body.into() })
    }
}

#[async_trait]
impl Fetch for StaticFetcher {
    async fn fetch(&self, _address: &str) -> ScrapeResult<String> {
        Ok(self.body.clone())
    }
}

/// Fetcher that always fails, as an unreachable target would.
pub struct FailingFetcher;

#[async_trait]
impl Fetch for FailingFetcher {
    async fn fetch(&self, address: &str) -> ScrapeResult<String> {
        Err(ScrapeError::Fetch(format!("connection refused: {}", address)))
    }
}

/// Notifier that records every delivered event.
#[derive(Default)]
pub struct RecordingNotifier {
    delivered: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingNotifier::default())
    }

    /// (alert name, status) pairs in delivery order.
    pub fn seen(&self) -> Vec<(String, String)> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &AlertEvent) -> NotifyResult<()> {
        self.delivered
            .lock()
            .unwrap()
            .push((event.alert().name.clone(), event.status().to_string()));
        Ok(())
    }

    fn addr(&self) -> String {
        "recording".to_string()
    }
}

/// Strictly increasing random walk of samples starting at `start_ts`.
pub fn generate_samples(seed: u64, start_ts: Timestamp, count: usize) -> Vec<Sample> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut ts = start_ts;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        ts += rng.gen_range(1..5_000);
        out.push(Sample::new(ts, rng.gen_range(0.0..100.0)));
    }
    out
}
