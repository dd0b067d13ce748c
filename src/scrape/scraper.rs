use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::common::current_time_millis;
use crate::common::types::{Label, Sample, Timestamp};
use crate::config::Settings;
use crate::error::TsdbError;
use crate::scrape::parse::parse_exposition;
use crate::scrape::target::{TargetConfig, TargetState};
use crate::scrape::{ScrapeError, ScrapeResult, INSTANCE_LABEL, JOB_LABEL, UP_METRIC_NAME};
use crate::storage::MetricStore;

/// Seam between the scrape loop and the transport, so tests can feed
/// canned bodies and failures.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, address: &str) -> ScrapeResult<String>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        HttpFetcher {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, address: &str) -> ScrapeResult<String> {
        let response = self
            .client
            .get(address)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ScrapeError::Fetch(e.to_string()))?;
        response
            .text()
            .await
            .map_err(|e| ScrapeError::Fetch(e.to_string()))
    }
}

/// One target's scrape loop. Each task runs independently on its own
/// interval; a slow or dead target only ever delays itself.
pub struct ScrapeTask {
    job: String,
    config: TargetConfig,
    interval: Duration,
    timeout: Duration,
    failure_threshold: u32,
    store: Arc<MetricStore>,
    fetcher: Arc<dyn Fetch>,
    state: Arc<RwLock<TargetState>>,
}

impl ScrapeTask {
    pub fn new(
        job: impl Into<String>,
        config: TargetConfig,
        settings: &Settings,
        store: Arc<MetricStore>,
        fetcher: Arc<dyn Fetch>,
    ) -> Self {
        let interval = config.interval.unwrap_or(settings.scrape_interval);
        ScrapeTask {
            job: job.into(),
            config,
            interval,
            timeout: settings.scrape_timeout,
            failure_threshold: settings.failure_threshold,
            store,
            fetcher,
            state: Arc::new(RwLock::new(TargetState::default())),
        }
    }

    /// Shared handle onto this target's health bookkeeping.
    pub fn state(&self) -> Arc<RwLock<TargetState>> {
        self.state.clone()
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        // deterministic start offset spreads targets over the interval
        let offset = start_offset(&self.job, self.interval);
        tokio::select! {
            _ = tokio::time::sleep(offset) => {}
            _ = shutdown.changed() => return,
        }

        info!(job = %self.job, address = %self.config.address, "scrape loop started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.scrape_once(current_time_millis()).await;
                }
                _ = shutdown.changed() => {
                    debug!(job = %self.job, "scrape loop stopped");
                    return;
                }
            }
        }
    }

    /// A single scrape attempt at `now`, visible for tests.
    pub async fn scrape_once(&self, now: Timestamp) {
        let started = Instant::now();
        let fetched = tokio::time::timeout(self.timeout, self.fetcher.fetch(&self.config.address))
            .await
            .map_err(|_| ScrapeError::Timeout(self.timeout.as_millis() as u64))
            .and_then(|r| r);

        match fetched {
            Ok(body) => {
                let appended = self.ingest(&body, now);
                self.state
                    .write()
                    .unwrap()
                    .record_success(now, started.elapsed(), appended);
                self.append_up(now, 1.0);
            }
            Err(err) => {
                let went_down = self.state.write().unwrap().record_failure(
                    now,
                    err.to_string(),
                    self.failure_threshold,
                );
                if went_down {
                    warn!(job = %self.job, address = %self.config.address, error = %err,
                        "target marked down");
                } else {
                    debug!(job = %self.job, error = %err, "scrape failed");
                }
                if self.state.read().unwrap().is_down() {
                    self.append_up(now, 0.0);
                }
            }
        }
    }

    // Applies target identity and extra labels, then appends everything the
    // body yielded. Malformed lines and out-of-order samples are logged and
    // skipped; the rest of the body still lands.
    fn ingest(&self, body: &str, now: Timestamp) -> usize {
        let mut appended = 0;
        for parsed in parse_exposition(body, now) {
            let parsed = match parsed {
                Ok(parsed) => parsed,
                Err(err) => {
                    debug!(job = %self.job, error = %err, "skipping exposition line");
                    continue;
                }
            };
            let mut labels = parsed.labels;
            self.decorate(&mut labels);
            match self.store.append(labels, parsed.sample) {
                Ok(()) => appended += 1,
                Err(TsdbError::OutOfOrderSample { .. }) => {
                    debug!(job = %self.job, "dropping out-of-order sample");
                }
                Err(err) => {
                    debug!(job = %self.job, error = %err, "sample rejected");
                }
            }
        }
        appended
    }

    // Attaches job/instance identity and the target's extra labels; labels
    // already advertised by the target win.
    fn decorate(&self, labels: &mut Vec<Label>) {
        let mut push_if_absent = |name: &str, value: &str| {
            if !labels.iter().any(|l| l.name == name) {
                labels.push(Label::new(name, value));
            }
        };
        push_if_absent(JOB_LABEL, &self.job);
        push_if_absent(INSTANCE_LABEL, &self.config.address);
        for (name, value) in &self.config.labels {
            if !labels.iter().any(|l| l.name == *name) {
                labels.push(Label::new(name.clone(), value.clone()));
            }
        }
    }

    fn append_up(&self, now: Timestamp, value: f64) {
        let mut labels = vec![Label::new(crate::common::METRIC_NAME_LABEL, UP_METRIC_NAME)];
        self.decorate(&mut labels);
        if let Err(err) = self.store.append(labels, Sample::new(now, value)) {
            debug!(job = %self.job, error = %err, "failed to record up sample");
        }
    }
}

fn start_offset(job: &str, interval: Duration) -> Duration {
    let millis = interval.as_millis() as u64;
    if millis == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(xxh3_64(job.as_bytes()) % millis)
}
