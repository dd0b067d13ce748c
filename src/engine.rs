use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use ahash::AHashMap;
use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::common::types::Timestamp;
use crate::config::{Config, ConfigError, Settings};
use crate::error::TsdbError;
use crate::notify::{Dispatcher, Notifier, WebhookNotifier};
use crate::query::{parse_selector, selector_matchers};
use crate::rules::{Evaluator, RuleSet};
use crate::scrape::{Fetch, HttpFetcher, ScrapeTask, TargetConfig, TargetState};
use crate::storage::{MetricStore, SeriesData};

struct ScraperEntry {
    config: TargetConfig,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
    state: Arc<RwLock<TargetState>>,
}

/// Builds and wires the engine: store, per-target scrape tasks, the rule
/// evaluator and the notifier dispatcher.
pub struct Engine;

impl Engine {
    /// Starts the engine with the HTTP fetcher and the webhook notifier from
    /// the configuration. Must be called within a tokio runtime.
    pub fn start(config: Config) -> Result<EngineHandle, ConfigError> {
        let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();
        if let Some(url) = &config.notify.webhook_url {
            let webhook = WebhookNotifier::new(url.clone())
                .map_err(|e| ConfigError::InvalidNotifier(e.to_string()))?;
            notifiers.push(Arc::new(webhook));
        } else {
            info!("no notifier configured, alerts will only be logged");
        }
        Self::start_with(config, Arc::new(HttpFetcher::new()), notifiers)
    }

    /// Same as [`Engine::start`] but with explicit transport and sinks, the
    /// seam used by tests.
    pub fn start_with(
        config: Config,
        fetcher: Arc<dyn Fetch>,
        notifiers: Vec<Arc<dyn Notifier>>,
    ) -> Result<EngineHandle, ConfigError> {
        config.validate()?;
        let settings = config.settings();
        let store = Arc::new(MetricStore::new(settings.retention));
        let rules = Arc::new(Mutex::new(RuleSet::from_configs(&config.rule_configs())?));

        let (shutdown_tx, _) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::channel(settings.event_queue_capacity);

        let evaluator = Evaluator::new(
            store.clone(),
            rules.clone(),
            events_tx,
            settings.evaluation_interval,
            settings.look_back,
        );
        let dispatcher = Dispatcher::new(
            events_rx,
            notifiers,
            settings.notify_max_attempts,
            settings.notify_backoff,
        );
        let core_tasks = vec![
            tokio::spawn(evaluator.run(shutdown_tx.subscribe())),
            tokio::spawn(dispatcher.run(shutdown_tx.subscribe())),
        ];

        let handle = EngineHandle {
            store,
            rules,
            settings,
            fetcher,
            scrapers: Mutex::new(AHashMap::new()),
            shutdown_tx,
            core_tasks: Mutex::new(core_tasks),
        };
        for (job, target) in &config.targets {
            handle.spawn_scraper(job.clone(), target.clone());
        }
        info!(
            targets = config.targets.len(),
            rules = handle.rules.lock().unwrap().rule_count(),
            "engine started"
        );
        Ok(handle)
    }
}

/// Live handle onto a running engine: the query surface, configuration
/// reload and shutdown.
pub struct EngineHandle {
    store: Arc<MetricStore>,
    rules: Arc<Mutex<RuleSet>>,
    settings: Settings,
    fetcher: Arc<dyn Fetch>,
    scrapers: Mutex<AHashMap<String, ScraperEntry>>,
    shutdown_tx: watch::Sender<bool>,
    core_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EngineHandle {
    pub fn store(&self) -> &Arc<MetricStore> {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The external query surface: samples of every series matching
    /// `selector` within `[start, end]`.
    pub fn query(
        &self,
        selector: &str,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<SeriesData>, TsdbError> {
        let selector = parse_selector(selector)
            .map_err(|e| TsdbError::InvalidSeriesSelector(e.to_string()))?;
        self.store.query(&selector_matchers(&selector), start, end)
    }

    /// Current health snapshot of every scrape target.
    pub fn target_states(&self) -> Vec<(String, TargetState)> {
        let scrapers = self.scrapers.lock().unwrap();
        let mut out: Vec<(String, TargetState)> = scrapers
            .iter()
            .map(|(job, entry)| (job.clone(), entry.state.read().unwrap().clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Applies a new configuration: swaps the rule set (state is kept for
    /// unchanged rules) and diffs the target list, stopping removed targets,
    /// starting added ones and restarting changed ones.
    pub fn reload(&self, config: Config) -> Result<(), ConfigError> {
        config.validate()?;
        let new_rules = RuleSet::from_configs(&config.rule_configs())?;
        self.rules.lock().unwrap().update_with(new_rules);

        let mut to_spawn: Vec<(String, TargetConfig)> = Vec::new();
        {
            let mut scrapers = self.scrapers.lock().unwrap();
            scrapers.retain(|job, entry| match config.targets.get(job) {
                Some(target) if *target == entry.config => true,
                Some(_) => {
                    info!(job = %job, "target changed, restarting scrape loop");
                    let _ = entry.cancel.send(true);
                    false
                }
                None => {
                    info!(job = %job, "target removed, stopping scrape loop");
                    let _ = entry.cancel.send(true);
                    false
                }
            });
            for (job, target) in &config.targets {
                if !scrapers.contains_key(job) {
                    to_spawn.push((job.clone(), target.clone()));
                }
            }
        }
        for (job, target) in to_spawn {
            self.spawn_scraper(job, target);
        }
        info!("configuration reloaded");
        Ok(())
    }

    /// Stops new scrapes and evaluation ticks, then waits up to `grace` for
    /// in-flight work before abandoning it.
    pub async fn shutdown(&self, grace: Duration) {
        info!("shutting down");
        let _ = self.shutdown_tx.send(true);

        let mut handles: Vec<JoinHandle<()>> = self.core_tasks.lock().unwrap().drain(..).collect();
        {
            let mut scrapers = self.scrapers.lock().unwrap();
            for (_, entry) in scrapers.drain() {
                let _ = entry.cancel.send(true);
                handles.push(entry.handle);
            }
        }

        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        if tokio::time::timeout(grace, join_all(handles)).await.is_err() {
            warn!("grace period elapsed, aborting remaining tasks");
            for abort in aborts {
                abort.abort();
            }
        }
    }

    fn spawn_scraper(&self, job: String, target: TargetConfig) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = ScrapeTask::new(
            job.clone(),
            target.clone(),
            &self.settings,
            self.store.clone(),
            self.fetcher.clone(),
        );
        let state = task.state();
        let handle = tokio::spawn(task.run(cancel_rx));
        let entry = ScraperEntry {
            config: target,
            cancel: cancel_tx,
            handle,
            state,
        };
        self.scrapers.lock().unwrap().insert(job, entry);
    }
}
