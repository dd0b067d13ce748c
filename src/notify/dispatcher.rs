use std::sync::Arc;
use std::time::Duration;

use ahash::AHashSet;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::notify::Notifier;
use crate::rules::AlertEvent;

/// Routes alert events to the configured notifiers.
///
/// The dispatcher is the dedup point: per (rule, label set) instance it
/// forwards the first firing event and then suppresses repeats until a
/// resolution arrives, so a sink never sees two consecutive firing
/// notifications for the same instance. Delivery is at-least-once with
/// bounded backoff; a sink that keeps failing costs a logged error, never a
/// stalled evaluator.
pub struct Dispatcher {
    events_rx: mpsc::Receiver<AlertEvent>,
    notifiers: Vec<Arc<dyn Notifier>>,
    /// Instances whose firing notification has been forwarded.
    forwarded: AHashSet<u64>,
    max_attempts: u32,
    backoff: Duration,
}

impl Dispatcher {
    pub fn new(
        events_rx: mpsc::Receiver<AlertEvent>,
        notifiers: Vec<Arc<dyn Notifier>>,
        max_attempts: u32,
        backoff: Duration,
    ) -> Self {
        Dispatcher {
            events_rx,
            notifiers,
            forwarded: AHashSet::new(),
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(notifiers = self.notifiers.len(), "notifier dispatcher started");
        loop {
            tokio::select! {
                event = self.events_rx.recv() => {
                    match event {
                        Some(event) => self.handle(event).await,
                        None => {
                            debug!("event channel closed, dispatcher exiting");
                            return;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    // drain whatever the evaluator already queued
                    while let Ok(event) = self.events_rx.try_recv() {
                        self.handle(event).await;
                    }
                    debug!("notifier dispatcher stopped");
                    return;
                }
            }
        }
    }

    /// Applies dedup and, when the event represents a state change, delivers
    /// it to every notifier. Exposed for tests.
    pub async fn handle(&mut self, event: AlertEvent) {
        let id = event.alert().id;
        let forward = match &event {
            AlertEvent::Firing(_) => self.forwarded.insert(id),
            // a resolution only makes sense for an instance we reported
            AlertEvent::Resolved(_) => self.forwarded.remove(&id),
        };
        if !forward {
            debug!(alert = %event.alert().name, status = event.status(), "suppressed duplicate event");
            return;
        }
        self.deliver(&event).await;
    }

    async fn deliver(&self, event: &AlertEvent) {
        join_all(
            self.notifiers
                .iter()
                .map(|notifier| self.deliver_to(notifier.as_ref(), event)),
        )
        .await;
    }

    async fn deliver_to(&self, notifier: &dyn Notifier, event: &AlertEvent) {
        let mut delay = self.backoff;
        for attempt in 1..=self.max_attempts {
            match notifier.notify(event).await {
                Ok(()) => {
                    debug!(
                        alert = %event.alert().name,
                        status = event.status(),
                        addr = %notifier.addr(),
                        "notification delivered"
                    );
                    return;
                }
                Err(err) if attempt < self.max_attempts => {
                    warn!(
                        alert = %event.alert().name,
                        addr = %notifier.addr(),
                        attempt,
                        error = %err,
                        "notification failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(err) => {
                    error!(
                        alert = %event.alert().name,
                        addr = %notifier.addr(),
                        attempts = self.max_attempts,
                        error = %err,
                        "notification dropped after retries"
                    );
                }
            }
        }
    }
}
