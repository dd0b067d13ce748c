use ahash::AHashMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::common::types::Timestamp;
use crate::notify::{Notifier, NotifyError, NotifyResult};
use crate::rules::AlertEvent;

/// The JSON document POSTed to the configured webhook for every alert state
/// change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookPayload {
    /// `firing` or `resolved`.
    pub status: String,
    pub alert: String,
    pub labels: AHashMap<String, String>,
    pub annotations: AHashMap<String, String>,
    /// Expression value at the last evaluation.
    pub value: f64,
    /// RFC 3339 instant the alert became active.
    pub starts_at: String,
    /// RFC 3339 instant the alert resolved; absent while firing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<String>,
    /// The expression that produced the alert.
    pub generator: String,
}

impl WebhookPayload {
    pub fn from_event(event: &AlertEvent) -> Self {
        let alert = event.alert();
        WebhookPayload {
            status: event.status().to_string(),
            alert: alert.name.clone(),
            labels: alert.labels.clone(),
            annotations: alert.annotations.clone(),
            value: alert.value,
            starts_at: rfc3339(alert.active_at),
            ends_at: match event {
                AlertEvent::Resolved(alert) => Some(rfc3339(alert.resolved_at)),
                AlertEvent::Firing(_) => None,
            },
            generator: alert.expr.clone(),
        }
    }
}

fn rfc3339(ts: Timestamp) -> String {
    DateTime::<Utc>::from_timestamp_millis(ts)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

/// Delivers alert state changes as HTTP POSTs of [`WebhookPayload`] JSON.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> NotifyResult<Self> {
        let url = url.into();
        reqwest::Url::parse(&url).map_err(|_| NotifyError::InvalidUrl(url.clone()))?;
        Ok(WebhookNotifier {
            url,
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &AlertEvent) -> NotifyResult<()> {
        let payload = WebhookPayload::from_event(event);
        self.client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        Ok(())
    }

    fn addr(&self) -> String {
        self.url.clone()
    }
}
