use async_trait::async_trait;

use crate::notify::NotifyResult;
use crate::rules::AlertEvent;

/// Notifier is a common interface for alert delivery providers.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers a single alert state change. Returns an error if delivery
    /// fails; the dispatcher owns retries.
    async fn notify(&self, event: &AlertEvent) -> NotifyResult<()>;
    /// Address alerts are delivered to, for logging.
    fn addr(&self) -> String;
}

/// NullNotifier is a notifier that does nothing.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _event: &AlertEvent) -> NotifyResult<()> {
        Ok(())
    }

    fn addr(&self) -> String {
        "null".to_string()
    }
}
