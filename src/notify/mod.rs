mod dispatcher;
mod notifier;
mod webhook;

pub use dispatcher::Dispatcher;
pub use notifier::{Notifier, NullNotifier};
pub use webhook::{WebhookNotifier, WebhookPayload};

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum NotifyError {
    #[error("invalid webhook url {0:?}")]
    InvalidUrl(String),

    #[error("delivery failed: {0}")]
    Delivery(String),
}

pub type NotifyResult<T> = Result<T, NotifyError>;
