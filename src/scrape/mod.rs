mod parse;
mod scraper;
mod target;

pub use parse::parse_exposition;
pub use scraper::{Fetch, HttpFetcher, ScrapeTask};
pub use target::{TargetConfig, TargetHealth, TargetState};

use thiserror::Error;

/// Label attached to every scraped sample identifying the target's job.
pub static JOB_LABEL: &str = "job";
/// Label attached to every scraped sample identifying the scraped address.
pub static INSTANCE_LABEL: &str = "instance";
/// Synthetic per-target health series, `1` while up and `0` once down.
pub static UP_METRIC_NAME: &str = "up";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScrapeError {
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("scrape timed out after {0}ms")]
    Timeout(u64),

    #[error("malformed exposition line {line_no}: {reason}")]
    Malformed { line_no: usize, reason: String },
}

pub type ScrapeResult<T> = Result<T, ScrapeError>;
