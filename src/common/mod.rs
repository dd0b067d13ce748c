pub mod duration;
pub mod hash;
pub mod types;

use std::sync::OnceLock;

use regex::Regex;

/// Label under which the metric name of a series is stored.
pub static METRIC_NAME_LABEL: &str = "__name__";

static METRIC_NAME_RE: OnceLock<Regex> = OnceLock::new();

pub fn metric_name_regex() -> &'static Regex {
    METRIC_NAME_RE.get_or_init(|| Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").unwrap())
}

pub fn is_valid_metric_name(name: &str) -> bool {
    metric_name_regex().is_match(name)
}

/// Wall clock in milliseconds since the Unix epoch.
pub fn current_time_millis() -> types::Timestamp {
    chrono::Utc::now().timestamp_millis()
}
