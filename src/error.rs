use thiserror::Error;

use crate::common::types::Timestamp;

/// Enum for various errors in the time-series store.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TsdbError {
    #[error("out of order sample: timestamp {attempted} <= last stored {last}")]
    OutOfOrderSample { last: Timestamp, attempted: Timestamp },

    #[error("invalid metric name {0:?}")]
    InvalidMetricName(String),

    #[error("series must carry a metric name label")]
    MissingMetricName,

    #[error("invalid series selector: {0}")]
    InvalidSeriesSelector(String),

    #[error("invalid timestamp range: start {start} > end {end}")]
    InvalidRange { start: Timestamp, end: Timestamp },
}

pub type TsdbResult<T> = Result<T, TsdbError>;
