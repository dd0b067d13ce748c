mod store;
mod time_series;

pub use store::{MetricStore, SeriesData};
pub use time_series::TimeSeries;
