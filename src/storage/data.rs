use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Invalid source name: {0}")]
    InvalidSourceName(String),
    #[error("Invalid metric name: {0}")]
    InvalidMetricName(String),
    #[error("Invalid value: {0}")]
    InvalidValue(f64),
}

/// A single sample in a time series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Timestamp, unit chosen by the writer
    pub timestamp: i64,
    pub value: f64,
}

impl Point {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// A point associated with a source and metric.
///
/// Rows are the atomic unit accepted by the write path and the unit
/// persisted in every write-ahead log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub source: String,
    pub metric: String,
    #[serde(flatten)]
    pub point: Point,
}

impl Row {
    /// Creates a new Row for the given source and metric
    pub fn new(source: impl Into<String>, metric: impl Into<String>, point: Point) -> Self {
        Self {
            source: source.into(),
            metric: metric.into(),
            point,
        }
    }

    /// Returns the timestamp of the row's point
    pub fn timestamp(&self) -> i64 {
        self.point.timestamp
    }

    /// Validates names and value of the row
    pub fn validate(&self) -> Result<(), DataError> {
        if self.source.is_empty() {
            return Err(DataError::InvalidSourceName(
                "Source name cannot be empty".to_string(),
            ));
        }
        if self.metric.is_empty() {
            return Err(DataError::InvalidMetricName(
                "Metric name cannot be empty".to_string(),
            ));
        }
        if !self.point.value.is_finite() {
            return Err(DataError::InvalidValue(self.point.value));
        }

        Ok(())
    }
}
