//! Query module for Tessera
//! Range queries over (source, metric) pairs, fanned out across partitions.

pub mod executor;
pub mod planner;

use serde::{Deserialize, Serialize};

use crate::storage::data::Point;

pub use executor::{QueryConfig, QueryExecutor};
pub use planner::TimeRange;

/// A single requested range for one source and metric
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDesc {
    pub source: String,
    pub metric: String,
    /// Inclusive
    pub start: i64,
    /// Inclusive
    pub end: i64,
}

impl QueryDesc {
    pub fn new(source: impl Into<String>, metric: impl Into<String>, start: i64, end: i64) -> Self {
        Self {
            source: source.into(),
            metric: metric.into(),
            start,
            end,
        }
    }

    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.start, self.end)
    }
}

/// Points returned for one [`QueryDesc`].
///
/// `start` and `end` are the first and last timestamps actually
/// returned, not the requested range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub start: i64,
    pub end: i64,
    pub source: String,
    pub metric: String,
    pub points: Vec<Point>,
}

impl Series {
    /// Builds a series from a non-empty point sequence
    pub fn from_points(source: String, metric: String, points: Vec<Point>) -> Option<Self> {
        let start = points.first()?.timestamp;
        let end = points.last()?.timestamp;
        Some(Self {
            start,
            end,
            source,
            metric,
            points,
        })
    }
}

/// One series per query description that matched at least one point
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub series: Vec<Series>,
}

impl QueryResponse {
    /// Finds the series of a source and metric
    pub fn get(&self, source: &str, metric: &str) -> Option<&Series> {
        self.series
            .iter()
            .find(|series| series.source == source && series.metric == metric)
    }
}
