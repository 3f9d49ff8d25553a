use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use crate::storage::data::Point;

/// What happened to a point handed to [`MemoryMetric::insert_point`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Newer than every stored point
    Appended,
    /// Placed between existing points
    Inserted,
    /// Replaced the value of a point with the same timestamp
    Overwritten,
}

impl InsertOutcome {
    /// Returns true if the metric grew by one point
    pub fn added(self) -> bool {
        !matches!(self, InsertOutcome::Overwritten)
    }
}

#[derive(Debug, Default)]
struct MetricPoints {
    /// Strictly ascending by timestamp
    points: Vec<Point>,
    /// Index of the most recently written point
    last_insert_index: usize,
}

impl MetricPoints {
    fn insert(&mut self, point: Point) -> InsertOutcome {
        let ts = point.timestamp;
        let len = self.points.len();

        if len == 0 || self.points[len - 1].timestamp < ts {
            self.points.push(point);
            self.last_insert_index = len;
            return InsertOutcome::Appended;
        }

        // Search only the side of the hint the timestamp falls on
        let hint = self.last_insert_index.min(len - 1);
        let position = if self.points[hint].timestamp <= ts {
            self.points[hint..]
                .binary_search_by_key(&ts, |p| p.timestamp)
                .map(|i| i + hint)
                .map_err(|i| i + hint)
        } else {
            self.points[..hint].binary_search_by_key(&ts, |p| p.timestamp)
        };

        match position {
            Ok(i) => {
                self.points[i].value = point.value;
                self.last_insert_index = i;
                InsertOutcome::Overwritten
            }
            Err(i) => {
                self.points.insert(i, point);
                self.last_insert_index = i;
                InsertOutcome::Inserted
            }
        }
    }
}

/// The ordered points of one metric of one source.
///
/// A point whose timestamp is already present overwrites the stored
/// value, so timestamps stay unique.
#[derive(Debug)]
pub struct MemoryMetric {
    name: String,
    inner: Mutex<MetricPoints>,
}

impl MemoryMetric {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(MetricPoints::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Inserts a single point, keeping the sequence sorted
    pub fn insert_point(&self, point: Point) -> InsertOutcome {
        self.inner.lock().insert(point)
    }

    /// Returns the points with timestamps in `[start, end]`
    pub fn fetch(&self, start: i64, end: i64) -> Vec<Point> {
        if start > end {
            return Vec::new();
        }

        let inner = self.inner.lock();
        let from = inner.points.partition_point(|p| p.timestamp < start);
        inner.points[from..]
            .iter()
            .take_while(|p| p.timestamp <= end)
            .copied()
            .collect()
    }

    /// Returns a copy of every stored point
    pub fn points(&self) -> Vec<Point> {
        self.inner.lock().points.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The metrics of one source, created lazily
#[derive(Debug)]
pub struct MemorySource {
    name: String,
    metrics: RwLock<HashMap<String, Arc<MemoryMetric>>>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metrics: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the named metric, creating it if this is the first writer
    pub fn get_or_create_metric(&self, name: &str) -> Arc<MemoryMetric> {
        if let Some(metric) = self.metrics.read().get(name) {
            return Arc::clone(metric);
        }

        let mut metrics = self.metrics.write();
        Arc::clone(
            metrics
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(MemoryMetric::new(name))),
        )
    }

    pub fn metric(&self, name: &str) -> Option<Arc<MemoryMetric>> {
        self.metrics.read().get(name).cloned()
    }

    pub fn metric_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.metrics.read().keys().cloned().collect();
        names.sort();
        names
    }
}
