use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::observe::EventSink;
use crate::storage::data::{Point, Row};
use crate::storage::partition::metric::MemorySource;
use crate::storage::partition::{Partition, PartitionError};
use crate::storage::wal::{Wal, WalEntry, WalOperation};

/// Name reported for a partition with no WAL attached
const DETACHED_NAME: &str = "memory";

struct PartitionState {
    read_only: bool,
    wal: Option<Arc<dyn Wal>>,
}

impl PartitionState {
    fn name(&self) -> String {
        self.wal
            .as_ref()
            .map(|wal| wal.filename())
            .unwrap_or_else(|| DETACHED_NAME.to_string())
    }
}

/// A writable partition held in memory and backed by a write-ahead log.
///
/// Locks are taken narrowest-last: the state lock (read-only flag and
/// WAL) only around the durability step, then the source map, the
/// source's metric map and finally the metric itself. Time bounds are
/// maintained with compare-and-swap outside of that hierarchy.
pub struct MemoryPartition {
    state: RwLock<PartitionState>,
    /// `i64::MAX` until the first row arrives
    min_ts: AtomicI64,
    /// `i64::MIN` until the first row arrives
    max_ts: AtomicI64,
    num_points: AtomicUsize,
    sources: RwLock<HashMap<String, Arc<MemorySource>>>,
    sink: Arc<dyn EventSink>,
}

impl MemoryPartition {
    /// Creates an empty partition logging to `wal`
    pub fn new(wal: Arc<dyn Wal>, sink: Arc<dyn EventSink>) -> Self {
        Self::with_state(Some(wal), sink)
    }

    /// Creates an empty partition without a WAL; inserts are not durable
    pub fn detached(sink: Arc<dyn EventSink>) -> Self {
        Self::with_state(None, sink)
    }

    fn with_state(wal: Option<Arc<dyn Wal>>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            state: RwLock::new(PartitionState {
                read_only: false,
                wal,
            }),
            min_ts: AtomicI64::new(i64::MAX),
            max_ts: AtomicI64::new(i64::MIN),
            num_points: AtomicUsize::new(0),
            sources: RwLock::new(HashMap::new()),
            sink,
        }
    }

    /// Rebuilds a partition by replaying every entry of `wal`.
    ///
    /// Entries are applied through the regular insert path while no WAL
    /// is attached, so nothing is appended twice. Once the log is
    /// exhausted it is truncated and attached for future inserts.
    pub fn recover(wal: Arc<dyn Wal>, sink: Arc<dyn EventSink>) -> Result<Self, PartitionError> {
        let partition = Self::detached(sink);
        let mut entries = 0;
        let mut rows = 0;

        while let Some(entry) = wal.read_entry()? {
            match entry.operation {
                WalOperation::Insert => partition.insert_rows(&entry.rows)?,
            }
            entries += 1;
            rows += entry.rows.len();
        }

        wal.truncate()?;
        let name = wal.filename();
        partition.state.write().wal = Some(wal);
        partition.sink.wal_replayed(&name, entries, rows);

        Ok(partition)
    }

    /// Inserts rows, logging them to the WAL first.
    ///
    /// Nothing is applied to memory unless the WAL append succeeded. A
    /// batch holding a NaN or infinite value is rejected as a whole, since
    /// the log could not replay it.
    pub fn insert_rows(&self, rows: &[Row]) -> Result<(), PartitionError> {
        if let Err(error) = self.log_rows(rows) {
            self.sink.insert_rejected(&self.filename(), &error);
            return Err(error);
        }
        if rows.is_empty() {
            return Ok(());
        }

        let mut min_ts = i64::MAX;
        let mut max_ts = i64::MIN;
        let mut added = 0;

        for row in rows {
            min_ts = min_ts.min(row.timestamp());
            max_ts = max_ts.max(row.timestamp());

            let source = self.get_or_create_source(&row.source);
            let metric = source.get_or_create_metric(&row.metric);
            if metric.insert_point(row.point).added() {
                added += 1;
            }
        }

        self.num_points.fetch_add(added, Ordering::Relaxed);
        self.widen_bounds(min_ts, max_ts);
        self.sink.rows_inserted(&self.filename(), rows.len());

        Ok(())
    }

    /// Read-only check and durability step, under the shared state lock
    fn log_rows(&self, rows: &[Row]) -> Result<(), PartitionError> {
        let state = self.state.read();
        if state.read_only {
            return Err(PartitionError::ReadOnly);
        }
        if rows.is_empty() {
            return Ok(());
        }
        if let Some(row) = rows.iter().find(|row| !row.point.value.is_finite()) {
            return Err(PartitionError::NonFiniteValue {
                series: format!("{}/{}", row.source, row.metric),
                timestamp: row.timestamp(),
            });
        }
        if let Some(wal) = &state.wal {
            wal.append(&WalEntry::insert(rows.to_vec()))?;
        }
        Ok(())
    }

    fn widen_bounds(&self, min_ts: i64, max_ts: i64) {
        let mut current = self.min_ts.load(Ordering::Acquire);
        while min_ts < current {
            match self.min_ts.compare_exchange_weak(
                current,
                min_ts,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let mut current = self.max_ts.load(Ordering::Acquire);
        while max_ts > current {
            match self.max_ts.compare_exchange_weak(
                current,
                max_ts,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    fn get_or_create_source(&self, name: &str) -> Arc<MemorySource> {
        if let Some(source) = self.sources.read().get(name) {
            return Arc::clone(source);
        }

        let mut sources = self.sources.write();
        Arc::clone(
            sources
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(MemorySource::new(name))),
        )
    }

    fn source(&self, name: &str) -> Option<Arc<MemorySource>> {
        self.sources.read().get(name).cloned()
    }

    /// Stops accepting inserts; the partition stays queryable
    pub fn set_read_only(&self) {
        self.state.write().read_only = true;
    }

    pub fn is_read_only(&self) -> bool {
        self.state.read().read_only
    }

    /// Marks the partition read-only and destroys its WAL
    pub fn destroy(&self) -> Result<(), PartitionError> {
        let mut state = self.state.write();
        state.read_only = true;
        if let Some(wal) = &state.wal {
            wal.destroy()?;
        }
        state.wal = None;
        Ok(())
    }

    /// Names of every source, sorted
    pub fn sources(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of every metric of `source`, sorted
    pub fn metrics(&self, source: &str) -> Vec<String> {
        self.source(source)
            .map(|source| source.metric_names())
            .unwrap_or_default()
    }

    pub fn has_source(&self, source: &str) -> bool {
        self.sources.read().contains_key(source)
    }

    pub fn has_metric(&self, source: &str, metric: &str) -> bool {
        self.source(source)
            .map(|source| source.metric(metric).is_some())
            .unwrap_or(false)
    }

    /// Number of distinct points held
    pub fn num_points(&self) -> usize {
        self.num_points.load(Ordering::Relaxed)
    }
}

impl Partition for MemoryPartition {
    fn min_timestamp(&self) -> i64 {
        self.min_ts.load(Ordering::Acquire)
    }

    fn max_timestamp(&self) -> i64 {
        self.max_ts.load(Ordering::Acquire)
    }

    fn filename(&self) -> String {
        self.state.read().name()
    }

    fn fetch_points(
        &self,
        source: &str,
        metric: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<Point>, PartitionError> {
        Ok(self
            .source(source)
            .and_then(|source| source.metric(metric))
            .map(|metric| metric.fetch(start, end))
            .unwrap_or_default())
    }
}

impl fmt::Debug for MemoryPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPartition")
            .field("filename", &self.filename())
            .field("read_only", &self.is_read_only())
            .field("min_ts", &self.min_timestamp())
            .field("max_ts", &self.max_timestamp())
            .field("num_points", &self.num_points())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::testing::RecordingSink;
    use crate::observe::NoopSink;
    use crate::storage::wal::{FileWal, MemoryWal, WalConfig, WalError};
    use std::thread;
    use tempfile::tempdir;

    fn rows(source: &str, metric: &str, timestamps: impl IntoIterator<Item = i64>) -> Vec<Row> {
        timestamps
            .into_iter()
            .map(|ts| Row::new(source, metric, Point::new(ts, ts as f64)))
            .collect()
    }

    fn timestamps(partition: &MemoryPartition, source: &str, metric: &str) -> Vec<i64> {
        partition
            .fetch_points(source, metric, i64::MIN, i64::MAX)
            .unwrap()
            .iter()
            .map(|p| p.timestamp)
            .collect()
    }

    #[test]
    fn test_insert_and_fetch() {
        let wal = Arc::new(MemoryWal::new("p1"));
        let partition = MemoryPartition::new(wal.clone(), Arc::new(NoopSink));

        partition.insert_rows(&rows("a", "cpu", 1..=5)).unwrap();
        partition.insert_rows(&rows("a", "mem", [3])).unwrap();
        partition.insert_rows(&rows("b", "cpu", [9])).unwrap();

        assert_eq!(wal.len(), 3);
        assert_eq!(partition.min_timestamp(), 1);
        assert_eq!(partition.max_timestamp(), 9);
        assert_eq!(partition.num_points(), 7);
        assert_eq!(partition.filename(), "p1");

        let points = partition.fetch_points("a", "cpu", 2, 4).unwrap();
        assert_eq!(
            points,
            vec![Point::new(2, 2.0), Point::new(3, 3.0), Point::new(4, 4.0)]
        );
        assert!(partition.fetch_points("c", "cpu", 0, 10).unwrap().is_empty());
        assert!(partition.fetch_points("a", "disk", 0, 10).unwrap().is_empty());

        assert_eq!(partition.sources(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(partition.metrics("a"), vec!["cpu".to_string(), "mem".to_string()]);
        assert!(partition.has_metric("b", "cpu"));
        assert!(!partition.has_metric("b", "mem"));
        assert!(!partition.has_source("c"));
    }

    #[test]
    fn test_unordered_batch_stays_sorted() {
        let partition = MemoryPartition::detached(Arc::new(NoopSink));
        partition
            .insert_rows(&rows("a", "cpu", [50, 10, 40, 20, 30, 20]))
            .unwrap();

        assert_eq!(timestamps(&partition, "a", "cpu"), vec![10, 20, 30, 40, 50]);
        assert_eq!(partition.num_points(), 5);
        assert_eq!(partition.filename(), "memory");
    }

    #[test]
    fn test_empty_partition_bounds() {
        let partition = MemoryPartition::detached(Arc::new(NoopSink));
        partition.insert_rows(&[]).unwrap();
        assert_eq!(partition.min_timestamp(), i64::MAX);
        assert_eq!(partition.max_timestamp(), i64::MIN);

        partition.insert_rows(&rows("a", "cpu", [-5])).unwrap();
        assert_eq!(partition.min_timestamp(), -5);
        assert_eq!(partition.max_timestamp(), -5);
    }

    #[test]
    fn test_empty_batch_writes_no_wal_entry() {
        let wal = Arc::new(MemoryWal::new("p1"));
        let partition = MemoryPartition::new(wal.clone(), Arc::new(NoopSink));
        partition.insert_rows(&[]).unwrap();
        assert!(wal.is_empty());
    }

    #[test]
    fn test_read_only_rejects_inserts() {
        let wal = Arc::new(MemoryWal::new("p1"));
        let sink = Arc::new(RecordingSink::default());
        let partition = MemoryPartition::new(wal.clone(), sink.clone());
        partition.insert_rows(&rows("a", "cpu", [1, 2])).unwrap();

        partition.set_read_only();
        assert!(partition.is_read_only());

        let result = partition.insert_rows(&rows("a", "cpu", [3]));
        assert!(matches!(result, Err(PartitionError::ReadOnly)));
        assert_eq!(
            result.unwrap_err().to_string(),
            "partition/memory: read only"
        );
        assert!(matches!(
            partition.insert_rows(&[]),
            Err(PartitionError::ReadOnly)
        ));

        assert_eq!(timestamps(&partition, "a", "cpu"), vec![1, 2]);
        assert_eq!(partition.max_timestamp(), 2);
        assert_eq!(wal.len(), 1);
        assert_eq!(sink.rejected.lock().len(), 2);

        // Still queryable
        assert_eq!(partition.fetch_points("a", "cpu", 2, 2).unwrap().len(), 1);
    }

    #[test]
    fn test_wal_failure_leaves_memory_untouched() {
        let wal = Arc::new(MemoryWal::new("p1"));
        let partition = MemoryPartition::new(wal.clone(), Arc::new(NoopSink));
        partition.insert_rows(&rows("a", "cpu", [1])).unwrap();

        wal.fail_appends(true);
        let result = partition.insert_rows(&rows("a", "cpu", [2, 3]));
        assert!(matches!(result, Err(PartitionError::Wal(WalError::Io(_)))));

        assert_eq!(timestamps(&partition, "a", "cpu"), vec![1]);
        assert_eq!(partition.max_timestamp(), 1);
        assert!(!partition.has_metric("b", "cpu"));
        assert_eq!(partition.num_points(), 1);
    }

    #[test]
    fn test_recover_replays_wal_and_truncates() {
        let wal = Arc::new(MemoryWal::new("p1"));
        {
            let partition = MemoryPartition::new(wal.clone(), Arc::new(NoopSink));
            partition.insert_rows(&rows("a", "cpu", [1, 2, 3])).unwrap();
            partition.insert_rows(&rows("b", "mem", [10])).unwrap();
            partition
                .insert_rows(&[Row::new("a", "cpu", Point::new(2, 99.0))])
                .unwrap();
            // Simulated crash: partition dropped without any cleanup
        }
        assert_eq!(wal.len(), 3);

        let sink = Arc::new(RecordingSink::default());
        let recovered = MemoryPartition::recover(wal.clone(), sink.clone()).unwrap();

        assert!(wal.is_empty());
        assert_eq!(*sink.replayed.lock(), vec![(3, 5)]);
        assert_eq!(
            recovered.fetch_points("a", "cpu", 0, 10).unwrap(),
            vec![Point::new(1, 1.0), Point::new(2, 99.0), Point::new(3, 3.0)]
        );
        assert_eq!(timestamps(&recovered, "b", "mem"), vec![10]);
        assert_eq!(recovered.min_timestamp(), 1);
        assert_eq!(recovered.max_timestamp(), 10);

        // The recovered partition logs new inserts to the same WAL
        recovered.insert_rows(&rows("a", "cpu", [4])).unwrap();
        assert_eq!(wal.len(), 1);
        assert_eq!(recovered.filename(), "p1");
    }

    #[test]
    fn test_non_finite_values_never_reach_the_wal() {
        let wal = Arc::new(MemoryWal::new("p1"));
        let sink = Arc::new(RecordingSink::default());
        let partition = MemoryPartition::new(wal.clone(), sink.clone());

        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let batch = vec![
                Row::new("a", "cpu", Point::new(5, 5.0)),
                Row::new("a", "cpu", Point::new(1, value)),
            ];
            let result = partition.insert_rows(&batch);
            assert!(matches!(
                result,
                Err(PartitionError::NonFiniteValue { timestamp: 1, .. })
            ));
        }
        assert!(wal.is_empty());
        assert_eq!(partition.num_points(), 0);
        assert_eq!(partition.min_timestamp(), i64::MAX);
        assert_eq!(sink.rejected.lock().len(), 3);

        partition.insert_rows(&rows("a", "cpu", [2])).unwrap();
        drop(partition);

        let recovered = MemoryPartition::recover(wal.clone(), Arc::new(NoopSink)).unwrap();
        assert_eq!(
            recovered.fetch_points("a", "cpu", 0, 10).unwrap(),
            vec![Point::new(2, 2.0)]
        );
    }

    #[test]
    fn test_recover_surfaces_read_errors() {
        let wal = Arc::new(MemoryWal::new("p1"));
        let partition = MemoryPartition::new(wal.clone(), Arc::new(NoopSink));
        partition.insert_rows(&rows("a", "cpu", [1])).unwrap();
        partition.insert_rows(&rows("a", "cpu", [2])).unwrap();
        drop(partition);

        wal.fail_read_at(Some(1));
        let result = MemoryPartition::recover(wal.clone(), Arc::new(NoopSink));
        assert!(matches!(
            result,
            Err(PartitionError::Wal(WalError::InvalidEntry(_)))
        ));
        // Not truncated, so a later recovery can still replay everything
        assert_eq!(wal.len(), 2);

        wal.fail_read_at(None);
        wal.rewind();
        let recovered = MemoryPartition::recover(wal.clone(), Arc::new(NoopSink)).unwrap();
        assert_eq!(timestamps(&recovered, "a", "cpu"), vec![1, 2]);
    }

    #[test]
    fn test_recover_from_file_wal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partition.wal");

        {
            let wal = Arc::new(FileWal::open(&path, WalConfig::default()).unwrap());
            let partition = MemoryPartition::new(wal, Arc::new(NoopSink));
            for ts in 0..20 {
                partition.insert_rows(&rows("host", "load", [ts])).unwrap();
            }
        }

        let wal = Arc::new(FileWal::open(&path, WalConfig::default()).unwrap());
        let recovered = MemoryPartition::recover(wal, Arc::new(NoopSink)).unwrap();
        assert_eq!(timestamps(&recovered, "host", "load"), (0..20).collect::<Vec<_>>());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
        assert_eq!(recovered.filename(), path.display().to_string());
    }

    #[test]
    fn test_destroy_removes_wal() {
        let dir = tempdir().unwrap();
        let wal = Arc::new(FileWal::create_in(dir.path(), WalConfig::default()).unwrap());
        let path = wal.path().to_path_buf();
        let partition = MemoryPartition::new(wal, Arc::new(NoopSink));
        partition.insert_rows(&rows("a", "cpu", [1])).unwrap();

        partition.destroy().unwrap();
        assert!(!path.exists());
        assert!(partition.is_read_only());
        assert!(matches!(
            partition.insert_rows(&rows("a", "cpu", [2])),
            Err(PartitionError::ReadOnly)
        ));
        // Destroying again is a no-op
        partition.destroy().unwrap();
    }

    #[test]
    fn test_concurrent_inserts_to_disjoint_metrics() {
        let wal = Arc::new(MemoryWal::new("p1"));
        let partition = Arc::new(MemoryPartition::new(wal.clone(), Arc::new(NoopSink)));
        let writers = 8;
        let batches = 50;

        thread::scope(|scope| {
            for writer in 0..writers {
                let partition = Arc::clone(&partition);
                scope.spawn(move || {
                    let metric = format!("m{}", writer);
                    for batch in 0..batches {
                        // Descending batches force mid-sequence inserts
                        let base = (batches - batch) * 10;
                        let batch_rows = rows("shared", &metric, (base..base + 10).rev());
                        partition.insert_rows(&batch_rows).unwrap();
                    }
                });
            }
        });

        assert_eq!(wal.len(), (writers * batches) as usize);
        for writer in 0..writers {
            let metric = format!("m{}", writer);
            let got = timestamps(&partition, "shared", &metric);
            assert_eq!(got, (10..510).collect::<Vec<i64>>());
        }
        assert_eq!(partition.num_points(), (writers * 500) as usize);
    }

    #[test]
    fn test_concurrent_bounds_match_extremes() {
        let partition = Arc::new(MemoryPartition::detached(Arc::new(NoopSink)));

        thread::scope(|scope| {
            for writer in 0..16i64 {
                let partition = Arc::clone(&partition);
                scope.spawn(move || {
                    for i in 0..200i64 {
                        let ts = writer * 1000 + i;
                        let ts = if i % 2 == 0 { ts } else { -ts };
                        let source = format!("s{}", writer % 4);
                        partition
                            .insert_rows(&rows(&source, "cpu", [ts]))
                            .unwrap();
                    }
                });
            }
        });

        assert_eq!(partition.max_timestamp(), 15 * 1000 + 198);
        assert_eq!(partition.min_timestamp(), -(15 * 1000 + 199));
    }
}
