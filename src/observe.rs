//! Structured events emitted by partitions and the database.
//!
//! Core types never log through process-wide state; they report to an
//! [`EventSink`] handed to them at construction.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::query::QueryDesc;
use crate::storage::partition::PartitionError;

/// Receiver of storage engine events. Every method defaults to a no-op.
pub trait EventSink: Send + Sync {
    /// A batch of rows was applied to a partition
    fn rows_inserted(&self, _partition: &str, _rows: usize) {}

    /// An insert was refused before touching memory
    fn insert_rejected(&self, _partition: &str, _error: &PartitionError) {}

    /// A partition finished replaying its WAL
    fn wal_replayed(&self, _partition: &str, _entries: usize, _rows: usize) {}

    /// Partitions chosen for one query description
    fn partitions_selected(&self, _desc: &QueryDesc, _partitions: &[String]) {}

    /// A partition fetch failed and contributed no points
    fn partition_fetch_failed(&self, _partition: &str, _desc: &QueryDesc, _error: &str) {}

    /// A query returned
    fn query_completed(&self, _descs: usize, _series: usize, _elapsed: Duration) {}

    /// A spawned task panicked or was cancelled
    fn task_failed(&self, _task: &str, _error: &str) {}
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {}

/// Forwards events to `tracing` and the metrics recorders
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn rows_inserted(&self, partition: &str, rows: usize) {
        debug!(partition, rows, "Inserted rows");
        metrics::record_insert(rows as u64);
    }

    fn insert_rejected(&self, partition: &str, error: &PartitionError) {
        warn!(partition, %error, "Rejected insert");
        metrics::record_insert_rejected();
    }

    fn wal_replayed(&self, partition: &str, entries: usize, rows: usize) {
        info!(partition, entries, rows, "Recovered partition from WAL");
        metrics::record_replay(entries as u64);
    }

    fn partitions_selected(&self, desc: &QueryDesc, partitions: &[String]) {
        debug!(
            source = %desc.source,
            metric = %desc.metric,
            start = desc.start,
            end = desc.end,
            ?partitions,
            "Selected partitions to query"
        );
    }

    fn partition_fetch_failed(&self, partition: &str, desc: &QueryDesc, error: &str) {
        warn!(
            partition,
            source = %desc.source,
            metric = %desc.metric,
            error,
            "Partition fetch failed"
        );
        metrics::record_fetch_failure();
    }

    fn query_completed(&self, descs: usize, series: usize, elapsed: Duration) {
        debug!(descs, series, elapsed_ms = elapsed.as_secs_f64() * 1000.0, "Query completed");
        metrics::record_query(elapsed.as_secs_f64() * 1000.0, series as u64);
    }

    fn task_failed(&self, task: &str, error: &str) {
        warn!(task, error, "Task failed");
    }
}
