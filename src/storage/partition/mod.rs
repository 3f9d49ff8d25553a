//! Time-partitioned containers of series data.
//!
//! The query engine only depends on the [`Partition`] read contract.
//! [`memory::MemoryPartition`] is the writable, WAL-backed implementation;
//! immutable on-disk partitions implement the same trait elsewhere.

pub mod memory;
pub mod metric;

use thiserror::Error;

use crate::storage::data::Point;
use crate::storage::wal::WalError;

pub use memory::MemoryPartition;

#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("partition/memory: read only")]
    ReadOnly,
    #[error("Non-finite value in {series} at {timestamp}")]
    NonFiniteValue { series: String, timestamp: i64 },
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
    #[error("Fetch failed: {0}")]
    Fetch(String),
}

/// Read contract of a partition, as consumed by queries
pub trait Partition: Send + Sync {
    /// Smallest timestamp held, inclusive
    fn min_timestamp(&self) -> i64;

    /// Largest timestamp held, inclusive
    fn max_timestamp(&self) -> i64;

    /// Identity used in diagnostics
    fn filename(&self) -> String;

    /// Returns the points of `source`/`metric` with timestamps in `[start, end]`
    fn fetch_points(
        &self,
        source: &str,
        metric: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<Point>, PartitionError>;
}
