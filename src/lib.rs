//! Tessera - an embeddable time series storage engine
//!
//! Rows of (source, metric, timestamp, value) are logged to a write-ahead
//! log, held in memory partitions ordered per metric, and queried by range
//! with a concurrent fan-out across every overlapping partition.

pub mod db;
pub mod ingestion;
pub mod metrics;
pub mod observe;
pub mod query;
pub mod storage;

pub use db::{Database, DbError};
pub use observe::{EventSink, NoopSink, TracingSink};
pub use query::{QueryConfig, QueryDesc, QueryResponse, Series};
pub use storage::{Point, Row};
