//! The database: an ordered collection of partitions with one writable head.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::observe::{EventSink, NoopSink};
use crate::query::{QueryConfig, QueryDesc, QueryExecutor, QueryResponse};
use crate::storage::data::Row;
use crate::storage::partition::{MemoryPartition, Partition, PartitionError};
use crate::storage::wal::Wal;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("No writable partition")]
    NoWritablePartition,
    #[error("Partition error: {0}")]
    Partition(#[from] PartitionError),
    #[error("Task failed: {0}")]
    TaskFailed(String),
}

#[derive(Default)]
struct PartitionSet {
    /// Every queryable partition, writable head included
    partitions: Vec<Arc<dyn Partition>>,
    writable: Option<Arc<MemoryPartition>>,
}

impl PartitionSet {
    fn register(&mut self, partition: Arc<dyn Partition>) {
        if !self.partitions.iter().any(|p| same_partition(p, &partition)) {
            self.partitions.push(partition);
        }
    }
}

/// Identity comparison; names are not unique across detached partitions
fn same_partition<T: ?Sized>(a: &Arc<dyn Partition>, b: &Arc<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Routes inserts to the writable partition and fans queries out over
/// every partition.
///
/// Queries and inserts hold the partition set's read lock for their
/// whole duration, so structural changes wait for them to finish.
pub struct Database {
    partitions: RwLock<PartitionSet>,
    executor: QueryExecutor,
    sink: Arc<dyn EventSink>,
}

impl Default for Database {
    fn default() -> Self {
        Self::new(QueryConfig::default(), Arc::new(NoopSink))
    }
}

impl Database {
    pub fn new(config: QueryConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            partitions: RwLock::new(PartitionSet::default()),
            executor: QueryExecutor::new(config, Arc::clone(&sink)),
            sink,
        }
    }

    /// The sink handed to partitions this database creates
    pub fn sink(&self) -> Arc<dyn EventSink> {
        Arc::clone(&self.sink)
    }

    /// Adds a read-only partition to the query set; a partition already
    /// in the set is not added twice
    pub async fn add_partition(&self, partition: Arc<dyn Partition>) {
        self.partitions.write().await.register(partition);
    }

    /// Makes `partition` the target of inserts and adds it to the query set.
    /// Returns the previous writable partition, which stays queryable.
    pub async fn set_writable(
        &self,
        partition: Arc<MemoryPartition>,
    ) -> Option<Arc<MemoryPartition>> {
        let mut set = self.partitions.write().await;
        set.register(Arc::clone(&partition) as Arc<dyn Partition>);
        set.writable.replace(partition)
    }

    /// Rebuilds a partition from `wal` and makes it writable
    pub async fn recover_writable(
        &self,
        wal: Arc<dyn Wal>,
    ) -> Result<Arc<MemoryPartition>, DbError> {
        let sink = self.sink();
        let partition = tokio::task::spawn_blocking(move || MemoryPartition::recover(wal, sink))
            .await
            .map_err(|e| DbError::TaskFailed(e.to_string()))??;
        let partition = Arc::new(partition);

        self.set_writable(Arc::clone(&partition)).await;
        Ok(partition)
    }

    /// Removes the first partition named `filename` from the query set.
    /// The writable partition is only cleared when it is the one removed.
    pub async fn remove_partition(&self, filename: &str) -> Option<Arc<dyn Partition>> {
        let mut set = self.partitions.write().await;
        let index = set
            .partitions
            .iter()
            .position(|partition| partition.filename() == filename)?;
        let removed = set.partitions.remove(index);

        if set
            .writable
            .as_ref()
            .is_some_and(|writable| same_partition(&removed, writable))
        {
            set.writable = None;
        }
        Some(removed)
    }

    pub async fn partition_count(&self) -> usize {
        self.partitions.read().await.partitions.len()
    }

    pub async fn writable(&self) -> Option<Arc<MemoryPartition>> {
        self.partitions.read().await.writable.clone()
    }

    /// Inserts rows into the writable partition
    pub async fn insert(&self, rows: Vec<Row>) -> Result<(), DbError> {
        let set = self.partitions.read().await;
        let partition = set.writable.clone().ok_or(DbError::NoWritablePartition)?;

        tokio::task::spawn_blocking(move || partition.insert_rows(&rows))
            .await
            .map_err(|e| DbError::TaskFailed(e.to_string()))??;

        drop(set);
        Ok(())
    }

    /// Runs every description against the current partitions
    pub async fn query(&self, descs: &[QueryDesc]) -> QueryResponse {
        let set = self.partitions.read().await;
        let snapshot: Arc<[Arc<dyn Partition>]> = set.partitions.iter().cloned().collect();

        let response = self.executor.execute(snapshot, descs.to_vec()).await;

        drop(set);
        response
    }
}
