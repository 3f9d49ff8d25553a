//! Storage module for Tessera
//! Value types, the write-ahead log and time-partitioned containers.

pub mod data;
pub mod partition;
pub mod wal;

pub use data::{DataError, Point, Row};
pub use partition::{MemoryPartition, Partition, PartitionError};
pub use wal::{FileWal, MemoryWal, Wal, WalConfig, WalEntry, WalError, WalOperation};
