//! Cache Storage Module
//!
//! Named partitions of URL-keyed response snapshots:
//! - Memory: partitions held in process (lost on restart)
//! - Disk: one directory per partition, reloaded on startup
//!
//! Every operation is individually atomic. Nothing spans a read and a
//! subsequent write, so concurrent inserts of the same key simply overwrite.

use crate::core::error::Result;
use crate::core::types::CachedResponse;
use async_trait::async_trait;

pub mod disk;
pub mod memory;

pub use disk::{DiskStorage, DiskStorageConfig};
pub use memory::MemoryStorage;

/// Storage of named cache partitions
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create the partition if it does not exist yet
    async fn open(&self, partition: &str) -> Result<()>;

    /// Look a key up in one partition. A missing partition is a miss.
    async fn lookup(&self, partition: &str, key: &str) -> Result<Option<CachedResponse>>;

    /// Insert or overwrite one entry, creating the partition if needed
    async fn put(&self, partition: &str, key: &str, response: CachedResponse) -> Result<()>;

    /// Insert a batch; either every entry lands or none does
    async fn put_all(&self, partition: &str, entries: Vec<(String, CachedResponse)>) -> Result<()>;

    /// Keys stored in a partition
    async fn keys(&self, partition: &str) -> Result<Vec<String>>;

    /// Names of all existing partitions, sorted
    async fn partition_names(&self) -> Result<Vec<String>>;

    /// Delete a whole partition. Returns false if it did not exist.
    async fn delete_partition(&self, partition: &str) -> Result<bool>;
}
