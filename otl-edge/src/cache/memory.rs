use super::CacheStorage;
use crate::core::error::Result;
use crate::core::types::CachedResponse;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

type Partition = HashMap<String, CachedResponse>;

/// In-process partition store
#[derive(Clone, Default)]
pub struct MemoryStorage {
    partitions: Arc<RwLock<HashMap<String, Partition>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, partition: &str) -> Result<()> {
        self.partitions
            .write()
            .entry(partition.to_string())
            .or_default();
        Ok(())
    }

    async fn lookup(&self, partition: &str, key: &str) -> Result<Option<CachedResponse>> {
        let partitions = self.partitions.read();
        let hit = partitions.get(partition).and_then(|p| p.get(key)).cloned();
        debug!(
            "{} {} in {}",
            if hit.is_some() { "HIT" } else { "MISS" },
            key,
            partition
        );
        Ok(hit)
    }

    async fn put(&self, partition: &str, key: &str, response: CachedResponse) -> Result<()> {
        debug!("PUT {} ({} bytes) into {}", key, response.body.len(), partition);
        self.partitions
            .write()
            .entry(partition.to_string())
            .or_default()
            .insert(key.to_string(), response);
        Ok(())
    }

    async fn put_all(&self, partition: &str, entries: Vec<(String, CachedResponse)>) -> Result<()> {
        debug!("PUT ALL {} entries into {}", entries.len(), partition);
        let mut partitions = self.partitions.write();
        let target = partitions.entry(partition.to_string()).or_default();
        target.extend(entries);
        Ok(())
    }

    async fn keys(&self, partition: &str) -> Result<Vec<String>> {
        let partitions = self.partitions.read();
        let mut keys: Vec<String> = partitions
            .get(partition)
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }

    async fn partition_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.partitions.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete_partition(&self, partition: &str) -> Result<bool> {
        let removed = self.partitions.write().remove(partition).is_some();
        if removed {
            debug!("DELETE partition {}", partition);
        }
        Ok(removed)
    }
}
