//! Disk Cache Storage
//!
//! Persistent partitions that survive restarts. Layout:
//!
//! ```text
//! {directory}/{partition}/index.json                 # key -> entry metadata
//! {directory}/{partition}/{sha256(key)}-{uuid}.body  # response body
//! ```
//!
//! Body files are never rewritten. Every write lands in a fresh file, the
//! index on disk is swapped to it with a rename, and only then is the old
//! file removed. A reader therefore sees either the old body or the new one.

use super::CacheStorage;
use crate::core::error::{EdgeError, Result};
use crate::core::types::CachedResponse;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

const INDEX_FILE: &str = "index.json";
const BODY_EXTENSION: &str = "body";

/// Index entry for one stored response
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DiskEntry {
    response: CachedResponse,
    file: String,
    size: u64,
    stored_at: DateTime<Utc>,
}

type PartitionIndex = HashMap<String, DiskEntry>;

/// Disk storage configuration
#[derive(Debug, Clone)]
pub struct DiskStorageConfig {
    pub directory: PathBuf,
}

impl Default for DiskStorageConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./data/cache"),
        }
    }
}

/// Disk-backed partition store
#[derive(Clone)]
pub struct DiskStorage {
    config: DiskStorageConfig,
    index: Arc<RwLock<HashMap<String, PartitionIndex>>>,
    /// Serializes mutations so index files are written in order
    write_lock: Arc<Mutex<()>>,
}

impl DiskStorage {
    /// Create or reopen the storage root
    pub fn new(config: DiskStorageConfig) -> Result<Self> {
        fs::create_dir_all(&config.directory)?;

        let index = Self::load_indexes(&config.directory)?;
        info!(
            "Opened disk cache storage at {} ({} partitions)",
            config.directory.display(),
            index.len()
        );

        Ok(Self {
            config,
            index: Arc::new(RwLock::new(index)),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Load every partition index found under the root
    fn load_indexes(directory: &Path) -> Result<HashMap<String, PartitionIndex>> {
        let mut indexes = HashMap::new();

        for dir_entry in fs::read_dir(directory)? {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = dir_entry.file_name().to_str().map(str::to_string) else {
                continue;
            };

            let index_path = dir_entry.path().join(INDEX_FILE);
            let partition: PartitionIndex = if index_path.exists() {
                let contents = fs::read_to_string(&index_path)?;
                match serde_json::from_str(&contents) {
                    Ok(index) => index,
                    Err(e) => {
                        warn!("Discarding unreadable index for {}: {}", name, e);
                        PartitionIndex::new()
                    }
                }
            } else {
                PartitionIndex::new()
            };

            Self::sweep_orphans(&dir_entry.path(), &partition)?;
            debug!("Loaded partition {} ({} entries)", name, partition.len());
            indexes.insert(name, partition);
        }

        Ok(indexes)
    }

    /// Remove body files no index entry points at, left by an interrupted write
    fn sweep_orphans(dir: &Path, partition: &PartitionIndex) -> Result<()> {
        let live: HashSet<&str> = partition.values().map(|e| e.file.as_str()).collect();

        for file in fs::read_dir(dir)? {
            let path = file?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(BODY_EXTENSION) {
                continue;
            }
            let orphan = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !live.contains(n));
            if orphan {
                debug!("Removing orphaned body {}", path.display());
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    fn partition_dir(&self, partition: &str) -> Result<PathBuf> {
        if partition.is_empty()
            || partition.contains(['/', '\\'])
            || partition == "."
            || partition == ".."
        {
            return Err(EdgeError::InvalidRequest(format!(
                "invalid partition name: {:?}",
                partition
            )));
        }
        Ok(self.config.directory.join(partition))
    }

    fn current(&self, partition: &str) -> PartitionIndex {
        self.index.read().get(partition).cloned().unwrap_or_default()
    }

    fn entry(&self, partition: &str, key: &str) -> Option<DiskEntry> {
        self.index.read().get(partition).and_then(|p| p.get(key)).cloned()
    }

    /// Unique file name for a new body of `key`
    fn body_file_name(key: &str) -> String {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        format!("{}-{}.{}", digest, Uuid::new_v4().simple(), BODY_EXTENSION)
    }

    /// Persist a partition index: written beside the live file, then renamed over it
    async fn save_index(dir: &Path, entries: &PartitionIndex) -> Result<()> {
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = dir.join(format!("{}.tmp", INDEX_FILE));
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, dir.join(INDEX_FILE)).await?;
        Ok(())
    }

    async fn write_body(dir: &Path, key: &str, body: &Bytes) -> Result<String> {
        let file = Self::body_file_name(key);
        tokio::fs::write(dir.join(&file), body)
            .await
            .map_err(|e| EdgeError::Storage(format!("failed to write {}: {}", key, e)))?;
        Ok(file)
    }

    /// Best-effort removal of body files nothing references any more
    async fn discard(dir: &Path, files: &[String]) {
        for file in files {
            if let Err(e) = tokio::fs::remove_file(dir.join(file)).await {
                if e.kind() != ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", file, e);
                }
            }
        }
    }

    async fn read_body(dir: &Path, entry: &DiskEntry) -> std::io::Result<Bytes> {
        tokio::fs::read(dir.join(&entry.file)).await.map(Bytes::from)
    }

    fn entry_for(response: &CachedResponse, file: String) -> DiskEntry {
        DiskEntry {
            response: CachedResponse {
                status: response.status,
                headers: response.headers.clone(),
                body: Bytes::new(),
            },
            file,
            size: response.body.len() as u64,
            stored_at: Utc::now(),
        }
    }

    /// Stored bytes across all partitions
    pub fn total_bytes(&self) -> u64 {
        self.index
            .read()
            .values()
            .flat_map(|p| p.values())
            .map(|e| e.size)
            .sum()
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, partition: &str) -> Result<()> {
        let dir = self.partition_dir(partition)?;
        let _guard = self.write_lock.lock().await;

        if self.index.read().contains_key(partition) {
            return Ok(());
        }

        tokio::fs::create_dir_all(&dir).await?;
        let empty = PartitionIndex::new();
        Self::save_index(&dir, &empty).await?;
        self.index.write().insert(partition.to_string(), empty);
        debug!("Created partition {}", partition);
        Ok(())
    }

    async fn lookup(&self, partition: &str, key: &str) -> Result<Option<CachedResponse>> {
        let dir = self.partition_dir(partition)?;

        let Some(mut entry) = self.entry(partition, key) else {
            debug!("MISS {} in {}", key, partition);
            return Ok(None);
        };

        let body = loop {
            match Self::read_body(&dir, &entry).await {
                Ok(body) => break body,
                // Replaced or deleted between the index read and the file read
                Err(e) if e.kind() == ErrorKind::NotFound => match self.entry(partition, key) {
                    None => {
                        debug!("MISS {} in {} (removed)", key, partition);
                        return Ok(None);
                    }
                    Some(current) if current.file != entry.file => entry = current,
                    Some(_) => {
                        return Err(EdgeError::Storage(format!("missing body for {}", key)));
                    }
                },
                Err(e) => {
                    return Err(EdgeError::Storage(format!("failed to read {}: {}", key, e)));
                }
            }
        };

        debug!("HIT {} in {}", key, partition);
        let mut response = entry.response;
        response.body = body;
        Ok(Some(response))
    }

    async fn put(&self, partition: &str, key: &str, response: CachedResponse) -> Result<()> {
        let dir = self.partition_dir(partition)?;
        let _guard = self.write_lock.lock().await;

        tokio::fs::create_dir_all(&dir).await?;
        let file = Self::write_body(&dir, key, &response.body).await?;

        let mut next = self.current(partition);
        let replaced = next.insert(key.to_string(), Self::entry_for(&response, file.clone()));
        if let Err(e) = Self::save_index(&dir, &next).await {
            Self::discard(&dir, &[file]).await;
            return Err(e);
        }
        self.index.write().insert(partition.to_string(), next);

        if let Some(old) = replaced {
            Self::discard(&dir, &[old.file]).await;
        }

        debug!("PUT {} ({} bytes) into {}", key, response.body.len(), partition);
        Ok(())
    }

    async fn put_all(&self, partition: &str, entries: Vec<(String, CachedResponse)>) -> Result<()> {
        let dir = self.partition_dir(partition)?;
        let _guard = self.write_lock.lock().await;

        tokio::fs::create_dir_all(&dir).await?;

        let mut next = self.current(partition);
        let mut written = Vec::with_capacity(entries.len());
        let mut replaced = Vec::new();
        for (key, response) in &entries {
            let file = match Self::write_body(&dir, key, &response.body).await {
                Ok(file) => file,
                Err(e) => {
                    Self::discard(&dir, &written).await;
                    return Err(e);
                }
            };
            written.push(file.clone());
            if let Some(old) = next.insert(key.clone(), Self::entry_for(response, file)) {
                replaced.push(old.file);
            }
        }

        if let Err(e) = Self::save_index(&dir, &next).await {
            Self::discard(&dir, &written).await;
            return Err(e);
        }
        self.index.write().insert(partition.to_string(), next);
        Self::discard(&dir, &replaced).await;

        debug!("PUT ALL {} entries into {}", entries.len(), partition);
        Ok(())
    }

    async fn keys(&self, partition: &str) -> Result<Vec<String>> {
        let index = self.index.read();
        let mut keys: Vec<String> = index
            .get(partition)
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }

    async fn partition_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.index.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete_partition(&self, partition: &str) -> Result<bool> {
        let dir = self.partition_dir(partition)?;
        let _guard = self.write_lock.lock().await;

        let removed = self.index.write().remove(partition).is_some();
        if !removed {
            return Ok(false);
        }

        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        debug!("DELETE partition {}", partition);
        Ok(true)
    }
}
