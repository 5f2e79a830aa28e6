//! Fakes for unit tests

use super::error::{EdgeError, Result};
use super::fetcher::Fetcher;
use super::types::{AssetRequest, CachedResponse};
use crate::cache::CacheStorage;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Scripted network: answers from a URL table, 404 for unknown URLs
#[derive(Clone, Default)]
pub struct FakeFetcher {
    routes: Arc<RwLock<HashMap<String, CachedResponse>>>,
    offline: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, response: CachedResponse) {
        self.routes.write().insert(url.to_string(), response);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, request: &AssetRequest) -> Result<CachedResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(EdgeError::Network("offline".to_string()));
        }
        let hit = self.routes.read().get(request.url.as_str()).cloned();
        Ok(hit.unwrap_or_else(|| CachedResponse::new(404, "not found")))
    }
}

/// Storage whose every operation fails
pub struct BrokenStorage;

#[async_trait]
impl CacheStorage for BrokenStorage {
    async fn open(&self, _partition: &str) -> Result<()> {
        Err(EdgeError::Storage("broken".to_string()))
    }

    async fn lookup(&self, _partition: &str, _key: &str) -> Result<Option<CachedResponse>> {
        Err(EdgeError::Storage("broken".to_string()))
    }

    async fn put(&self, _partition: &str, _key: &str, _response: CachedResponse) -> Result<()> {
        Err(EdgeError::Storage("broken".to_string()))
    }

    async fn put_all(
        &self,
        _partition: &str,
        _entries: Vec<(String, CachedResponse)>,
    ) -> Result<()> {
        Err(EdgeError::Storage("broken".to_string()))
    }

    async fn keys(&self, _partition: &str) -> Result<Vec<String>> {
        Err(EdgeError::Storage("broken".to_string()))
    }

    async fn partition_names(&self) -> Result<Vec<String>> {
        Err(EdgeError::Storage("broken".to_string()))
    }

    async fn delete_partition(&self, _partition: &str) -> Result<bool> {
        Err(EdgeError::Storage("broken".to_string()))
    }
}
