//! Cache-first and network-first strategies
//!
//! Each strategy makes exactly one network attempt and at most one lookup
//! pass. Writes go to the target partition and only keep storable responses,
//! minus per-visitor headers; a lookup checks the target
//! first and then the optional fallback partition, so a navigation can still
//! be answered offline from the install manifest. Failures never escape: the
//! caller always gets a response, a synthetic 503 when nothing else is
//! available.

use super::error::Result;
use super::fetcher::Fetcher;
use super::routing::Strategy;
use super::types::{AssetRequest, CONTENT_OFFLINE_BODY, CachedResponse, OFFLINE_CONTENT_BODY};
use crate::cache::CacheStorage;
use crate::metrics;
use std::time::Instant;
use tracing::{debug, warn};

/// Run the given strategy against a partition
pub async fn respond(
    strategy: Strategy,
    storage: &dyn CacheStorage,
    fetcher: &dyn Fetcher,
    request: &AssetRequest,
    partition: &str,
    fallback: Option<&str>,
) -> CachedResponse {
    match strategy {
        Strategy::CacheFirst => cache_first(storage, fetcher, request, partition, fallback).await,
        Strategy::NetworkFirst => {
            network_first(storage, fetcher, request, partition, fallback).await
        }
    }
}

/// Look a key up in the target partition, then in the fallback
async fn lookup(
    storage: &dyn CacheStorage,
    key: &str,
    partition: &str,
    fallback: Option<&str>,
) -> Result<Option<CachedResponse>> {
    if let Some(hit) = storage.lookup(partition, key).await? {
        return Ok(Some(hit));
    }
    match fallback {
        Some(other) => storage.lookup(other, key).await,
        None => Ok(None),
    }
}

/// Serve from the partition, falling back to the network on a miss
pub async fn cache_first(
    storage: &dyn CacheStorage,
    fetcher: &dyn Fetcher,
    request: &AssetRequest,
    partition: &str,
    fallback: Option<&str>,
) -> CachedResponse {
    let start = Instant::now();
    let answer = try_cache_first(storage, fetcher, request, partition, fallback).await;
    let (response, outcome) = match answer {
        Ok(answer) => answer,
        Err(e) => {
            warn!("Cache first failed for {}: {}", request.url, e);
            (CachedResponse::unavailable(OFFLINE_CONTENT_BODY), "offline")
        }
    };

    metrics::record_strategy_outcome(
        Strategy::CacheFirst.as_str(),
        outcome,
        start.elapsed().as_secs_f64(),
    );
    response
}

async fn try_cache_first(
    storage: &dyn CacheStorage,
    fetcher: &dyn Fetcher,
    request: &AssetRequest,
    partition: &str,
    fallback: Option<&str>,
) -> Result<(CachedResponse, &'static str)> {
    let key = request.cache_key();

    if let Some(cached) = lookup(storage, key, partition, fallback).await? {
        debug!("Cache first HIT {} in {}", key, partition);
        return Ok((cached, "cache"));
    }

    let response = fetcher.fetch(request).await?;
    if response.is_storable() {
        let stored = storage.put(partition, key, response.to_shared()).await;
        metrics::record_cache_write(stored.is_ok());
        stored?;
    }
    Ok((response, "network"))
}

/// Serve from the network, falling back to the partition when it fails
pub async fn network_first(
    storage: &dyn CacheStorage,
    fetcher: &dyn Fetcher,
    request: &AssetRequest,
    partition: &str,
    fallback: Option<&str>,
) -> CachedResponse {
    let start = Instant::now();
    let key = request.cache_key();

    let (response, outcome) = match fetcher.fetch(request).await {
        Ok(response) => {
            if response.is_storable() {
                let stored = storage.put(partition, key, response.to_shared()).await;
                metrics::record_cache_write(stored.is_ok());
                if let Err(e) = stored {
                    warn!("Failed to store {} in {}: {}", key, partition, e);
                }
            }
            (response, "network")
        }
        Err(e) => {
            debug!("Network first falling back to cache for {}: {}", key, e);
            match lookup(storage, key, partition, fallback).await {
                Ok(Some(cached)) => (cached, "fallback_cache"),
                Ok(None) => (CachedResponse::unavailable(CONTENT_OFFLINE_BODY), "offline"),
                Err(e) => {
                    warn!("Cache fallback failed for {}: {}", key, e);
                    (CachedResponse::unavailable(CONTENT_OFFLINE_BODY), "offline")
                }
            }
        }
    };

    metrics::record_strategy_outcome(
        Strategy::NetworkFirst.as_str(),
        outcome,
        start.elapsed().as_secs_f64(),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStorage;
    use crate::core::testing::{BrokenStorage, FakeFetcher};

    const STATIC: &str = "open-tech-leveling-static-v1.1.0";
    const DYNAMIC: &str = "open-tech-leveling-dynamic-v1.1.0";

    fn request(url: &str) -> AssetRequest {
        AssetRequest::get(url).unwrap()
    }

    #[tokio::test]
    async fn test_cache_first_hit_skips_network() {
        let storage = MemoryStorage::new();
        let fetcher = FakeFetcher::new();
        let req = request("https://site.test/logo.svg");

        let stored = CachedResponse::new(200, "<svg>cached</svg>")
            .with_header("content-type", "image/svg+xml");
        storage.put(STATIC, req.cache_key(), stored.clone()).await.unwrap();

        let response = cache_first(&storage, &fetcher, &req, STATIC, None).await;
        assert_eq!(response, stored);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_cache_first_offline_returns_cached_copy() {
        let storage = MemoryStorage::new();
        let fetcher = FakeFetcher::new();
        fetcher.set_offline(true);
        let req = request("https://site.test/logo.svg");

        storage
            .put(STATIC, req.cache_key(), CachedResponse::new(200, "<svg/>"))
            .await
            .unwrap();

        let response = cache_first(&storage, &fetcher, &req, STATIC, None).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "<svg/>");
    }

    #[tokio::test]
    async fn test_cache_first_miss_fetches_and_stores() {
        let storage = MemoryStorage::new();
        let fetcher = FakeFetcher::new();
        let req = request("https://site.test/photo.png");
        fetcher.serve(req.url.as_str(), CachedResponse::new(200, "png-bytes"));

        let response = cache_first(&storage, &fetcher, &req, STATIC, None).await;
        assert_eq!(response.body, "png-bytes");
        assert_eq!(fetcher.calls(), 1);

        let stored = storage.lookup(STATIC, req.cache_key()).await.unwrap();
        assert_eq!(stored.unwrap().body, "png-bytes");

        // Second request is served from the partition
        cache_first(&storage, &fetcher, &req, STATIC, None).await;
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_first_does_not_store_errors() {
        let storage = MemoryStorage::new();
        let fetcher = FakeFetcher::new();
        let req = request("https://site.test/missing.png");

        let response = cache_first(&storage, &fetcher, &req, STATIC, None).await;
        assert_eq!(response.status, 404);
        assert!(storage.keys(STATIC).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cache_first_offline_miss_is_503() {
        let storage = MemoryStorage::new();
        let fetcher = FakeFetcher::new();
        fetcher.set_offline(true);

        let req = request("https://site.test/a.png");

        let response = cache_first(&storage, &fetcher, &req, STATIC, None).await;
        assert_eq!(response.status, 503);
        assert_eq!(response.body, OFFLINE_CONTENT_BODY);
    }

    #[tokio::test]
    async fn test_cache_first_storage_failure_is_503() {
        let fetcher = FakeFetcher::new();
        let req = request("https://site.test/a.png");
        fetcher.serve(req.url.as_str(), CachedResponse::new(200, "png"));

        let response = cache_first(&BrokenStorage, &fetcher, &req, STATIC, None).await;
        assert_eq!(response.status, 503);
        assert_eq!(response.body, OFFLINE_CONTENT_BODY);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_network_first_updates_partition() {
        let storage = MemoryStorage::new();
        let fetcher = FakeFetcher::new();
        let req = request("https://site.test/index.css?v=1.1.0");

        storage
            .put(STATIC, req.cache_key(), CachedResponse::new(200, "old{}"))
            .await
            .unwrap();
        fetcher.serve(req.url.as_str(), CachedResponse::new(200, "live{}"));

        let response = network_first(&storage, &fetcher, &req, STATIC, None).await;
        assert_eq!(response.body, "live{}");

        let stored = storage.lookup(STATIC, req.cache_key()).await.unwrap().unwrap();
        assert_eq!(stored.body, "live{}");
    }

    #[tokio::test]
    async fn test_network_first_falls_back_to_cache() {
        let storage = MemoryStorage::new();
        let fetcher = FakeFetcher::new();
        fetcher.set_offline(true);
        let req = request("https://site.test/about");

        storage
            .put(DYNAMIC, req.cache_key(), CachedResponse::new(200, "about page"))
            .await
            .unwrap();

        let response = network_first(&storage, &fetcher, &req, DYNAMIC, None).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "about page");
    }

    #[tokio::test]
    async fn test_network_first_offline_miss_is_503() {
        let storage = MemoryStorage::new();
        let fetcher = FakeFetcher::new();
        fetcher.set_offline(true);

        let req = request("https://site.test/data");

        let response = network_first(&storage, &fetcher, &req, DYNAMIC, None).await;
        assert_eq!(response.status, 503);
        assert_eq!(response.body, "Content not available offline");
    }

    #[tokio::test]
    async fn test_network_first_ignores_write_failure() {
        let fetcher = FakeFetcher::new();
        let req = request("https://site.test/data");
        fetcher.serve(req.url.as_str(), CachedResponse::new(200, "fresh"));

        let response = network_first(&BrokenStorage, &fetcher, &req, DYNAMIC, None).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "fresh");
    }

    #[tokio::test]
    async fn test_network_first_passes_error_status_without_storing() {
        let storage = MemoryStorage::new();
        let fetcher = FakeFetcher::new();
        let req = request("https://site.test/gone");

        storage
            .put(DYNAMIC, req.cache_key(), CachedResponse::new(200, "stale"))
            .await
            .unwrap();

        let response = network_first(&storage, &fetcher, &req, DYNAMIC, None).await;
        assert_eq!(response.status, 404);

        let stored = storage.lookup(DYNAMIC, req.cache_key()).await.unwrap().unwrap();
        assert_eq!(stored.body, "stale");
    }

    #[tokio::test]
    async fn test_network_first_offline_uses_fallback_partition() {
        let storage = MemoryStorage::new();
        let fetcher = FakeFetcher::new();
        fetcher.set_offline(true);
        let req = request("https://site.test/");

        // Pre-populated by install into the static partition
        storage
            .put(STATIC, req.cache_key(), CachedResponse::new(200, "shell"))
            .await
            .unwrap();

        let response = network_first(&storage, &fetcher, &req, DYNAMIC, Some(STATIC)).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "shell");

        let no_fallback = network_first(&storage, &fetcher, &req, DYNAMIC, None).await;
        assert_eq!(no_fallback.status, 503);
    }

    #[tokio::test]
    async fn test_cache_first_miss_writes_only_target() {
        let storage = MemoryStorage::new();
        let fetcher = FakeFetcher::new();
        let req = request("https://site.test/font.woff2");
        fetcher.serve(req.url.as_str(), CachedResponse::new(200, "font"));

        cache_first(&storage, &fetcher, &req, STATIC, Some(DYNAMIC)).await;

        assert_eq!(storage.keys(STATIC).await.unwrap().len(), 1);
        assert!(storage.keys(DYNAMIC).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stored_copies_drop_set_cookie() {
        let storage = MemoryStorage::new();
        let fetcher = FakeFetcher::new();
        let page = request("https://site.test/");
        let logo = request("https://site.test/logo.png");
        for req in [&page, &logo] {
            fetcher.serve(
                req.url.as_str(),
                CachedResponse::new(200, "body").with_header("set-cookie", "session=alice"),
            );
        }

        // The visitor who triggered the fetch still gets the cookie
        let fresh = network_first(&storage, &fetcher, &page, DYNAMIC, None).await;
        assert_eq!(fresh.header("set-cookie"), Some("session=alice"));
        let fresh = cache_first(&storage, &fetcher, &logo, STATIC, None).await;
        assert_eq!(fresh.header("set-cookie"), Some("session=alice"));

        let stored = storage.lookup(DYNAMIC, page.cache_key()).await.unwrap().unwrap();
        assert!(stored.header("set-cookie").is_none());
        let replay = cache_first(&storage, &fetcher, &logo, STATIC, None).await;
        assert!(replay.header("set-cookie").is_none());
        assert_eq!(replay.body, "body");
    }

    #[tokio::test]
    async fn test_private_responses_are_not_stored() {
        let storage = MemoryStorage::new();
        let fetcher = FakeFetcher::new();
        let req = request("https://site.test/account");
        fetcher.serve(
            req.url.as_str(),
            CachedResponse::new(200, "yours").with_header("cache-control", "private"),
        );

        let response = network_first(&storage, &fetcher, &req, DYNAMIC, None).await;
        assert_eq!(response.body, "yours");
        assert!(storage.keys(DYNAMIC).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_redirect_is_returned_unstored() {
        let storage = MemoryStorage::new();
        let fetcher = FakeFetcher::new();
        let req = request("https://site.test/about");
        fetcher.serve(
            req.url.as_str(),
            CachedResponse::new(301, "").with_header("location", "/about/"),
        );

        let response = network_first(&storage, &fetcher, &req, DYNAMIC, None).await;
        assert_eq!(response.status, 301);
        assert_eq!(response.header("location"), Some("/about/"));
        assert!(storage.keys(DYNAMIC).await.unwrap().is_empty());
    }
}
