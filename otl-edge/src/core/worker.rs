//! Worker lifecycle
//!
//! A `ServiceWorker` is one versioned instance of the router: it owns the two
//! partition names for its version, the manifest it installs, and the routing
//! table it dispatches with. A `WorkerRegistration` holds the worker currently
//! in control and rolls a new version in through install, activate and claim.

use super::error::{EdgeError, Result};
use super::fetcher::Fetcher;
use super::routing::{Route, RoutingTable};
use super::strategy;
use super::types::{AssetRequest, CacheNames, CachedResponse, PartitionKind, WorkerPhase};
use crate::cache::CacheStorage;
use crate::metrics;
use axum::http::Method;
use futures_util::future::try_join_all;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

/// Default install manifest
pub const DEFAULT_MANIFEST: &[&str] = &[
    "/",
    "/index.html",
    "/index.css?v=1.1.0",
    "/cookie-banner.js?v=1.1.0",
    "/opentechleveling.svg?v=1.1.0",
    "/mobile.svg?v=1.1.0",
    "/hovalabs.svg?v=1.1.0",
    "/favicon.ico",
];

/// Everything that identifies one worker version
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub names: CacheNames,
    pub site_origin: Url,
    /// Paths (or absolute URLs) stored in the static partition on install
    pub manifest: Vec<String>,
}

impl WorkerConfig {
    pub fn new(site_origin: Url) -> Self {
        Self {
            names: CacheNames::default(),
            site_origin,
            manifest: DEFAULT_MANIFEST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Result of handling an intercepted request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The router answered
    Respond {
        route: Route,
        response: CachedResponse,
    },
    /// Not ours; the caller forwards it untouched
    PassThrough,
}

/// One versioned router instance
pub struct ServiceWorker {
    config: WorkerConfig,
    routing: RoutingTable,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    phase: RwLock<WorkerPhase>,
}

impl ServiceWorker {
    pub fn new(
        config: WorkerConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            config,
            routing: RoutingTable::default(),
            storage,
            fetcher,
            phase: RwLock::new(WorkerPhase::Parsed),
        }
    }

    pub fn with_routing(mut self, routing: RoutingTable) -> Self {
        self.routing = routing;
        self
    }

    pub fn phase(&self) -> WorkerPhase {
        *self.phase.read()
    }

    pub fn version(&self) -> &str {
        &self.config.names.version
    }

    pub fn names(&self) -> &CacheNames {
        &self.config.names
    }

    fn transition(&self, from: WorkerPhase, to: WorkerPhase, action: &'static str) -> Result<()> {
        let mut phase = self.phase.write();
        if *phase != from {
            return Err(EdgeError::InvalidPhase {
                action,
                phase: phase.to_string(),
            });
        }
        debug!("Worker v{} {} -> {}", self.config.names.version, from, to);
        *phase = to;
        Ok(())
    }

    fn set_phase(&self, to: WorkerPhase) {
        *self.phase.write() = to;
    }

    pub(crate) fn mark_redundant(&self) {
        self.set_phase(WorkerPhase::Redundant);
    }

    /// Resolve manifest entries against the site origin
    pub fn manifest_urls(&self) -> Result<Vec<Url>> {
        self.config
            .manifest
            .iter()
            .map(|entry| {
                self.config.site_origin.join(entry).map_err(|e| {
                    EdgeError::InvalidRequest(format!("bad manifest entry {}: {}", entry, e))
                })
            })
            .collect()
    }

    /// Populate the static partition with the whole manifest.
    ///
    /// All manifest URLs are fetched before anything is stored; one failed
    /// fetch or non-success status fails the phase and stores nothing.
    pub async fn install(&self) -> Result<()> {
        self.transition(WorkerPhase::Parsed, WorkerPhase::Installing, "install")?;

        match self.populate_manifest().await {
            Ok(count) => {
                self.set_phase(WorkerPhase::Installed);
                metrics::record_lifecycle("install", true);
                info!(
                    "Worker v{} installed ({} manifest entries)",
                    self.config.names.version, count
                );
                Ok(())
            }
            Err(e) => {
                self.mark_redundant();
                metrics::record_lifecycle("install", false);
                warn!("Worker v{} install failed: {}", self.config.names.version, e);
                Err(EdgeError::InstallFailed(e.to_string()))
            }
        }
    }

    async fn populate_manifest(&self) -> Result<usize> {
        let static_name = self.config.names.static_name();
        self.storage.open(&static_name).await?;

        let urls = self.manifest_urls()?;
        info!("Caching {} static assets into {}", urls.len(), static_name);

        let fetches = urls.into_iter().map(|url| async move {
            let request = AssetRequest::new(Method::GET, url);
            let response = self.fetcher.fetch(&request).await?;
            if !response.is_success() {
                return Err(EdgeError::UpstreamStatus {
                    url: request.url.to_string(),
                    status: response.status,
                });
            }
            Ok((request.cache_key().to_string(), response.to_shared()))
        });
        let entries = try_join_all(fetches).await?;

        let count = entries.len();
        self.storage.put_all(&static_name, entries).await?;
        Ok(count)
    }

    /// Purge stale partitions. Returns the deleted names.
    ///
    /// Only names carrying this worker's prefix are candidates; everything
    /// else in storage belongs to someone else and is left alone.
    pub async fn activate(&self) -> Result<Vec<String>> {
        self.transition(WorkerPhase::Installed, WorkerPhase::Activating, "activate")?;

        match self.purge_stale_partitions().await {
            Ok(deleted) => {
                self.set_phase(WorkerPhase::Activated);
                metrics::record_lifecycle("activate", true);
                info!(
                    "Worker v{} activated ({} stale partitions deleted)",
                    self.config.names.version,
                    deleted.len()
                );
                Ok(deleted)
            }
            Err(e) => {
                self.mark_redundant();
                metrics::record_lifecycle("activate", false);
                warn!("Worker v{} activation failed: {}", self.config.names.version, e);
                Err(e)
            }
        }
    }

    async fn purge_stale_partitions(&self) -> Result<Vec<String>> {
        let names = self.config.names.clone();
        let stale: Vec<String> = self
            .storage
            .partition_names()
            .await?
            .into_iter()
            .filter(|name| names.is_stale(name))
            .collect();

        try_join_all(stale.iter().map(|name| async move {
            info!("Deleting old cache: {}", name);
            self.storage.delete_partition(name).await
        }))
        .await?;

        metrics::PARTITIONS_PURGED_TOTAL.inc_by(stale.len() as u64);
        Ok(stale)
    }

    /// Classify and answer a request. Only an activated worker intercepts.
    pub async fn handle_fetch(&self, request: &AssetRequest) -> FetchOutcome {
        if self.phase() != WorkerPhase::Activated {
            return FetchOutcome::PassThrough;
        }

        let Some(route) = self.routing.classify(request, &self.config.site_origin) else {
            return FetchOutcome::PassThrough;
        };

        let partition = self.config.names.name_for(route.partition);
        let other = self.config.names.name_for(match route.partition {
            PartitionKind::Static => PartitionKind::Dynamic,
            PartitionKind::Dynamic => PartitionKind::Static,
        });
        debug!(
            "{} {} via {} in {}",
            request.method, request.url, route.strategy, partition
        );

        let response = strategy::respond(
            route.strategy,
            self.storage.as_ref(),
            self.fetcher.as_ref(),
            request,
            &partition,
            Some(&other),
        )
        .await;

        FetchOutcome::Respond { route, response }
    }

    /// Partition name for a kind under this worker's version
    pub fn partition_name(&self, kind: PartitionKind) -> String {
        self.config.names.name_for(kind)
    }
}

/// The worker currently controlling requests, and how a new one takes over
#[derive(Default)]
pub struct WorkerRegistration {
    active: RwLock<Option<Arc<ServiceWorker>>>,
    update_lock: Mutex<()>,
}

impl WorkerRegistration {
    pub fn new() -> Self {
        Self::default()
    }

    /// The controlling worker, if any has been activated
    pub fn controller(&self) -> Option<Arc<ServiceWorker>> {
        self.active.read().clone()
    }

    /// Install, activate and claim a new worker version.
    ///
    /// Updates are serialized. If install or activation fails the previous
    /// controller keeps serving. Install always skips waiting, so activation
    /// follows immediately.
    pub async fn register(&self, worker: ServiceWorker) -> Result<Arc<ServiceWorker>> {
        let _guard = self.update_lock.lock().await;
        let worker = Arc::new(worker);

        info!("Registering worker v{}", worker.version());
        worker.install().await?;
        worker.activate().await?;
        self.claim(worker.clone());

        Ok(worker)
    }

    /// Make `worker` the controller; the previous one becomes redundant
    fn claim(&self, worker: Arc<ServiceWorker>) {
        let previous = self.active.write().replace(worker.clone());
        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous, &worker) {
                previous.mark_redundant();
                info!(
                    "Worker v{} superseded by v{}",
                    previous.version(),
                    worker.version()
                );
            }
        }
        info!("Worker v{} now controls all clients", worker.version());
    }

    /// Route a request through the controller
    pub async fn handle_fetch(&self, request: &AssetRequest) -> FetchOutcome {
        match self.controller() {
            Some(worker) => worker.handle_fetch(request).await,
            None => FetchOutcome::PassThrough,
        }
    }
}
