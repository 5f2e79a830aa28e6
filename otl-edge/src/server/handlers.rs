use crate::cache::{CacheStorage, DiskStorage, MemoryStorage};
use crate::config::{ServerConfig, StorageBackend};
use crate::consent::{AnalyticsLoader, BannerPlan, ConsentChoice};
use crate::core::{
    AssetRequest, EdgeError, FetchOutcome, Fetcher, HttpFetcher, PartitionKind, ServiceWorker,
    WorkerConfig, WorkerPhase, WorkerRegistration,
};
use crate::metrics;
use crate::server::auth::AdminAuth;
use axum::{
    Json,
    body::Bytes,
    extract::{Request, State},
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Largest request body forwarded upstream
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub registration: Arc<WorkerRegistration>,
    pub storage: Arc<dyn CacheStorage>,
    pub fetcher: Arc<dyn Fetcher>,
    /// Template for new worker versions
    pub worker_config: WorkerConfig,
    pub analytics: Option<AnalyticsLoader>,
    pub admin: AdminAuth,
}

impl AppState {
    /// Build storage, fetcher and analytics from configuration. No worker is
    /// registered yet.
    pub fn from_config(config: &ServerConfig) -> anyhow::Result<Self> {
        let storage: Arc<dyn CacheStorage> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryStorage::new()),
            StorageBackend::Disk => Arc::new(DiskStorage::new(config.to_disk_config())?),
        };
        let fetcher = Arc::new(HttpFetcher::new(
            config.public_origin()?,
            config.upstream_url()?,
        )?);
        let analytics = if config.analytics.enabled {
            Some(AnalyticsLoader::new(config.analytics.measurement_id.clone())?)
        } else {
            None
        };

        Ok(Self {
            registration: Arc::new(WorkerRegistration::new()),
            storage,
            fetcher,
            worker_config: config.to_worker_config()?,
            analytics,
            admin: AdminAuth::new(config.admin.api_key.as_deref()),
        })
    }

    /// A fresh worker for the configured version, or an override
    pub fn build_worker(&self, version: Option<&str>) -> ServiceWorker {
        let mut config = self.worker_config.clone();
        if let Some(version) = version {
            config.names.version = version.to_string();
        }
        ServiceWorker::new(config, self.storage.clone(), self.fetcher.clone())
    }

    /// Build the absolute public URL for an incoming request
    fn public_url(&self, request: &Request) -> url::Url {
        let mut url = self.worker_config.site_origin.clone();
        url.set_path(request.uri().path());
        url.set_query(request.uri().query());
        url
    }
}

pub async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let controller = state.registration.controller();
    let status = if controller.is_some() {
        "healthy"
    } else {
        "starting"
    };
    Json(serde_json::json!({
        "status": status,
        "service": "otl-edge",
        "version": env!("CARGO_PKG_VERSION"),
        "worker": controller.map(|w| w.version().to_string()),
    }))
}

#[derive(Debug, Serialize)]
pub struct ControllerInfo {
    pub version: String,
    pub phase: WorkerPhase,
    pub static_partition: String,
    pub dynamic_partition: String,
}

#[derive(Debug, Serialize)]
pub struct PartitionInfo {
    pub name: String,
    pub entries: usize,
}

#[derive(Debug, Serialize)]
pub struct CachesResponse {
    pub controller: Option<ControllerInfo>,
    pub partitions: Vec<PartitionInfo>,
}

/// GET /__edge/caches
pub async fn list_caches(
    State(state): State<AppState>,
) -> Result<Json<CachesResponse>, EdgeError> {
    let controller = state.registration.controller().map(|w| ControllerInfo {
        version: w.version().to_string(),
        phase: w.phase(),
        static_partition: w.partition_name(PartitionKind::Static),
        dynamic_partition: w.partition_name(PartitionKind::Dynamic),
    });

    let mut partitions = Vec::new();
    for name in state.storage.partition_names().await? {
        let entries = state.storage.keys(&name).await?.len();
        partitions.push(PartitionInfo { name, entries });
    }

    Ok(Json(CachesResponse {
        controller,
        partitions,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateRequest {
    pub version: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UpdateResponse {
    pub success: bool,
    pub version: String,
    pub phase: WorkerPhase,
}

/// POST /__edge/update - install and activate a (new) worker version
pub async fn update_worker(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<UpdateResponse>, EdgeError> {
    let request: UpdateRequest = if body.is_empty() {
        UpdateRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| EdgeError::InvalidRequest(format!("bad update request: {}", e)))?
    };

    let worker = state.build_worker(request.version.as_deref());
    info!("Update requested for worker v{}", worker.version());
    let worker = state.registration.register(worker).await?;

    Ok(Json(UpdateResponse {
        success: true,
        version: worker.version().to_string(),
        phase: worker.phase(),
    }))
}

#[derive(Debug, Serialize)]
pub struct ConsentResponse {
    pub consent: ConsentChoice,
    pub plan: BannerPlan,
}

/// GET /__edge/consent
pub async fn consent_status(headers: HeaderMap) -> Json<ConsentResponse> {
    let consent = ConsentChoice::from_headers(&headers);
    Json(ConsentResponse {
        consent,
        plan: consent.plan(),
    })
}

fn record_consent(consent: ConsentChoice) -> Response {
    let body = Json(ConsentResponse {
        consent,
        plan: consent.plan(),
    });
    match consent.set_cookie() {
        Some(cookie) => ([(header::SET_COOKIE, cookie)], body).into_response(),
        None => body.into_response(),
    }
}

/// POST /__edge/consent/accept
pub async fn consent_accept() -> Response {
    record_consent(ConsentChoice::Accepted)
}

/// POST /__edge/consent/decline
pub async fn consent_decline() -> Response {
    record_consent(ConsentChoice::Declined)
}

/// Every other request: through the controlling worker, or straight upstream
pub async fn proxy(State(state): State<AppState>, request: Request) -> Response {
    let url = state.public_url(&request);
    let (parts, body) = request.into_parts();

    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            return EdgeError::InvalidRequest(format!("unreadable body: {}", e)).into_response();
        }
    };

    let consent = ConsentChoice::from_headers(&parts.headers);
    let asset = AssetRequest {
        method: parts.method,
        url,
        headers: parts.headers,
        body,
    };

    match state.registration.handle_fetch(&asset).await {
        FetchOutcome::Respond { response, .. } => {
            let response = match (&state.analytics, consent) {
                (Some(loader), ConsentChoice::Accepted) if asset.accepts_html() => {
                    loader.inject_response(response)
                }
                _ => response,
            };
            response.into_response()
        }
        FetchOutcome::PassThrough => {
            metrics::PASSTHROUGH_TOTAL.inc();
            match state.fetcher.fetch(&asset).await {
                Ok(response) => response.into_response(),
                Err(e) => {
                    warn!("Pass-through {} {} failed: {}", asset.method, asset.url, e);
                    e.into_response()
                }
            }
        }
    }
}
