pub mod cache;
pub mod config;
pub mod consent;
pub mod core;
pub mod metrics;
pub mod server;

// Re-export commonly used types
pub use cache::{CacheStorage, DiskStorage, DiskStorageConfig, MemoryStorage};
pub use config::ServerConfig;
pub use consent::{AnalyticsLoader, BannerPlan, ConsentChoice};
pub use crate::core::{
    AssetRequest, CacheNames, CachedResponse, EdgeError, FetchOutcome, Fetcher, HttpFetcher,
    PartitionKind, RequestMatcher, Route, RoutingRule, RoutingTable, ServiceWorker, Strategy,
    WorkerConfig, WorkerPhase, WorkerRegistration,
};
pub use metrics::init_metrics;
pub use server::{AdminAuth, AppState, create_router};
