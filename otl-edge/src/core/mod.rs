pub mod error;
pub mod fetcher;
pub mod routing;
pub mod strategy;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{EdgeError, Result};
pub use fetcher::{Fetcher, HttpFetcher};
pub use routing::{RequestMatcher, Route, RoutingRule, RoutingTable, Strategy};
pub use types::{AssetRequest, CacheNames, CachedResponse, PartitionKind, WorkerPhase};
pub use worker::{FetchOutcome, ServiceWorker, WorkerConfig, WorkerRegistration};
