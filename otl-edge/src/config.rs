use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::DiskStorageConfig;
use crate::core::types::CacheNames;
use crate::core::worker::{DEFAULT_MANIFEST, WorkerConfig};

/// Main server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: Server,
    pub upstream: UpstreamConfig,
    pub cache: CacheConfig,
    pub storage: StorageConfig,
    pub analytics: AnalyticsConfig,
    pub admin: AdminConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub host: String,
    pub port: u16,
    /// Origin visitors see; same-origin checks and cache keys use it
    pub public_origin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Where the static site is actually served from
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub prefix: String,
    pub version: String,
    pub manifest: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Disk,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub directory: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub enabled: bool,
    pub measurement_id: String,
}

/// Access to the `/__edge` management routes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Bearer key for cache inspection and worker updates; unset disables them
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 15600,
            public_origin: "http://localhost:15600".to_string(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080".to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        let names = CacheNames::default();
        Self {
            prefix: names.prefix,
            version: names.version,
            manifest: DEFAULT_MANIFEST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            directory: DiskStorageConfig::default().directory,
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            measurement_id: "G-T1P751TQPW".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Get server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn public_origin(&self) -> anyhow::Result<Url> {
        Ok(Url::parse(&self.server.public_origin)?)
    }

    pub fn upstream_url(&self) -> anyhow::Result<Url> {
        Ok(Url::parse(&self.upstream.url)?)
    }

    pub fn cache_names(&self) -> CacheNames {
        CacheNames::new(self.cache.prefix.clone(), self.cache.version.clone())
    }

    /// Convert to WorkerConfig
    pub fn to_worker_config(&self) -> anyhow::Result<WorkerConfig> {
        Ok(WorkerConfig {
            names: self.cache_names(),
            site_origin: self.public_origin()?,
            manifest: self.cache.manifest.clone(),
        })
    }

    /// Convert to DiskStorageConfig
    pub fn to_disk_config(&self) -> DiskStorageConfig {
        DiskStorageConfig {
            directory: self.storage.directory.clone(),
        }
    }
}
