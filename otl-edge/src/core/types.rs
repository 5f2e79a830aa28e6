use super::error::{EdgeError, Result};
use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use url::Url;

/// Body of the synthetic 503 returned by cache-first when nothing can be served
pub const OFFLINE_CONTENT_BODY: &str = "Offline content not available";

/// Body of the synthetic 503 returned by network-first when nothing can be served
pub const CONTENT_OFFLINE_BODY: &str = "Content not available offline";

/// Response headers never kept in a shared partition
const PER_VISITOR_HEADERS: &[&str] = &["set-cookie", "set-cookie2"];

/// Header value as text. Bytes outside visible ASCII are read as ISO-8859-1,
/// so `header_bytes` restores the exact original value.
pub fn header_text(value: &HeaderValue) -> String {
    match value.to_str() {
        Ok(text) => text.to_string(),
        Err(_) => value.as_bytes().iter().map(|&b| char::from(b)).collect(),
    }
}

/// Wire bytes for a header value produced by `header_text`
pub fn header_bytes(text: &str) -> Cow<'_, [u8]> {
    if text.is_ascii() || text.chars().any(|c| u32::from(c) > 0xFF) {
        return Cow::Borrowed(text.as_bytes());
    }
    Cow::Owned(text.chars().map(|c| u32::from(c) as u8).collect())
}

/// An intercepted outbound request
#[derive(Debug, Clone)]
pub struct AssetRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl AssetRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Build a GET request for an absolute URL
    pub fn get(url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| EdgeError::InvalidRequest(format!("bad url {}: {}", url, e)))?;
        Ok(Self::new(Method::GET, url))
    }

    pub fn with_header(mut self, name: header::HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Partition key: the absolute URL, query included
    pub fn cache_key(&self) -> &str {
        self.url.as_str()
    }

    /// Lowercased text after the last `.` of the last path segment
    pub fn extension(&self) -> Option<String> {
        let segment = self.url.path().rsplit('/').next()?;
        let (_, ext) = segment.rsplit_once('.')?;
        if ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    /// Whether the Accept header asks for an HTML document
    pub fn accepts_html(&self) -> bool {
        self.headers
            .get_all(header::ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.contains("text/html"))
    }

    pub fn is_same_origin(&self, origin: &Url) -> bool {
        self.url.origin() == origin.origin()
    }
}

/// Response snapshot as stored in a partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    #[serde(skip)]
    pub body: Bytes,
}

impl CachedResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Synthetic 503 with a fixed plain-text body
    pub fn unavailable(message: &'static str) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE.as_u16(), message)
            .with_header("content-type", "text/plain; charset=utf-8")
    }

    /// 2xx, the same range a fetch `ok` flag covers
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether a shared partition may keep this response: a success that
    /// upstream did not mark `private` or `no-store`
    pub fn is_storable(&self) -> bool {
        if !self.is_success() {
            return false;
        }
        !self
            .headers
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case("cache-control"))
            .flat_map(|(_, value)| value.split(','))
            .map(|directive| directive.split('=').next().unwrap_or_default().trim())
            .any(|d| d.eq_ignore_ascii_case("private") || d.eq_ignore_ascii_case("no-store"))
    }

    /// Copy to store in a shared partition, without per-visitor headers
    pub fn to_shared(&self) -> CachedResponse {
        let mut shared = self.clone();
        shared
            .headers
            .retain(|(name, _)| !PER_VISITOR_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)));
        shared
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_html(&self) -> bool {
        self.header("content-type")
            .is_some_and(|v| v.contains("text/html"))
    }
}

impl IntoResponse for CachedResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::BAD_GATEWAY);
        let mut builder = Response::builder().status(status);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), &*header_bytes(value));
        }
        match builder.body(Body::from(self.body)) {
            Ok(response) => response,
            Err(e) => EdgeError::InternalError(format!("invalid cached response: {}", e))
                .into_response(),
        }
    }
}

/// Versioned partition names owned by one worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheNames {
    pub prefix: String,
    pub version: String,
}

impl CacheNames {
    pub fn new(prefix: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            version: version.into(),
        }
    }

    pub fn static_name(&self) -> String {
        format!("{}static-v{}", self.prefix, self.version)
    }

    pub fn dynamic_name(&self) -> String {
        format!("{}dynamic-v{}", self.prefix, self.version)
    }

    pub fn name_for(&self, kind: PartitionKind) -> String {
        match kind {
            PartitionKind::Static => self.static_name(),
            PartitionKind::Dynamic => self.dynamic_name(),
        }
    }

    /// A partition is stale when it carries our prefix but is not a current name
    pub fn is_stale(&self, name: &str) -> bool {
        name.starts_with(&self.prefix) && name != self.static_name() && name != self.dynamic_name()
    }
}

impl Default for CacheNames {
    fn default() -> Self {
        Self::new("open-tech-leveling-", "1.1.0")
    }
}

/// Which of the two live partitions a route targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionKind {
    Static,
    Dynamic,
}

/// Lifecycle phase of a worker version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerPhase {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

impl fmt::Display for WorkerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Parsed => "parsed",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Activated => "activated",
            Self::Redundant => "redundant",
        };
        f.write_str(s)
    }
}
