use super::error::{EdgeError, Result};
use super::types::{AssetRequest, CachedResponse, header_text};
use async_trait::async_trait;
use tracing::debug;
use url::Url;

/// Headers that describe a single connection and never cross the proxy
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// The network side of the router
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform one network attempt. Any HTTP status is a successful fetch;
    /// only transport failures are errors.
    async fn fetch(&self, request: &AssetRequest) -> Result<CachedResponse>;
}

/// Fetches same-origin URLs from the upstream site and everything else directly
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    site_origin: Url,
    upstream: Url,
}

impl HttpFetcher {
    pub fn new(site_origin: Url, upstream: Url) -> Result<Self> {
        // Redirects go back to the client untouched
        let client = reqwest::Client::builder()
            .user_agent(concat!("otl-edge/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| EdgeError::InternalError(format!("failed to build client: {}", e)))?;

        Ok(Self {
            client,
            site_origin,
            upstream,
        })
    }

    /// Map a public URL onto the upstream origin
    pub fn upstream_url(&self, url: &Url) -> Url {
        if url.origin() != self.site_origin.origin() {
            return url.clone();
        }

        let mut target = self.upstream.clone();
        let base = self.upstream.path().trim_end_matches('/');
        target.set_path(&format!("{}{}", base, url.path()));
        target.set_query(url.query());
        target
    }

    /// Map an upstream URL back onto the public origin. None when the URL
    /// is not under the upstream base.
    pub fn public_url(&self, url: &Url) -> Option<Url> {
        if url.origin() != self.upstream.origin() {
            return None;
        }
        let base = self.upstream.path().trim_end_matches('/');
        let rest = url.path().strip_prefix(base)?;
        if !rest.is_empty() && !rest.starts_with('/') {
            return None;
        }

        let mut public = self.site_origin.clone();
        public.set_path(if rest.is_empty() { "/" } else { rest });
        public.set_query(url.query());
        Some(public)
    }

    /// Absolute redirect targets on the upstream point back at the public site
    fn rewrite_location(&self, value: &str) -> String {
        Url::parse(value)
            .ok()
            .and_then(|url| self.public_url(&url))
            .map(|url| url.to_string())
            .unwrap_or_else(|| value.to_string())
    }
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &AssetRequest) -> Result<CachedResponse> {
        let target = self.upstream_url(&request.url);
        debug!("FETCH {} {} -> {}", request.method, request.url, target);

        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| EdgeError::InvalidRequest(e.to_string()))?;

        let mut builder = self.client.request(method, target.as_str());
        for (name, value) in &request.headers {
            // Bodies are cached as received, so ask for them uncompressed
            if is_hop_by_hop(name.as_str()) || name == "accept-encoding" {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_bytes());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| EdgeError::Network(format!("{}: {}", target, e)))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .map(|(name, value)| {
                let mut text = header_text(value);
                if *name == reqwest::header::LOCATION {
                    text = self.rewrite_location(&text);
                }
                (name.as_str().to_string(), text)
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| EdgeError::Network(format!("{}: {}", target, e)))?;

        Ok(CachedResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher_for(upstream: &str) -> HttpFetcher {
        HttpFetcher::new(
            Url::parse("https://opentechleveling.com").unwrap(),
            Url::parse(upstream).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_upstream_url_rewrites_same_origin() {
        let fetcher = fetcher_for("http://127.0.0.1:8080/site/");
        let url = Url::parse("https://opentechleveling.com/index.css?v=1.1.0").unwrap();

        assert_eq!(
            fetcher.upstream_url(&url).as_str(),
            "http://127.0.0.1:8080/site/index.css?v=1.1.0"
        );
    }

    #[test]
    fn test_upstream_url_keeps_cross_origin() {
        let fetcher = fetcher_for("http://127.0.0.1:8080");
        let url = Url::parse("https://fonts.gstatic.com/s/inter.woff2").unwrap();

        assert_eq!(fetcher.upstream_url(&url), url);
    }

    #[tokio::test]
    async fn test_fetch_from_upstream() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/index.css"))
            .and(query_param("v", "1.1.0"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("body{}", "text/css"),
            )
            .mount(&mock_server)
            .await;

        let fetcher = fetcher_for(&mock_server.uri());
        let request = AssetRequest::get("https://opentechleveling.com/index.css?v=1.1.0")
            .unwrap()
            .with_header(header::ACCEPT, "text/css");

        let response = fetcher.fetch(&request).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "body{}");
        assert_eq!(response.header("content-type"), Some("text/css"));
        assert!(response.header("content-length").is_none());
    }

    #[tokio::test]
    async fn test_fetch_error_status_is_not_an_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
            .mount(&mock_server)
            .await;

        let fetcher = fetcher_for(&mock_server.uri());
        let request = AssetRequest::get("https://opentechleveling.com/nope").unwrap();

        let response = fetcher.fetch(&request).await.unwrap();
        assert_eq!(response.status, 404);
        assert!(!response.is_success());
    }

    #[test]
    fn test_public_url_maps_upstream_back() {
        let fetcher = fetcher_for("http://127.0.0.1:8080/site/");

        let upstream = Url::parse("http://127.0.0.1:8080/site/about/?tab=1").unwrap();
        assert_eq!(
            fetcher.public_url(&upstream).unwrap().as_str(),
            "https://opentechleveling.com/about/?tab=1"
        );

        let outside = Url::parse("http://127.0.0.1:8080/other").unwrap();
        assert!(fetcher.public_url(&outside).is_none());
        let sibling = Url::parse("http://127.0.0.1:8080/sitemap.xml").unwrap();
        assert!(fetcher.public_url(&sibling).is_none());
    }

    #[tokio::test]
    async fn test_redirect_is_returned_not_followed() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/about"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/about/"))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/about/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("about page"))
            .expect(0)
            .mount(&mock_server)
            .await;

        let fetcher = fetcher_for(&mock_server.uri());
        let request = AssetRequest::get("https://opentechleveling.com/about").unwrap();

        let response = fetcher.fetch(&request).await.unwrap();
        assert_eq!(response.status, 301);
        assert_eq!(response.header("location"), Some("/about/"));
        assert!(response.body.is_empty());
        assert!(!response.is_storable());
    }

    #[tokio::test]
    async fn test_absolute_upstream_redirect_points_at_public_site() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/blog"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", format!("{}/blog/", mock_server.uri()).as_str()),
            )
            .mount(&mock_server)
            .await;

        let fetcher = fetcher_for(&mock_server.uri());
        let request = AssetRequest::get("https://opentechleveling.com/blog").unwrap();

        let response = fetcher.fetch(&request).await.unwrap();
        assert_eq!(response.status, 302);
        assert_eq!(
            response.header("location"),
            Some("https://opentechleveling.com/blog/")
        );
    }

    #[tokio::test]
    async fn test_fetch_keeps_set_cookie_for_the_caller() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("hi")
                    .insert_header("set-cookie", "session=alice"),
            )
            .mount(&mock_server)
            .await;

        let fetcher = fetcher_for(&mock_server.uri());
        let request = AssetRequest::get("https://opentechleveling.com/").unwrap();

        let response = fetcher.fetch(&request).await.unwrap();
        assert_eq!(response.header("set-cookie"), Some("session=alice"));
        assert!(response.to_shared().header("set-cookie").is_none());
    }

    #[tokio::test]
    async fn test_fetch_connection_refused() {
        let fetcher = fetcher_for("http://127.0.0.1:1");
        let request = AssetRequest::get("https://opentechleveling.com/").unwrap();

        let result = fetcher.fetch(&request).await;
        assert!(matches!(result, Err(EdgeError::Network(_))));
    }
}
