//! Request classification
//!
//! Decides whether an intercepted request is handled at all, and if so which
//! strategy and partition answer it. The decision is an ordered rule table;
//! the first matching rule wins.

use super::types::{AssetRequest, PartitionKind};
use axum::http::Method;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Extensions cross-origin requests may carry and still be intercepted
pub const FONT_EXTENSIONS: &[&str] = &["woff", "woff2", "ttf", "otf", "eot"];

/// Long-lived asset extensions
pub const STATIC_ASSET_EXTENSIONS: &[&str] = &[
    "css", "js", "png", "jpg", "jpeg", "gif", "svg", "ico", "webp", "woff", "woff2", "ttf", "otf",
];

/// Stylesheets and scripts change with every release and go network-first
pub const CODE_EXTENSIONS: &[&str] = &["css", "js"];

/// Caching strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CacheFirst => "cache_first",
            Self::NetworkFirst => "network_first",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a rule matches on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestMatcher {
    /// Accept header asks for HTML
    HtmlNavigation,
    /// Path extension is one of these
    Extensions(&'static [&'static str]),
    /// Anything
    Any,
}

impl RequestMatcher {
    fn matches(&self, request: &AssetRequest, extension: Option<&str>) -> bool {
        match self {
            Self::HtmlNavigation => request.accepts_html(),
            Self::Extensions(set) => extension.is_some_and(|ext| set.contains(&ext)),
            Self::Any => true,
        }
    }
}

/// One row of the routing table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingRule {
    pub matcher: RequestMatcher,
    pub strategy: Strategy,
    pub partition: PartitionKind,
}

impl RoutingRule {
    pub const fn new(
        matcher: RequestMatcher,
        strategy: Strategy,
        partition: PartitionKind,
    ) -> Self {
        Self {
            matcher,
            strategy,
            partition,
        }
    }
}

/// Outcome of classifying an intercepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub strategy: Strategy,
    pub partition: PartitionKind,
}

/// Ordered, immutable rule table
#[derive(Debug, Clone)]
pub struct RoutingTable {
    rules: Vec<RoutingRule>,
}

impl RoutingTable {
    /// Build a table from rules. A trailing catch-all is appended when the
    /// last rule is not one, so every intercepted request gets a route.
    pub fn new(mut rules: Vec<RoutingRule>) -> Self {
        if rules.last().is_none_or(|r| r.matcher != RequestMatcher::Any) {
            rules.push(RoutingRule::new(
                RequestMatcher::Any,
                Strategy::NetworkFirst,
                PartitionKind::Dynamic,
            ));
        }
        Self { rules }
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    /// Whether the router should answer this request at all
    pub fn intercepts(request: &AssetRequest, site_origin: &Url) -> bool {
        if request.method != Method::GET {
            return false;
        }
        request.is_same_origin(site_origin) || is_font_request(request)
    }

    /// Route for an intercepted request; None means pass through
    pub fn classify(&self, request: &AssetRequest, site_origin: &Url) -> Option<Route> {
        if !Self::intercepts(request, site_origin) {
            return None;
        }

        let extension = request.extension();
        self.rules
            .iter()
            .find(|rule| rule.matcher.matches(request, extension.as_deref()))
            .map(|rule| Route {
                strategy: rule.strategy,
                partition: rule.partition,
            })
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new(vec![
            RoutingRule::new(
                RequestMatcher::HtmlNavigation,
                Strategy::NetworkFirst,
                PartitionKind::Dynamic,
            ),
            RoutingRule::new(
                RequestMatcher::Extensions(CODE_EXTENSIONS),
                Strategy::NetworkFirst,
                PartitionKind::Static,
            ),
            RoutingRule::new(
                RequestMatcher::Extensions(STATIC_ASSET_EXTENSIONS),
                Strategy::CacheFirst,
                PartitionKind::Static,
            ),
            RoutingRule::new(
                RequestMatcher::Any,
                Strategy::NetworkFirst,
                PartitionKind::Dynamic,
            ),
        ])
    }
}

pub fn is_font_request(request: &AssetRequest) -> bool {
    request
        .extension()
        .is_some_and(|ext| FONT_EXTENSIONS.contains(&ext.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;

    const ORIGIN: &str = "https://opentechleveling.com";

    fn origin() -> Url {
        Url::parse(ORIGIN).unwrap()
    }

    fn route(path: &str) -> Option<Route> {
        let req = AssetRequest::get(&format!("{}{}", ORIGIN, path)).unwrap();
        RoutingTable::default().classify(&req, &origin())
    }

    fn expect(strategy: Strategy, partition: PartitionKind) -> Option<Route> {
        Some(Route {
            strategy,
            partition,
        })
    }

    #[test]
    fn test_html_navigation_is_network_first_dynamic() {
        let req = AssetRequest::get(&format!("{}/index.html", ORIGIN))
            .unwrap()
            .with_header(header::ACCEPT, "text/html");
        assert_eq!(
            RoutingTable::default().classify(&req, &origin()),
            expect(Strategy::NetworkFirst, PartitionKind::Dynamic)
        );
    }

    #[test]
    fn test_css_and_js_are_network_first_static() {
        let want = expect(Strategy::NetworkFirst, PartitionKind::Static);
        assert_eq!(route("/index.css?v=1.1.0"), want);
        assert_eq!(route("/cookie-banner.js?v=1.1.0"), want);
        assert_eq!(route("/APP.JS"), want);
    }

    #[test]
    fn test_images_and_fonts_are_cache_first_static() {
        let want = expect(Strategy::CacheFirst, PartitionKind::Static);
        for path in [
            "/logo.svg",
            "/favicon.ico",
            "/a.png",
            "/a.jpg",
            "/a.jpeg",
            "/a.gif",
            "/a.webp",
            "/f.woff",
            "/f.woff2",
            "/f.ttf",
            "/f.otf",
        ] {
            assert_eq!(route(path), want, "{}", path);
        }
    }

    #[test]
    fn test_everything_else_is_network_first_dynamic() {
        let want = expect(Strategy::NetworkFirst, PartitionKind::Dynamic);
        assert_eq!(route("/api/data"), want);
        assert_eq!(route("/"), want);
        assert_eq!(route("/manifest.json"), want);
        // eot is a font for interception purposes but not a static asset
        assert_eq!(route("/f.eot"), want);
    }

    #[test]
    fn test_html_accept_wins_over_extension() {
        let req = AssetRequest::get(&format!("{}/page.js", ORIGIN))
            .unwrap()
            .with_header(header::ACCEPT, "text/html");
        assert_eq!(
            RoutingTable::default().classify(&req, &origin()),
            expect(Strategy::NetworkFirst, PartitionKind::Dynamic)
        );
    }

    #[test]
    fn test_non_get_passes_through() {
        let mut req = AssetRequest::get(&format!("{}/logo.svg", ORIGIN)).unwrap();
        req.method = Method::POST;
        assert_eq!(RoutingTable::default().classify(&req, &origin()), None);
    }

    #[test]
    fn test_cross_origin_passes_through_unless_font() {
        let table = RoutingTable::default();

        let script = AssetRequest::get("https://www.googletagmanager.com/gtag/js?id=G-1").unwrap();
        assert_eq!(table.classify(&script, &origin()), None);

        let font = AssetRequest::get("https://fonts.gstatic.com/s/inter.woff2").unwrap();
        assert_eq!(
            table.classify(&font, &origin()),
            expect(Strategy::CacheFirst, PartitionKind::Static)
        );

        let other_port = AssetRequest::get("https://opentechleveling.com:8443/logo.svg").unwrap();
        assert_eq!(table.classify(&other_port, &origin()), None);
    }

    #[test]
    fn test_custom_table_gets_catch_all() {
        let table = RoutingTable::new(vec![RoutingRule::new(
            RequestMatcher::Extensions(&["png"]),
            Strategy::CacheFirst,
            PartitionKind::Static,
        )]);
        assert_eq!(table.rules().len(), 2);

        let req = AssetRequest::get(&format!("{}/x.svg", ORIGIN)).unwrap();
        assert_eq!(
            table.classify(&req, &origin()),
            expect(Strategy::NetworkFirst, PartitionKind::Dynamic)
        );
    }
}
