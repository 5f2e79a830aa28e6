//! Cookie consent
//!
//! The site asks visitors once whether analytics may load. The answer lives in
//! the `cookieConsent` cookie; pages served to visitors who accepted get the
//! analytics loader injected into `<head>`, once per page.

use crate::core::error::{EdgeError, Result};
use crate::core::types::CachedResponse;
use axum::http::{HeaderMap, header};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const CONSENT_COOKIE: &str = "cookieConsent";

/// Delay before an undecided visitor sees the banner
pub const BANNER_REVEAL_DELAY: Duration = Duration::from_millis(1000);

/// Fade-out duration when the banner is dismissed
pub const BANNER_FADE: Duration = Duration::from_millis(300);

/// Attribute that marks an injected loader
const LOADER_MARKER: &str = "data-otl-analytics";

const CONSENT_MAX_AGE_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentChoice {
    Unset,
    Accepted,
    Declined,
}

impl ConsentChoice {
    /// Anything but the two known values counts as undecided
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("accepted") => Self::Accepted,
            Some("declined") => Self::Declined,
            _ => Self::Unset,
        }
    }

    /// Read the choice from request Cookie headers
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let value = headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == CONSENT_COOKIE)
            .map(|(_, value)| value);
        Self::parse(value)
    }

    pub fn as_str(&self) -> Option<&'static str> {
        match self {
            Self::Unset => None,
            Self::Accepted => Some("accepted"),
            Self::Declined => Some("declined"),
        }
    }

    /// Set-Cookie value persisting this choice
    pub fn set_cookie(&self) -> Option<String> {
        self.as_str().map(|value| {
            format!(
                "{}={}; Path=/; Max-Age={}; SameSite=Lax",
                CONSENT_COOKIE, value, CONSENT_MAX_AGE_SECS
            )
        })
    }

    pub fn plan(&self) -> BannerPlan {
        match self {
            Self::Accepted => BannerPlan {
                show_banner: false,
                reveal_after_ms: None,
                hide_fade_ms: BANNER_FADE.as_millis() as u64,
                load_analytics: true,
            },
            Self::Declined => BannerPlan {
                show_banner: false,
                reveal_after_ms: None,
                hide_fade_ms: BANNER_FADE.as_millis() as u64,
                load_analytics: false,
            },
            Self::Unset => BannerPlan {
                show_banner: true,
                reveal_after_ms: Some(BANNER_REVEAL_DELAY.as_millis() as u64),
                hide_fade_ms: BANNER_FADE.as_millis() as u64,
                load_analytics: false,
            },
        }
    }
}

/// What the page should do with the banner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BannerPlan {
    pub show_banner: bool,
    pub reveal_after_ms: Option<u64>,
    pub hide_fade_ms: u64,
    pub load_analytics: bool,
}

/// Renders and injects the analytics loader
#[derive(Debug, Clone)]
pub struct AnalyticsLoader {
    measurement_id: String,
}

impl AnalyticsLoader {
    pub fn new(measurement_id: impl Into<String>) -> Result<Self> {
        let measurement_id = measurement_id.into();
        let valid = !measurement_id.is_empty()
            && measurement_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(EdgeError::InvalidRequest(format!(
                "invalid analytics measurement id: {:?}",
                measurement_id
            )));
        }
        Ok(Self { measurement_id })
    }

    pub fn measurement_id(&self) -> &str {
        &self.measurement_id
    }

    /// Event queue init plus the async loader tag
    pub fn snippet(&self) -> String {
        let id = &self.measurement_id;
        format!(
            "<script {marker}>window.dataLayer=window.dataLayer||[];\
             function gtag(){{dataLayer.push(arguments);}}window.gtag=gtag;\
             gtag(\"js\",new Date());gtag(\"config\",\"{id}\");</script>\
             <script async {marker} \
             src=\"https://www.googletagmanager.com/gtag/js?id={id}\"></script>",
            marker = LOADER_MARKER,
            id = id
        )
    }

    /// Insert the loader before `</head>`. None when the page already has
    /// one or has no head to put it in.
    pub fn inject(&self, html: &str) -> Option<String> {
        if html.contains(LOADER_MARKER) {
            return None;
        }
        let at = html.to_ascii_lowercase().find("</head>")?;

        let snippet = self.snippet();
        let mut out = String::with_capacity(html.len() + snippet.len());
        out.push_str(&html[..at]);
        out.push_str(&snippet);
        out.push_str(&html[at..]);
        Some(out)
    }

    /// Apply `inject` to an HTML response, leaving anything else untouched
    pub fn inject_response(&self, mut response: CachedResponse) -> CachedResponse {
        if !response.is_html() {
            return response;
        }
        let Ok(html) = std::str::from_utf8(&response.body) else {
            return response;
        };
        if let Some(injected) = self.inject(html) {
            response.body = Bytes::from(injected);
            response
                .headers
                .retain(|(name, _)| !name.eq_ignore_ascii_case("etag"));
        }
        response
    }
}
