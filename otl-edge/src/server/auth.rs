//! Admin authentication
//!
//! Cache inspection and worker updates require `Authorization: Bearer <key>`
//! matching the configured admin key. With no key configured those routes
//! are closed to everyone.

use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Verifies admin bearer keys. Only a digest of the key is kept.
#[derive(Clone, Default)]
pub struct AdminAuth {
    key_digest: Option<String>,
}

impl AdminAuth {
    pub fn new(api_key: Option<&str>) -> Self {
        let key_digest = api_key.filter(|k| !k.is_empty()).map(Self::digest);
        if key_digest.is_none() {
            warn!("No admin API key configured; /__edge management routes are disabled");
        }
        Self { key_digest }
    }

    fn digest(key: &str) -> String {
        hex::encode(Sha256::digest(key.as_bytes()))
    }

    pub fn is_enabled(&self) -> bool {
        self.key_digest.is_some()
    }

    /// Check a presented key against the configured one
    pub fn verify(&self, presented: &str) -> bool {
        self.key_digest
            .as_deref()
            .is_some_and(|expected| Self::digest(presented) == expected)
    }

    fn bearer(req: &Request) -> Option<&str> {
        req.headers()
            .get(header::AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")
    }

    /// Middleware function for Axum
    pub async fn layer(
        State(auth): State<AdminAuth>,
        req: Request,
        next: Next,
    ) -> Result<Response, StatusCode> {
        if !auth.is_enabled() {
            debug!("Rejected {}: admin routes disabled", req.uri().path());
            return Err(StatusCode::FORBIDDEN);
        }

        match Self::bearer(&req) {
            Some(key) if auth.verify(key) => Ok(next.run(req).await),
            Some(_) => {
                warn!("Rejected {}: invalid admin key", req.uri().path());
                Err(StatusCode::UNAUTHORIZED)
            }
            None => {
                debug!("Rejected {}: no admin key", req.uri().path());
                Err(StatusCode::UNAUTHORIZED)
            }
        }
    }
}
