//! Gateway authentication.
//!
//! Clients present the configured proxy API key either as a bearer token
//! or as an `x-api-key` header. Comparison runs over SHA-256 digests with
//! `subtle::ConstantTimeEq`, so the optimizer cannot short-circuit the
//! way it can with `==`.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::{
    error::GatewayError,
    server::{GatewayState, dialect_error},
};

pub(crate) struct ApiKeyVerifier {
    expected_digest: [u8; 32],
}

impl ApiKeyVerifier {
    pub(crate) fn new(key: &SecretString) -> Self {
        Self {
            expected_digest: Sha256::digest(key.expose_secret().as_bytes()).into(),
        }
    }

    pub(crate) fn verify(&self, headers: &HeaderMap) -> bool {
        let Some(presented) = presented_key(headers) else {
            return false;
        };

        let presented_digest: [u8; 32] = Sha256::digest(presented.as_bytes()).into();
        self.expected_digest.ct_eq(&presented_digest).into()
    }
}

fn presented_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION)
        && let Ok(value) = value.to_str()
        && let Some(token) = value.strip_prefix("Bearer ")
    {
        return Some(token);
    }

    headers.get("x-api-key").and_then(|value| value.to_str().ok())
}

/// Middleware guarding every endpoint except `/health`.
pub(crate) async fn require_api_key(
    State(state): State<Arc<GatewayState>>,
    request: Request,
    next: Next,
) -> Response {
    if state.verifier.verify(request.headers()) {
        return next.run(request).await;
    }

    log::debug!("rejected unauthenticated request to {}", request.uri().path());
    dialect_error(request.uri().path(), GatewayError::Unauthorized)
}
