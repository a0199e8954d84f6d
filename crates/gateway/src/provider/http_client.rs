//! Shared HTTP client construction for upstream providers.

use std::time::Duration;

use axum::http::HeaderMap;
use reqwest::Client;

/// One client per provider, built once at startup. No overall request
/// timeout: streaming responses legitimately run for minutes and the
/// orchestrator's own deadline bounds them.
pub(crate) fn build(default_headers: HeaderMap) -> reqwest::Result<Client> {
    Client::builder()
        .default_headers(default_headers)
        .connect_timeout(Duration::from_secs(30))
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
}
