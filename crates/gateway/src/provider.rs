//! Upstream provider clients.
//!
//! The pipeline talks to providers through [`UpstreamClient`]; the router
//! picks a client by matching the requested model against the configured
//! patterns. Retryable failures (connectivity, 429, 5xx) are retried with
//! jittered exponential backoff before surfacing as
//! [`GatewayError::UpstreamUnavailable`].

pub(crate) mod anthropic;
pub(crate) mod http_client;
pub(crate) mod openai;

use std::{pin::Pin, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::Stream;
use secrecy::SecretString;

use crate::{
    canonical::{Chunk, Request, Response},
    error::{GatewayError, GatewayResult, redact_credentials},
};
use config::{Dialect, ModelPattern, UpstreamConfig};

/// A lazy, finite, non-restartable stream of canonical chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = GatewayResult<Chunk>> + Send>>;

/// One upstream provider endpoint.
///
/// Instantiated once at startup; dropping a stream returned by
/// [`UpstreamClient::stream`] aborts the underlying provider request.
#[async_trait]
pub trait UpstreamClient: Send + Sync + std::fmt::Debug {
    /// Provider name from configuration.
    fn name(&self) -> &str;

    /// Non-streaming completion.
    async fn complete(&self, request: Request) -> GatewayResult<Response>;

    /// Streaming completion.
    async fn stream(&self, request: Request) -> GatewayResult<ChunkStream>;
}

struct Route {
    name: String,
    pattern: ModelPattern,
    client: Arc<dyn UpstreamClient>,
}

/// Routes requests to providers by model pattern.
pub struct UpstreamRouter {
    routes: Vec<Route>,
}

impl UpstreamRouter {
    /// Build all configured providers. Missing credentials are a warning,
    /// not an error, so keyless local providers keep working.
    pub fn from_config(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let mut routes = Vec::with_capacity(config.providers.len());

        for (name, provider) in &config.providers {
            let api_key = resolve_credentials(name, provider.credentials_ref.as_deref());

            let client: Arc<dyn UpstreamClient> = match provider.dialect {
                Dialect::Openai => Arc::new(openai::OpenAiUpstream::new(
                    name.clone(),
                    provider.base_url.clone(),
                    api_key,
                    config.retries,
                )?),
                Dialect::Anthropic => Arc::new(anthropic::AnthropicUpstream::new(
                    name.clone(),
                    provider.base_url.clone(),
                    api_key,
                    config.retries,
                )?),
            };

            routes.push(Route {
                name: name.clone(),
                pattern: provider.model_pattern.clone(),
                client,
            });
        }

        Ok(Self { routes })
    }

    /// A router over a single pre-built client, for embedders and tests.
    pub fn with_client(name: impl Into<String>, pattern: ModelPattern, client: Arc<dyn UpstreamClient>) -> Self {
        Self {
            routes: vec![Route {
                name: name.into(),
                pattern,
                client,
            }],
        }
    }

    /// The provider for a model, or an invalid-request error naming the
    /// model when nothing matches.
    pub fn client_for(&self, model: &str) -> GatewayResult<(&str, Arc<dyn UpstreamClient>)> {
        self.routes
            .iter()
            .find(|route| route.pattern.is_match(model))
            .map(|route| (route.name.as_str(), route.client.clone()))
            .ok_or_else(|| GatewayError::InvalidRequest {
                path: "model".to_string(),
                reason: format!("model '{model}' does not match any configured provider"),
            })
    }
}

fn resolve_credentials(provider: &str, credentials_ref: Option<&str>) -> Option<SecretString> {
    let var = credentials_ref?;

    match std::env::var(var) {
        Ok(value) => Some(SecretString::from(value)),
        Err(_) => {
            log::warn!("credentials_ref '{var}' for provider '{provider}' is not set; requests go out unauthenticated");
            None
        }
    }
}

/// Map an upstream HTTP failure status to the error taxonomy.
pub(crate) fn upstream_error(status: u16, body: String) -> GatewayError {
    let message = redact_credentials(&body);

    match status {
        429 | 500..=599 => GatewayError::UpstreamUnavailable(format!("provider returned {status}: {message}")),
        _ => GatewayError::UpstreamError { status, message },
    }
}

/// Retry a retryable operation with jittered exponential backoff.
pub(crate) async fn with_retries<T, F, Fut>(max_retries: u32, mut operation: F) -> GatewayResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = GatewayResult<T>>,
{
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempt < max_retries => {
                let delay = backoff_delay(attempt);
                log::warn!("upstream attempt {} failed ({error}); retrying in {delay:?}", attempt + 1);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 250.0 * 2f64.powi(attempt as i32);
    let jitter = rand::random::<f64>() * base_ms * 0.2;

    Duration::from_millis((base_ms + jitter) as u64)
}
