//! OpenAI-dialect upstream client.

use async_trait::async_trait;
use axum::http::HeaderMap;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, header::CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};

use crate::{
    canonical::{Chunk, Request, Response},
    error::{GatewayError, GatewayResult},
    protocol::openai::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse},
    provider::{ChunkStream, UpstreamClient, http_client, upstream_error, with_retries},
};

#[derive(Debug)]
pub(crate) struct OpenAiUpstream {
    name: String,
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    retries: u32,
}

impl OpenAiUpstream {
    pub(crate) fn new(
        name: String,
        base_url: String,
        api_key: Option<SecretString>,
        retries: u32,
    ) -> GatewayResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            "application/json".parse().map_err(|e| {
                log::error!("failed to build content-type header for provider '{name}': {e}");
                GatewayError::Internal(None)
            })?,
        );

        let client = http_client::build(headers).map_err(|e| {
            log::error!("failed to build HTTP client for provider '{name}': {e}");
            GatewayError::Internal(None)
        })?;

        Ok(Self {
            name,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            retries,
        })
    }

    async fn post(&self, wire: &ChatCompletionRequest) -> GatewayResult<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = sonic_rs::to_vec(wire).map_err(|e| {
            log::error!("failed to serialize request for provider '{}': {e}", self.name);
            GatewayError::Internal(None)
        })?;

        let mut builder = self.client.post(&url).header(CONTENT_TYPE, "application/json");

        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }

        let response = builder
            .body(body)
            .send()
            .await
            .map_err(|e| GatewayError::UpstreamUnavailable(format!("failed to reach provider '{}': {e}", self.name)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "<empty response>".to_string());
            log::error!("provider '{}' returned {status}: {body}", self.name);
            return Err(upstream_error(status.as_u16(), body));
        }

        Ok(response)
    }
}

#[async_trait]
impl UpstreamClient for OpenAiUpstream {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: Request) -> GatewayResult<Response> {
        let mut wire = ChatCompletionRequest::from(request);
        wire.stream = Some(false);

        let response = with_retries(self.retries, || self.post(&wire)).await?;

        let text = response.text().await.map_err(|e| {
            log::error!("failed to read response body from provider '{}': {e}", self.name);
            GatewayError::Internal(None)
        })?;

        let wire_response: ChatCompletionResponse = sonic_rs::from_str(&text).map_err(|e| {
            log::error!("failed to parse completion from provider '{}': {e}", self.name);
            log::error!("raw response that failed to parse: {text}");
            GatewayError::Internal(None)
        })?;

        Ok(Response::from(wire_response))
    }

    async fn stream(&self, request: Request) -> GatewayResult<ChunkStream> {
        let mut wire = ChatCompletionRequest::from(request);
        wire.stream = Some(true);

        let response = with_retries(self.retries, || self.post(&wire)).await?;

        let event_stream = response.bytes_stream().eventsource();

        let chunks = futures::stream::unfold(Box::pin(event_stream), |mut stream| async move {
            loop {
                let event = stream.next().await?;

                let Ok(event) = event else {
                    log::warn!("SSE parsing error in upstream stream");
                    continue;
                };

                if event.data == "[DONE]" {
                    return None;
                }

                match sonic_rs::from_str::<ChatCompletionChunk>(&event.data) {
                    Ok(chunk) => return Some((Ok(Chunk::from(chunk)), stream)),
                    Err(e) => {
                        log::warn!("failed to parse upstream chunk: {e}");
                        continue;
                    }
                }
            }
        });

        Ok(Box::pin(chunks))
    }
}
