//! Anthropic-dialect upstream client.
//!
//! The Messages API streams typed events rather than flat deltas; a small
//! state machine folds them into canonical chunks so the rest of the
//! pipeline never sees the difference.

use async_trait::async_trait;
use axum::http::HeaderMap;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, header::CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};

use crate::{
    canonical::{Chunk, Delta, Request, Response, Role, ToolCallDelta},
    error::{GatewayError, GatewayResult},
    protocol::anthropic::{
        ContentDelta, MessagesRequest, MessagesResponse, StreamContentBlock, StreamEvent,
    },
    provider::{ChunkStream, UpstreamClient, http_client, upstream_error, with_retries},
};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug)]
pub(crate) struct AnthropicUpstream {
    name: String,
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    retries: u32,
}

impl AnthropicUpstream {
    pub(crate) fn new(
        name: String,
        base_url: String,
        api_key: Option<SecretString>,
        retries: u32,
    ) -> GatewayResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "anthropic-version",
            ANTHROPIC_VERSION.parse().map_err(|e| {
                log::error!("failed to build anthropic-version header for provider '{name}': {e}");
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

    async fn post(&self, wire: &MessagesRequest) -> GatewayResult<reqwest::Response> {
        let url = format!("{}/messages", self.base_url);

        let body = sonic_rs::to_vec(wire).map_err(|e| {
            log::error!("failed to serialize request for provider '{}': {e}", self.name);
            GatewayError::Internal(None)
        })?;

        let mut builder = self.client.post(&url).header(CONTENT_TYPE, "application/json");

        if let Some(api_key) = &self.api_key {
            builder = builder.header("x-api-key", api_key.expose_secret());
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
impl UpstreamClient for AnthropicUpstream {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: Request) -> GatewayResult<Response> {
        let mut wire = MessagesRequest::from(request);
        wire.stream = Some(false);

        let response = with_retries(self.retries, || self.post(&wire)).await?;

        let text = response.text().await.map_err(|e| {
            log::error!("failed to read response body from provider '{}': {e}", self.name);
            GatewayError::Internal(None)
        })?;

        let wire_response: MessagesResponse = sonic_rs::from_str(&text).map_err(|e| {
            log::error!("failed to parse completion from provider '{}': {e}", self.name);
            log::error!("raw response that failed to parse: {text}");
            GatewayError::Internal(None)
        })?;

        Ok(Response::from(wire_response))
    }

    async fn stream(&self, request: Request) -> GatewayResult<ChunkStream> {
        let mut wire = MessagesRequest::from(request);
        wire.stream = Some(true);

        let response = with_retries(self.retries, || self.post(&wire)).await?;

        let event_stream = response.bytes_stream().eventsource();

        let chunks = futures::stream::unfold(
            (Box::pin(event_stream), ChunkBuilder::new()),
            |(mut stream, mut builder)| async move {
                loop {
                    let event = stream.next().await?;

                    let Ok(event) = event else {
                        log::warn!("SSE parsing error in upstream stream");
                        continue;
                    };

                    let Ok(stream_event) = sonic_rs::from_str::<StreamEvent>(&event.data) else {
                        log::warn!("failed to parse upstream stream event");
                        continue;
                    };

                    if let Some(item) = builder.process_event(stream_event) {
                        return Some((item, (stream, builder)));
                    }
                }
            },
        );

        Ok(Box::pin(chunks))
    }
}

/// Folds Anthropic stream events into canonical chunks.
///
/// Tracks the message identity from `message_start` and which kind of
/// block is open at each index, since `input_json_delta` frames do not
/// repeat the tool id.
struct ChunkBuilder {
    message_id: String,
    model: String,
    open_tool_call: bool,
}

impl ChunkBuilder {
    fn new() -> Self {
        Self {
            message_id: String::new(),
            model: String::new(),
            open_tool_call: false,
        }
    }

    fn chunk(&self, delta: Delta) -> Chunk {
        Chunk {
            id: self.message_id.clone(),
            model: self.model.clone(),
            choice_index: 0,
            delta,
            finish_reason: None,
            usage: None,
        }
    }

    fn process_event(&mut self, event: StreamEvent) -> Option<GatewayResult<Chunk>> {
        match event {
            StreamEvent::MessageStart { message } => {
                self.message_id = message.id;
                self.model = message.model;

                let mut chunk = self.chunk(Delta {
                    role: Some(Role::Assistant),
                    ..Delta::default()
                });
                chunk.usage = Some(crate::canonical::Usage::from(message.usage));

                Some(Ok(chunk))
            }

            StreamEvent::ContentBlockStart { content_block, .. } => match content_block {
                StreamContentBlock::ToolUse { id, name, .. } => {
                    self.open_tool_call = true;
                    Some(Ok(self.chunk(Delta {
                        tool_call: Some(ToolCallDelta::Start { id, name }),
                        ..Delta::default()
                    })))
                }
                // Text and thinking blocks produce nothing until their
                // first delta arrives.
                StreamContentBlock::Text { .. } | StreamContentBlock::Thinking { .. } => None,
            },

            StreamEvent::ContentBlockDelta { delta, .. } => match delta {
                ContentDelta::TextDelta { text } => Some(Ok(self.chunk(Delta {
                    content: Some(text),
                    ..Delta::default()
                }))),
                ContentDelta::InputJsonDelta { partial_json } => {
                    if !self.open_tool_call {
                        log::warn!("input_json_delta without an open tool_use block");
                        return None;
                    }
                    Some(Ok(self.chunk(Delta {
                        tool_call: Some(ToolCallDelta::Fragment {
                            arguments: partial_json,
                        }),
                        ..Delta::default()
                    })))
                }
                ContentDelta::ThinkingDelta { thinking } => Some(Ok(self.chunk(Delta {
                    thinking: Some(thinking),
                    ..Delta::default()
                }))),
                ContentDelta::SignatureDelta { .. } => None,
            },

            StreamEvent::ContentBlockStop { .. } => {
                self.open_tool_call = false;
                None
            }

            StreamEvent::MessageDelta { delta, usage } => {
                let mut chunk = self.chunk(Delta::default());
                chunk.finish_reason = delta
                    .stop_reason
                    .map(crate::canonical::FinishReason::from)
                    .or(Some(crate::canonical::FinishReason::Stop));
                chunk.usage = Some(crate::canonical::Usage::from(usage));

                Some(Ok(chunk))
            }

            StreamEvent::Error { error } => {
                log::error!("upstream stream error: {} - {}", error.r#type, error.message);
                Some(Err(GatewayError::UpstreamError {
                    status: 502,
                    message: error.message,
                }))
            }

            StreamEvent::MessageStop | StreamEvent::Ping => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: serde_json::Value) -> StreamEvent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn full_event_sequence_folds_to_canonical_chunks() {
        let mut builder = ChunkBuilder::new();

        let start = builder
            .process_event(event(json!({
                "type": "message_start",
                "message": {
                    "id": "msg_1", "type": "message", "role": "assistant", "content": [],
                    "model": "claude-sonnet-4-5",
                    "usage": {"input_tokens": 12, "output_tokens": 0}
                }
            })))
            .unwrap()
            .unwrap();
        assert_eq!(start.delta.role, Some(Role::Assistant));
        assert_eq!(start.id, "msg_1");

        assert!(builder
            .process_event(event(json!({
                "type": "content_block_start", "index": 0,
                "content_block": {"type": "text", "text": ""}
            })))
            .is_none());

        let text = builder
            .process_event(event(json!({
                "type": "content_block_delta", "index": 0,
                "delta": {"type": "text_delta", "text": "Hi"}
            })))
            .unwrap()
            .unwrap();
        assert_eq!(text.delta.content.as_deref(), Some("Hi"));

        builder.process_event(event(json!({"type": "content_block_stop", "index": 0})));

        let tool = builder
            .process_event(event(json!({
                "type": "content_block_start", "index": 1,
                "content_block": {"type": "tool_use", "id": "toolu_1", "name": "search", "input": {}}
            })))
            .unwrap()
            .unwrap();
        assert!(matches!(
            tool.delta.tool_call,
            Some(ToolCallDelta::Start { ref name, .. }) if name == "search"
        ));

        let args = builder
            .process_event(event(json!({
                "type": "content_block_delta", "index": 1,
                "delta": {"type": "input_json_delta", "partial_json": "{\"q\":"}
            })))
            .unwrap()
            .unwrap();
        assert!(matches!(args.delta.tool_call, Some(ToolCallDelta::Fragment { .. })));

        builder.process_event(event(json!({"type": "content_block_stop", "index": 1})));

        let finish = builder
            .process_event(event(json!({
                "type": "message_delta",
                "delta": {"stop_reason": "tool_use"},
                "usage": {"output_tokens": 7}
            })))
            .unwrap()
            .unwrap();
        assert_eq!(finish.finish_reason, Some(crate::canonical::FinishReason::ToolCalls));
        assert_eq!(finish.usage.unwrap().completion_tokens, 7);

        assert!(builder.process_event(event(json!({"type": "message_stop"}))).is_none());
        assert!(builder.process_event(event(json!({"type": "ping"}))).is_none());
    }

    #[test]
    fn error_event_surfaces_as_upstream_error() {
        let mut builder = ChunkBuilder::new();

        let result = builder
            .process_event(event(json!({
                "type": "error",
                "error": {"type": "overloaded_error", "message": "servers busy"}
            })))
            .unwrap();

        assert!(matches!(result, Err(GatewayError::UpstreamError { status: 502, .. })));
    }
}
