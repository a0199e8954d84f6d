//! HTTP endpoints for both dialects, plus health and the activity stream.

pub(crate) mod activity;
pub(crate) mod auth;

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    canonical::{ClientFormat, Request},
    error::{AnthropicErrorResponse, GatewayError},
    events::EventEmitter,
    orchestrator::OrchestratorSettings,
    pipeline::{PipelineOutcome, PipelineProcessor},
    policy::PolicyRegistry,
    protocol::{anthropic, openai},
    provider::UpstreamRouter,
    server::auth::ApiKeyVerifier,
    session,
    store::TransactionStore,
};

/// Response header echoing the transaction id.
const CALL_ID_HEADER: &str = "call_id";

pub(crate) struct GatewayState {
    pub(crate) processor: PipelineProcessor,
    pub(crate) emitter: EventEmitter,
    pub(crate) verifier: ApiKeyVerifier,
    pub(crate) activity_rate_per_sec: u32,
    pub(crate) max_request_bytes: usize,
}

/// Build the gateway router from configuration.
///
/// The default build uses the built-in policy registry and the given
/// store; embedders register additional policies through `registry`
/// before calling this.
pub async fn router(
    config: &config::Config,
    registry: &PolicyRegistry,
    store: Arc<dyn TransactionStore>,
) -> anyhow::Result<Router> {
    let chain = registry.build_chain(&config.policy)?;
    chain.initialize_all().await?;

    let upstream_router = UpstreamRouter::from_config(&config.upstream)?;
    let emitter = EventEmitter::new();

    spawn_event_recorder(&emitter, store.clone());

    let proxy_api_key = config
        .auth
        .proxy_api_key
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("auth.proxy_api_key is required"))?;

    let state = Arc::new(GatewayState {
        processor: PipelineProcessor {
            chain: Arc::new(chain),
            router: upstream_router,
            store,
            emitter: emitter.clone(),
            settings: OrchestratorSettings {
                queue_capacity: config.queues.capacity,
                stall_threshold: std::time::Duration::from_millis(config.limits.stall_threshold_ms),
                overall_deadline: std::time::Duration::from_millis(config.limits.overall_deadline_ms),
            },
        },
        emitter,
        verifier: ApiKeyVerifier::new(proxy_api_key),
        activity_rate_per_sec: config.activity.rate_per_sec,
        max_request_bytes: config.limits.max_request_bytes,
    });

    // Layers run outside-in from the last one added: auth first, then the
    // size check, then the body-limit backstop.
    let authenticated = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/messages", post(anthropic_messages))
        .route("/activity/stream", get(activity::stream))
        .layer(DefaultBodyLimit::max(config.limits.max_request_bytes))
        .layer(axum::middleware::from_fn_with_state(state.clone(), enforce_request_size))
        .layer(axum::middleware::from_fn_with_state(state.clone(), auth::require_api_key))
        .with_state(state);

    Ok(Router::new().route("/health", get(health)).merge(authenticated))
}

/// Forward events to the persistence interface best-effort for as long as
/// the process lives.
fn spawn_event_recorder(emitter: &EventEmitter, store: Arc<dyn TransactionStore>) {
    let mut rx = emitter.subscribe();

    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(error) = store.record_event(&event).await {
                        log::warn!("failed to persist pipeline event: {error:#}");
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    log::warn!("event recorder lagged; {missed} events not persisted");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    });
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

/// Reject oversized requests up front from the declared content length,
/// with the dialect-native 413 body. `DefaultBodyLimit` still backstops
/// chunked bodies that never declare a length.
async fn enforce_request_size(
    State(state): State<Arc<GatewayState>>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let declared = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());

    if let Some(length) = declared
        && length > state.max_request_bytes
    {
        let error = GatewayError::RequestTooLarge {
            limit: state.max_request_bytes,
        };
        return dialect_error(request.uri().path(), error);
    }

    next.run(request).await
}

/// Render an error in the dialect the request was addressed to.
pub(crate) fn dialect_error(path: &str, error: GatewayError) -> Response {
    if path.starts_with("/v1/messages") {
        AnthropicErrorResponse::from(error).into_response()
    } else {
        error.into_response()
    }
}

async fn chat_completions(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let wire: openai::ChatCompletionRequest = match sonic_rs::from_slice(&body) {
        Ok(wire) => wire,
        Err(error) => {
            return GatewayError::InvalidRequest {
                path: "$".to_string(),
                reason: error.to_string(),
            }
            .into_response();
        }
    };

    log::debug!("chat completions request for model {}", wire.model);

    let mut request = Request::from(wire);
    request.session_id = session::from_headers(&headers);

    let processed = state.processor.execute(request, ClientFormat::Openai).await;

    let mut response = match processed.result {
        Ok(PipelineOutcome::Completed(response)) => {
            Json(openai::ChatCompletionResponse::from(response)).into_response()
        }
        Ok(PipelineOutcome::Streaming(frames)) => sse_response(frames),
        Err(error) => error.into_response(),
    };

    set_call_id(&mut response, &processed.transaction_id);
    response
}

async fn anthropic_messages(
    State(state): State<Arc<GatewayState>>,
    _headers: HeaderMap,
    body: Bytes,
) -> Response {
    let wire: anthropic::MessagesRequest = match sonic_rs::from_slice(&body) {
        Ok(wire) => wire,
        Err(error) => {
            return AnthropicErrorResponse::from(GatewayError::InvalidRequest {
                path: "$".to_string(),
                reason: error.to_string(),
            })
            .into_response();
        }
    };

    log::debug!("messages request for model {}", wire.model);

    let mut request = Request::from(wire);
    request.session_id = session::from_metadata(&request);

    let processed = state.processor.execute(request, ClientFormat::Anthropic).await;

    let mut response = match processed.result {
        Ok(PipelineOutcome::Completed(response)) => {
            Json(anthropic::MessagesResponse::from(response)).into_response()
        }
        Ok(PipelineOutcome::Streaming(frames)) => sse_response(frames),
        Err(error) => AnthropicErrorResponse::from(error).into_response(),
    };

    set_call_id(&mut response, &processed.transaction_id);
    response
}

fn sse_response(frames: ReceiverStream<Bytes>) -> Response {
    let body = Body::from_stream(frames.map(Ok::<_, std::convert::Infallible>));

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

fn set_call_id(response: &mut Response, transaction_id: &str) {
    if let Ok(value) = HeaderValue::from_str(transaction_id) {
        response.headers_mut().insert(CALL_ID_HEADER, value);
    }
}
