//! End-to-end tests: a mock upstream provider, the full gateway over
//! HTTP, and a plain reqwest client.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::header,
    response::IntoResponse,
    routing::post,
};
use futures::StreamExt;
use gateway::{
    GatewayResult,
    canonical::{Chunk, FinishReason},
    policy::{ChunkDecision, Policy, PolicyContext, PolicyRegistry, RequestDecision},
    store::MemoryStore,
};
use indoc::formatdoc;
use serde_json::{Value, json};
use server::ServeConfig;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const PROXY_KEY: &str = "e2e-proxy-key";

async fn spawn_app(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    address
}

async fn spawn_gateway(
    upstream: SocketAddr,
    dialect: &str,
    extra_config: &str,
    registry: Option<PolicyRegistry>,
) -> (SocketAddr, Arc<MemoryStore>) {
    let toml = formatdoc! {r#"
        [auth]
        proxy_api_key = "{PROXY_KEY}"

        {extra_config}

        [upstream.providers.test]
        model_pattern = ".*"
        base_url = "http://{upstream}"
        dialect = "{dialect}"
    "#};

    let config: config::Config = toml::from_str(&toml).unwrap();
    let store = Arc::new(MemoryStore::new());
    let (addr_tx, addr_rx) = tokio::sync::oneshot::channel();

    let serve_config = ServeConfig {
        listen_address: "127.0.0.1:0".parse().unwrap(),
        config,
        shutdown_signal: CancellationToken::new(),
        version: "test".to_string(),
        bound_addr_sender: Some(addr_tx),
        store: Some(store.clone()),
        registry,
    };

    tokio::spawn(async move {
        server::serve(serve_config).await.unwrap();
    });

    (addr_rx.await.unwrap(), store)
}

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

#[tokio::test]
async fn openai_non_streaming_passthrough() {
    async fn upstream(Json(body): Json<Value>) -> Json<Value> {
        assert_eq!(body["model"], "gpt-4o");
        Json(json!({
            "id": "chatcmpl-e2e",
            "object": "chat.completion",
            "created": 0,
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "upstream says hi"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 4, "completion_tokens": 3, "total_tokens": 7}
        }))
    }

    let upstream_addr = spawn_app(Router::new().route("/chat/completions", post(upstream))).await;
    let (gateway_addr, store) = spawn_gateway(upstream_addr, "openai", "", None).await;

    let response = client()
        .post(format!("http://{gateway_addr}/v1/chat/completions"))
        .bearer_auth(PROXY_KEY)
        .json(&json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": false
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);

    let call_id = response
        .headers()
        .get("call_id")
        .expect("call_id header echoed")
        .to_str()
        .unwrap()
        .to_string();

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], "upstream says hi");

    let records = store.transactions();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.transaction_id, call_id);
    assert_eq!(
        serde_json::to_value(&record.original_request).unwrap(),
        serde_json::to_value(&record.final_request).unwrap()
    );
    assert_eq!(
        serde_json::to_value(&record.original_response).unwrap(),
        serde_json::to_value(&record.final_response).unwrap()
    );

    // Every persisted event carries the same transaction id.
    assert!(store.events().iter().all(|event| event.transaction_id() == call_id));
}

struct UpcasePolicy;

#[async_trait]
impl Policy for UpcasePolicy {
    fn name(&self) -> &str {
        "upcase"
    }

    async fn on_content_delta(&self, ctx: &mut PolicyContext, text: &str) -> GatewayResult<ChunkDecision> {
        let chunk = ctx.last_chunk().expect("streaming context").clone();
        Ok(ChunkDecision::Replace(vec![chunk.with_content(text.to_uppercase())]))
    }
}

fn openai_sse_body(deltas: &[&str]) -> String {
    let mut body = String::new();

    let mut frames = vec![json!({
        "id": "chatcmpl-e2e", "object": "chat.completion.chunk", "created": 0, "model": "gpt-4o",
        "choices": [{"index": 0, "delta": {"role": "assistant"}, "finish_reason": null}]
    })];

    for delta in deltas {
        frames.push(json!({
            "id": "chatcmpl-e2e", "object": "chat.completion.chunk", "created": 0, "model": "gpt-4o",
            "choices": [{"index": 0, "delta": {"content": delta}, "finish_reason": null}]
        }));
    }

    frames.push(json!({
        "id": "chatcmpl-e2e", "object": "chat.completion.chunk", "created": 0, "model": "gpt-4o",
        "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]
    }));

    for frame in frames {
        body.push_str(&format!("data: {frame}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

#[tokio::test]
async fn openai_streaming_with_transform() {
    async fn upstream() -> impl IntoResponse {
        (
            [(header::CONTENT_TYPE, "text/event-stream")],
            openai_sse_body(&["hello ", "world"]),
        )
    }

    let upstream_addr = spawn_app(Router::new().route("/chat/completions", post(upstream))).await;

    let mut registry = PolicyRegistry::new();
    registry.register("upcase", |_| Ok(Arc::new(UpcasePolicy)));

    let (gateway_addr, _store) = spawn_gateway(
        upstream_addr,
        "openai",
        "[[policy]]\nclass_ref = \"upcase\"\n",
        Some(registry),
    )
    .await;

    let response = client()
        .post(format!("http://{gateway_addr}/v1/chat/completions"))
        .bearer_auth(PROXY_KEY)
        .json(&json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("call_id"));

    let body = response.text().await.unwrap();

    assert!(body.contains(r#""content":"HELLO ""#));
    assert!(body.contains(r#""content":"WORLD""#));
    assert!(!body.contains(r#""content":"hello ""#));
    assert!(body.trim_end().ends_with("data: [DONE]"));
}

struct RejectPolicy;

#[async_trait]
impl Policy for RejectPolicy {
    fn name(&self) -> &str {
        "reject"
    }

    async fn on_request(
        &self,
        _ctx: &mut PolicyContext,
        _request: gateway::canonical::Request,
    ) -> GatewayResult<RequestDecision> {
        Ok(RequestDecision::Reject {
            message: "blocked".to_string(),
            status: None,
        })
    }
}

#[tokio::test]
async fn policy_rejection_never_calls_upstream() {
    static CALLS: AtomicUsize = AtomicUsize::new(0);

    async fn upstream() -> Json<Value> {
        CALLS.fetch_add(1, Ordering::SeqCst);
        Json(json!({}))
    }

    let upstream_addr = spawn_app(Router::new().route("/chat/completions", post(upstream))).await;

    let mut registry = PolicyRegistry::new();
    registry.register("reject", |_| Ok(Arc::new(RejectPolicy)));

    let (gateway_addr, store) = spawn_gateway(
        upstream_addr,
        "openai",
        "[[policy]]\nclass_ref = \"reject\"\n",
        Some(registry),
    )
    .await;

    let response = client()
        .post(format!("http://{gateway_addr}/v1/chat/completions"))
        .bearer_auth(PROXY_KEY)
        .json(&json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": false
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.unwrap();
    assert!(body["error"]["message"].as_str().unwrap().contains("blocked"));

    assert_eq!(CALLS.load(Ordering::SeqCst), 0);

    let records = store.transactions();
    assert_eq!(records.len(), 1);
    assert!(records[0].original_request.is_some());
    assert!(records[0].final_request.is_none());
}

#[tokio::test]
async fn anthropic_error_shape_for_unauthenticated_requests() {
    async fn upstream() -> Json<Value> {
        Json(json!({}))
    }

    let upstream_addr = spawn_app(Router::new().route("/messages", post(upstream))).await;
    let (gateway_addr, _store) = spawn_gateway(upstream_addr, "anthropic", "", None).await;

    let response = client()
        .post(format!("http://{gateway_addr}/v1/messages"))
        .json(&json!({
            "model": "claude-sonnet-4-5",
            "max_tokens": 128,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "authentication_error");
}

#[tokio::test]
async fn openai_error_shape_for_unauthenticated_requests() {
    async fn upstream() -> Json<Value> {
        Json(json!({}))
    }

    let upstream_addr = spawn_app(Router::new().route("/chat/completions", post(upstream))).await;
    let (gateway_addr, _store) = spawn_gateway(upstream_addr, "openai", "", None).await;

    let response = client()
        .post(format!("http://{gateway_addr}/v1/chat/completions"))
        .header("x-api-key", "wrong-key")
        .json(&json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "authentication_error");
}

#[tokio::test]
async fn oversized_requests_are_rejected_with_413() {
    async fn upstream() -> Json<Value> {
        Json(json!({}))
    }

    let upstream_addr = spawn_app(Router::new().route("/chat/completions", post(upstream))).await;
    let (gateway_addr, _store) = spawn_gateway(
        upstream_addr,
        "openai",
        "[limits]\nmax_request_bytes = 256\n",
        None,
    )
    .await;

    let huge = "x".repeat(1024);
    let response = client()
        .post(format!("http://{gateway_addr}/v1/chat/completions"))
        .bearer_auth(PROXY_KEY)
        .json(&json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": huge}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 413);
}

#[tokio::test]
async fn invalid_json_gets_dialect_native_400() {
    async fn upstream() -> Json<Value> {
        Json(json!({}))
    }

    let upstream_addr = spawn_app(Router::new().route("/messages", post(upstream))).await;
    let (gateway_addr, _store) = spawn_gateway(upstream_addr, "anthropic", "", None).await;

    let response = client()
        .post(format!("http://{gateway_addr}/v1/messages"))
        .bearer_auth(PROXY_KEY)
        .header(header::CONTENT_TYPE, "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

struct StallPolicy;

#[async_trait]
impl Policy for StallPolicy {
    fn name(&self) -> &str {
        "stall"
    }

    async fn on_content_delta(&self, _ctx: &mut PolicyContext, _text: &str) -> GatewayResult<ChunkDecision> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(ChunkDecision::Pass)
    }
}

#[tokio::test]
async fn stalled_policy_times_out_with_a_dialect_error_frame() {
    async fn upstream() -> impl IntoResponse {
        // One delta, then the connection stays open without progress.
        let first = json!({
            "id": "chatcmpl-e2e", "object": "chat.completion.chunk", "created": 0, "model": "gpt-4o",
            "choices": [{"index": 0, "delta": {"role": "assistant", "content": "x"}, "finish_reason": null}]
        });

        let frames = futures::stream::once(async move {
            Ok::<_, std::convert::Infallible>(format!("data: {first}\n\n"))
        })
        .chain(futures::stream::pending());

        (
            [(header::CONTENT_TYPE, "text/event-stream")],
            Body::from_stream(frames),
        )
    }

    let upstream_addr = spawn_app(Router::new().route("/chat/completions", post(upstream))).await;

    let mut registry = PolicyRegistry::new();
    registry.register("stall", |_| Ok(Arc::new(StallPolicy)));

    let (gateway_addr, store) = spawn_gateway(
        upstream_addr,
        "openai",
        "[limits]\nstall_threshold_ms = 300\n\n[[policy]]\nclass_ref = \"stall\"\n",
        Some(registry),
    )
    .await;

    let response = client()
        .post(format!("http://{gateway_addr}/v1/chat/completions"))
        .bearer_auth(PROXY_KEY)
        .json(&json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);

    let body = tokio::time::timeout(Duration::from_secs(5), response.text())
        .await
        .expect("stream closes after the stall threshold")
        .unwrap();

    assert!(body.contains("policy_timeout"));

    // The timeout landed in the persisted event log.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let recorded = store
            .events()
            .iter()
            .any(|event| serde_json::to_string(event).unwrap().contains("policy.timeout"));
        if recorded {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "policy.timeout event recorded");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Body stream wrapper that flips a flag when the client side drops it.
struct DropTracked<S> {
    inner: S,
    dropped: Arc<AtomicBool>,
}

impl<S: futures::Stream + Unpin> futures::Stream for DropTracked<S> {
    type Item = S::Item;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        std::pin::Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl<S> Drop for DropTracked<S> {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn client_disconnect_cancels_the_upstream_stream() {
    #[derive(Clone)]
    struct UpstreamState {
        dropped: Arc<AtomicBool>,
    }

    async fn upstream(State(state): State<UpstreamState>) -> impl IntoResponse {
        let frames = futures::stream::iter(0..1000)
            .then(|i| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                let frame = json!({
                    "id": "chatcmpl-e2e", "object": "chat.completion.chunk", "created": 0, "model": "gpt-4o",
                    "choices": [{"index": 0, "delta": {"content": format!("chunk {i} ")}, "finish_reason": null}]
                });
                Ok::<_, std::convert::Infallible>(format!("data: {frame}\n\n"))
            });

        (
            [(header::CONTENT_TYPE, "text/event-stream")],
            Body::from_stream(DropTracked {
                inner: Box::pin(frames),
                dropped: state.dropped.clone(),
            }),
        )
    }

    let dropped = Arc::new(AtomicBool::new(false));
    let upstream_addr = spawn_app(
        Router::new()
            .route("/chat/completions", post(upstream))
            .with_state(UpstreamState {
                dropped: dropped.clone(),
            }),
    )
    .await;

    let (gateway_addr, _store) = spawn_gateway(upstream_addr, "openai", "", None).await;

    let response = client()
        .post(format!("http://{gateway_addr}/v1/chat/completions"))
        .bearer_auth(PROXY_KEY)
        .json(&json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true
        }))
        .send()
        .await
        .unwrap();

    // Read a few chunks, then hang up.
    let mut stream = response.bytes_stream();
    for _ in 0..3 {
        stream.next().await;
    }
    drop(stream);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !dropped.load(Ordering::SeqCst) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "upstream stream cancelled after client disconnect"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn anthropic_streaming_end_to_end() {
    async fn upstream() -> impl IntoResponse {
        let events = [
            (
                "message_start",
                json!({"type": "message_start", "message": {
                    "id": "msg_e2e", "type": "message", "role": "assistant", "content": [],
                    "model": "claude-sonnet-4-5", "usage": {"input_tokens": 9, "output_tokens": 0}
                }}),
            ),
            (
                "content_block_start",
                json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
            ),
            (
                "content_block_delta",
                json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hi there"}}),
            ),
            (
                "content_block_stop",
                json!({"type": "content_block_stop", "index": 0}),
            ),
            (
                "message_delta",
                json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 2}}),
            ),
            ("message_stop", json!({"type": "message_stop"})),
        ];

        let mut body = String::new();
        for (name, data) in events {
            body.push_str(&format!("event: {name}\ndata: {data}\n\n"));
        }

        ([(header::CONTENT_TYPE, "text/event-stream")], body)
    }

    let upstream_addr = spawn_app(Router::new().route("/messages", post(upstream))).await;
    let (gateway_addr, store) = spawn_gateway(upstream_addr, "anthropic", "", None).await;

    let response = client()
        .post(format!("http://{gateway_addr}/v1/messages"))
        .bearer_auth(PROXY_KEY)
        .json(&json!({
            "model": "claude-sonnet-4-5",
            "max_tokens": 128,
            "stream": true,
            "metadata": {"user_id": "user_ab12_account__session_11111111-2222-3333-4444-555555555555"},
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);

    let body = response.text().await.unwrap();

    let names: Vec<&str> = body.lines().filter_map(|l| l.strip_prefix("event: ")).collect();
    assert_eq!(
        names,
        vec![
            "message_start",
            "content_block_start",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );
    assert!(body.contains("Hi there"));
    assert!(body.contains(r#""stop_reason":"end_turn""#));

    // The session id was extracted from metadata.user_id.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let records = store.transactions();
        if let Some(record) = records.first() {
            assert_eq!(
                record.session_id.as_deref(),
                Some("11111111-2222-3333-4444-555555555555")
            );
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "transaction recorded");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

struct ToolBlockJudge;

#[async_trait]
impl Policy for ToolBlockJudge {
    fn name(&self) -> &str {
        "tool-judge"
    }

    fn buffering(&self) -> bool {
        true
    }

    async fn on_chunk_received(&self, _ctx: &mut PolicyContext, chunk: &Chunk) -> GatewayResult<ChunkDecision> {
        if chunk.finish_reason == Some(FinishReason::ToolCalls) {
            let mut stop = chunk.clone();
            stop.finish_reason = Some(FinishReason::Stop);
            return Ok(ChunkDecision::Replace(vec![stop]));
        }
        Ok(ChunkDecision::Pass)
    }

    async fn on_block_complete(
        &self,
        ctx: &mut PolicyContext,
        block: &gateway::policy::Block,
    ) -> GatewayResult<ChunkDecision> {
        if matches!(block, gateway::policy::Block::ToolCall { .. }) {
            let chunk = ctx.last_chunk().expect("streaming context").clone();
            return Ok(ChunkDecision::Replace(vec![
                chunk.with_content("This tool call was rejected."),
            ]));
        }
        Ok(ChunkDecision::Pass)
    }
}

#[tokio::test]
async fn anthropic_buffered_tool_call_replacement() {
    async fn upstream() -> impl IntoResponse {
        let events = [
            json!({"type": "message_start", "message": {
                "id": "msg_e2e", "type": "message", "role": "assistant", "content": [],
                "model": "claude-sonnet-4-5", "usage": {"input_tokens": 9, "output_tokens": 0}
            }}),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Let me delete that."}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "delete_everything", "input": {}}}),
            json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"target\":\"all\"}"}}),
            json!({"type": "content_block_stop", "index": 1}),
            json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 11}}),
            json!({"type": "message_stop"}),
        ];

        let mut body = String::new();
        for data in events {
            body.push_str(&format!("event: {}\ndata: {data}\n\n", data["type"].as_str().unwrap()));
        }

        ([(header::CONTENT_TYPE, "text/event-stream")], body)
    }

    let upstream_addr = spawn_app(Router::new().route("/messages", post(upstream))).await;

    let mut registry = PolicyRegistry::new();
    registry.register("tool-judge", |_| Ok(Arc::new(ToolBlockJudge)));

    let (gateway_addr, _store) = spawn_gateway(
        upstream_addr,
        "anthropic",
        "[[policy]]\nclass_ref = \"tool-judge\"\n",
        Some(registry),
    )
    .await;

    let response = client()
        .post(format!("http://{gateway_addr}/v1/messages"))
        .bearer_auth(PROXY_KEY)
        .json(&json!({
            "model": "claude-sonnet-4-5",
            "max_tokens": 128,
            "stream": true,
            "messages": [{"role": "user", "content": "clean up"}]
        }))
        .send()
        .await
        .unwrap();

    let body = response.text().await.unwrap();

    let names: Vec<&str> = body.lines().filter_map(|l| l.strip_prefix("event: ")).collect();
    assert_eq!(
        names,
        vec![
            "message_start",
            "content_block_start",
            "content_block_delta",
            "content_block_stop",
            "content_block_start",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );

    assert!(body.contains("This tool call was rejected."));
    assert!(!body.contains("delete_everything"));
    assert!(body.contains(r#""stop_reason":"end_turn""#));
}

#[tokio::test]
async fn activity_stream_reports_pipeline_events() {
    async fn upstream(Json(_): Json<Value>) -> Json<Value> {
        Json(json!({
            "id": "chatcmpl-act", "object": "chat.completion", "created": 0, "model": "gpt-4o",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "ok"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
        }))
    }

    let upstream_addr = spawn_app(Router::new().route("/chat/completions", post(upstream))).await;
    let (gateway_addr, _store) = spawn_gateway(upstream_addr, "openai", "", None).await;

    let activity = client()
        .get(format!("http://{gateway_addr}/activity/stream"))
        .bearer_auth(PROXY_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(activity.status(), 200);

    let mut activity_stream = activity.bytes_stream();

    // Trigger a transaction while subscribed.
    client()
        .post(format!("http://{gateway_addr}/v1/chat/completions"))
        .bearer_auth(PROXY_KEY)
        .json(&json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();

    let mut seen = String::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);

    while !seen.contains("pipeline.client_request") {
        assert!(tokio::time::Instant::now() < deadline, "activity event observed");

        if let Ok(Some(Ok(bytes))) =
            tokio::time::timeout(Duration::from_millis(500), activity_stream.next()).await
        {
            seen.push_str(&String::from_utf8_lossy(&bytes));
        }
    }

    assert!(seen.contains("transaction_id"));
}

#[tokio::test]
async fn health_needs_no_auth() {
    async fn upstream() -> Json<Value> {
        Json(json!({}))
    }

    let upstream_addr = spawn_app(Router::new().route("/chat/completions", post(upstream))).await;
    let (gateway_addr, _store) = spawn_gateway(upstream_addr, "openai", "", None).await;

    let response = client()
        .get(format!("http://{gateway_addr}/health"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
}
