//! Sequential composition of policies.
//!
//! Hooks run as a left-to-right fold in configured order. Injections from
//! earlier policies accumulate; the first policy to act decisively on an
//! event (replace, suppress, terminate) settles it, and policies later in
//! the chain observe only the resulting stream.

use std::sync::Arc;

use crate::{
    canonical::{Chunk, FinishReason, Request, Response, Usage},
    error::{GatewayError, GatewayResult},
    policy::{ChunkDecision, Policy, PolicyContext, RequestDecision, assembler::Block},
};

/// A streaming lifecycle event dispatched through the chain.
#[derive(Debug, Clone, Copy)]
pub(crate) enum HookEvent<'a> {
    /// A chunk arrived, before assembly.
    ChunkReceived(&'a Chunk),
    /// A block opened.
    BlockStarted(&'a Block),
    /// A text fragment.
    ContentDelta(&'a str),
    /// A tool-call fragment.
    ToolCallDelta {
        id: &'a str,
        name: Option<&'a str>,
        arguments: &'a str,
    },
    /// A thinking fragment.
    ThinkingDelta(&'a str),
    /// A block closed.
    BlockComplete(&'a Block),
    /// The stream completed.
    ResponseComplete {
        finish_reason: &'a FinishReason,
        usage: Option<&'a Usage>,
    },
}

/// What the executor should do with the chunk behind an event.
#[derive(Debug)]
pub(crate) enum ChunkAction {
    /// Emit the chunk unchanged.
    Pass,
    /// Emit these chunks instead.
    Replace(Vec<Chunk>),
    /// Emit nothing for this chunk.
    Suppress,
    /// Flush, then close the stream.
    Terminate { reason: String },
}

/// The folded outcome of dispatching one event through the chain.
#[derive(Debug)]
pub(crate) struct ChainVerdict {
    /// Injected chunks to emit before the action applies.
    pub chunks_before: Vec<Chunk>,
    /// The settled action for the underlying chunk.
    pub action: ChunkAction,
}

/// An ordered set of policies applied to every request.
#[derive(Clone)]
pub struct PolicyChain {
    policies: Vec<Arc<dyn Policy>>,
}

impl std::fmt::Debug for PolicyChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyChain")
            .field("policies", &self.policies.iter().map(|p| p.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl PolicyChain {
    /// A chain over the given policies, applied in order.
    pub fn new(policies: Vec<Arc<dyn Policy>>) -> Self {
        Self { policies }
    }

    /// The empty chain; observationally equivalent to having no policy.
    pub fn passthrough() -> Self {
        Self { policies: Vec::new() }
    }

    /// Human-readable chain description, e.g. `noop > judge`.
    pub fn class_name(&self) -> String {
        if self.policies.is_empty() {
            return "passthrough".to_string();
        }

        self.policies
            .iter()
            .map(|p| p.name())
            .collect::<Vec<_>>()
            .join(" > ")
    }

    /// Whether any policy in the chain requested block buffering.
    pub fn buffering(&self) -> bool {
        self.policies.iter().any(|p| p.buffering())
    }

    /// Run every policy's `initialize` hook, failing fast.
    pub async fn initialize_all(&self) -> anyhow::Result<()> {
        for policy in &self.policies {
            policy
                .initialize()
                .await
                .map_err(|e| anyhow::anyhow!("policy '{}' failed to initialize: {e}", policy.name()))?;
        }
        Ok(())
    }

    /// Run every policy's `shutdown` hook; failures are logged.
    pub async fn shutdown_all(&self) {
        for policy in &self.policies {
            if let Err(error) = policy.shutdown().await {
                log::warn!("policy '{}' failed to shut down: {error:#}", policy.name());
            }
        }
    }

    /// Request-side fold. A rejection surfaces as [`GatewayError::PolicyRejection`]
    /// and the upstream is never called.
    pub async fn on_request(&self, ctx: &mut PolicyContext, request: Request) -> GatewayResult<Request> {
        let mut current = request;

        for policy in &self.policies {
            match policy.on_request(ctx, current.clone()).await {
                Ok(RequestDecision::Continue(next)) => current = next,
                Ok(RequestDecision::Reject { message, status }) => {
                    return Err(GatewayError::PolicyRejection { message, status });
                }
                Err(error) if policy.best_effort() => {
                    log::warn!("best-effort policy '{}' failed in on_request: {error}", policy.name());
                }
                Err(error) => return Err(self.policy_error(policy.as_ref(), error)),
            }
        }

        Ok(current)
    }

    /// Non-streaming response fold.
    pub async fn on_response(&self, ctx: &mut PolicyContext, response: Response) -> GatewayResult<Response> {
        let mut current = response;

        for policy in &self.policies {
            match policy.on_response(ctx, current.clone()).await {
                Ok(next) => current = next,
                Err(error) if policy.best_effort() => {
                    log::warn!("best-effort policy '{}' failed in on_response: {error}", policy.name());
                }
                Err(error) => return Err(self.policy_error(policy.as_ref(), error)),
            }
        }

        Ok(current)
    }

    /// Dispatch one streaming lifecycle event through the chain.
    pub(crate) async fn dispatch(&self, ctx: &mut PolicyContext, event: HookEvent<'_>) -> GatewayResult<ChainVerdict> {
        let mut injected: Vec<Chunk> = Vec::new();

        for policy in &self.policies {
            let result = match event {
                HookEvent::ChunkReceived(chunk) => policy.on_chunk_received(ctx, chunk).await,
                HookEvent::BlockStarted(block) => policy.on_block_started(ctx, block).await,
                HookEvent::ContentDelta(text) => policy.on_content_delta(ctx, text).await,
                HookEvent::ToolCallDelta { id, name, arguments } => {
                    policy.on_tool_call_delta(ctx, id, name, arguments).await
                }
                HookEvent::ThinkingDelta(text) => policy.on_thinking_delta(ctx, text).await,
                HookEvent::BlockComplete(block) => policy.on_block_complete(ctx, block).await,
                HookEvent::ResponseComplete { finish_reason, usage } => {
                    policy.on_response_complete(ctx, finish_reason, usage).await
                }
            };

            let decision = match result {
                Ok(decision) => decision,
                Err(error) if policy.best_effort() => {
                    log::warn!("best-effort policy '{}' failed in a stream hook: {error}", policy.name());
                    continue;
                }
                Err(error) => return Err(self.policy_error(policy.as_ref(), error)),
            };

            match decision {
                ChunkDecision::Pass => {}
                ChunkDecision::Inject(mut chunks) => injected.append(&mut chunks),
                ChunkDecision::Replace(chunks) => {
                    return Ok(ChainVerdict {
                        chunks_before: injected,
                        action: ChunkAction::Replace(chunks),
                    });
                }
                ChunkDecision::Suppress => {
                    return Ok(ChainVerdict {
                        chunks_before: injected,
                        action: ChunkAction::Suppress,
                    });
                }
                ChunkDecision::Terminate { reason } => {
                    return Ok(ChainVerdict {
                        chunks_before: injected,
                        action: ChunkAction::Terminate { reason },
                    });
                }
            }
        }

        Ok(ChainVerdict {
            chunks_before: injected,
            action: ChunkAction::Pass,
        })
    }

    fn policy_error(&self, policy: &dyn Policy, error: GatewayError) -> GatewayError {
        GatewayError::PolicyError {
            policy: policy.name().to_string(),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        canonical::{Message, MessageContent, Role},
        events::EventEmitter,
        policy::NoopPolicy,
    };
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    fn request() -> Request {
        Request {
            model: "m".to_string(),
            messages: vec![Message {
                role: Role::User,
                content: MessageContent::Text("hi".to_string()),
                tool_call_id: None,
            }],
            system: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop_sequences: None,
            stream: true,
            tools: None,
            tool_choice: None,
            metadata: None,
            session_id: None,
        }
    }

    fn context() -> PolicyContext {
        PolicyContext::new(
            "tx".to_string(),
            Arc::new(request()),
            EventEmitter::new(),
            CancellationToken::new(),
        )
    }

    struct Rejecting;

    #[async_trait]
    impl Policy for Rejecting {
        fn name(&self) -> &str {
            "rejecting"
        }

        async fn on_request(&self, _ctx: &mut PolicyContext, _request: Request) -> GatewayResult<RequestDecision> {
            Ok(RequestDecision::Reject {
                message: "blocked".to_string(),
                status: None,
            })
        }
    }

    struct Failing {
        best_effort: bool,
    }

    #[async_trait]
    impl Policy for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn best_effort(&self) -> bool {
            self.best_effort
        }

        async fn on_content_delta(&self, _ctx: &mut PolicyContext, _text: &str) -> GatewayResult<ChunkDecision> {
            Err(GatewayError::Internal(Some("hook exploded".to_string())))
        }
    }

    struct Upcasing;

    #[async_trait]
    impl Policy for Upcasing {
        fn name(&self) -> &str {
            "upcasing"
        }

        async fn on_content_delta(&self, ctx: &mut PolicyContext, text: &str) -> GatewayResult<ChunkDecision> {
            let chunk = ctx.last_chunk().expect("chunk set during streaming").clone();
            Ok(ChunkDecision::Replace(vec![chunk.with_content(text.to_uppercase())]))
        }
    }

    #[tokio::test]
    async fn rejection_short_circuits_the_fold() {
        let chain = PolicyChain::new(vec![Arc::new(Rejecting), Arc::new(NoopPolicy)]);
        let mut ctx = context();

        let error = chain.on_request(&mut ctx, request()).await.unwrap_err();
        assert!(matches!(error, GatewayError::PolicyRejection { ref message, .. } if message == "blocked"));
    }

    #[tokio::test]
    async fn noop_chain_passes_requests_through() {
        let chain = PolicyChain::new(vec![Arc::new(NoopPolicy)]);
        let mut ctx = context();

        let result = chain.on_request(&mut ctx, request()).await.unwrap();
        assert_eq!(result.model, "m");
    }

    #[tokio::test]
    async fn replace_settles_the_event() {
        let chain = PolicyChain::new(vec![Arc::new(Upcasing), Arc::new(NoopPolicy)]);
        let mut ctx = context();
        ctx.set_last_chunk(crate::canonical::Chunk::text("s", "m", "hello"));

        let verdict = chain.dispatch(&mut ctx, HookEvent::ContentDelta("hello")).await.unwrap();

        let ChunkAction::Replace(chunks) = verdict.action else {
            unreachable!("expected replace");
        };
        assert_eq!(chunks[0].delta.content.as_deref(), Some("HELLO"));
    }

    #[tokio::test]
    async fn best_effort_failure_is_swallowed() {
        let chain = PolicyChain::new(vec![Arc::new(Failing { best_effort: true })]);
        let mut ctx = context();

        let verdict = chain.dispatch(&mut ctx, HookEvent::ContentDelta("x")).await.unwrap();
        assert!(matches!(verdict.action, ChunkAction::Pass));
    }

    #[tokio::test]
    async fn strict_failure_becomes_policy_error() {
        let chain = PolicyChain::new(vec![Arc::new(Failing { best_effort: false })]);
        let mut ctx = context();

        let error = chain.dispatch(&mut ctx, HookEvent::ContentDelta("x")).await.unwrap_err();
        assert!(matches!(error, GatewayError::PolicyError { ref policy, .. } if policy == "failing"));
    }

    #[test]
    fn class_name_joins_policy_names() {
        let chain = PolicyChain::new(vec![Arc::new(NoopPolicy), Arc::new(Upcasing)]);
        assert_eq!(chain.class_name(), "noop > upcasing");
        assert_eq!(PolicyChain::passthrough().class_name(), "passthrough");
    }
}
