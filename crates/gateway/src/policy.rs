//! The policy engine.
//!
//! A [`Policy`] observes, transforms, blocks, or injects content at fixed
//! points of the request/response lifecycle. Concrete policies implement
//! any subset of the hooks; the defaults are identity. Policies never
//! mutate their inputs; every modification is expressed by returning a
//! decision with new values.

pub(crate) mod assembler;
pub(crate) mod chain;
pub(crate) mod context;
pub(crate) mod registry;

use async_trait::async_trait;

pub use assembler::{Block, BlockAssembler, BlockEvent};
pub use chain::PolicyChain;
pub use context::PolicyContext;
pub use registry::PolicyRegistry;

use crate::{
    canonical::{Chunk, FinishReason, Request, Response, Usage},
    error::GatewayResult,
};

/// Outcome of a request-side hook.
#[derive(Debug)]
pub enum RequestDecision {
    /// Forward this (possibly modified) request.
    Continue(Request),
    /// Refuse the request; the upstream is never called.
    Reject {
        /// Message surfaced to the client verbatim.
        message: String,
        /// Override HTTP status; defaults to 400.
        status: Option<u16>,
    },
}

/// Outcome of a streaming hook.
#[derive(Debug)]
pub enum ChunkDecision {
    /// Pass the underlying chunk through unchanged.
    Pass,
    /// Emit these chunks instead of the underlying one.
    Replace(Vec<Chunk>),
    /// Drop the chunk. Tool-call arguments are still accumulated in the
    /// assembler even when their chunks are suppressed.
    Suppress,
    /// Prepend these chunks, then continue with the underlying one.
    Inject(Vec<Chunk>),
    /// Close the stream cleanly after flushing pending output.
    Terminate {
        /// Reason recorded in events and logs.
        reason: String,
    },
}

/// A unit of observation, transformation, blocking, or injection.
///
/// Hooks are async; a policy may call out to an upstream LLM from inside a
/// hook (the judge pattern). Per-request state belongs in
/// [`PolicyContext::scratchpad_mut`] and dies with the request; a policy
/// that keeps process-wide state must create it in [`Policy::initialize`].
#[async_trait]
pub trait Policy: Send + Sync {
    /// Registry name of this policy.
    fn name(&self) -> &str;

    /// When true, the orchestrator holds outbound chunks until the
    /// enclosing block completes, so `on_block_complete` can rewrite a
    /// whole block before any of its bytes reach the client.
    fn buffering(&self) -> bool {
        false
    }

    /// When true, errors from this policy's hooks are logged and treated
    /// as pass-through instead of failing the stream.
    fn best_effort(&self) -> bool {
        false
    }

    /// Called once at process startup.
    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once at process shutdown.
    async fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Request-side hook; may modify or reject the request.
    async fn on_request(&self, ctx: &mut PolicyContext, request: Request) -> GatewayResult<RequestDecision> {
        let _ = ctx;
        Ok(RequestDecision::Continue(request))
    }

    /// Non-streaming response hook; may modify or replace the response.
    async fn on_response(&self, ctx: &mut PolicyContext, response: Response) -> GatewayResult<Response> {
        let _ = ctx;
        Ok(response)
    }

    /// Fires for every chunk before assembly.
    async fn on_chunk_received(&self, ctx: &mut PolicyContext, chunk: &Chunk) -> GatewayResult<ChunkDecision> {
        let _ = (ctx, chunk);
        Ok(ChunkDecision::Pass)
    }

    /// Fires when a block opens.
    async fn on_block_started(&self, ctx: &mut PolicyContext, block: &Block) -> GatewayResult<ChunkDecision> {
        let _ = (ctx, block);
        Ok(ChunkDecision::Pass)
    }

    /// Fires for each text fragment.
    async fn on_content_delta(&self, ctx: &mut PolicyContext, text: &str) -> GatewayResult<ChunkDecision> {
        let _ = (ctx, text);
        Ok(ChunkDecision::Pass)
    }

    /// Fires for each tool-call fragment. `name` is present on the first
    /// fragment of a call only.
    async fn on_tool_call_delta(
        &self,
        ctx: &mut PolicyContext,
        id: &str,
        name: Option<&str>,
        arguments: &str,
    ) -> GatewayResult<ChunkDecision> {
        let _ = (ctx, id, name, arguments);
        Ok(ChunkDecision::Pass)
    }

    /// Fires for each thinking fragment.
    async fn on_thinking_delta(&self, ctx: &mut PolicyContext, text: &str) -> GatewayResult<ChunkDecision> {
        let _ = (ctx, text);
        Ok(ChunkDecision::Pass)
    }

    /// Fires when a block closes, with the fully assembled block.
    async fn on_block_complete(&self, ctx: &mut PolicyContext, block: &Block) -> GatewayResult<ChunkDecision> {
        let _ = (ctx, block);
        Ok(ChunkDecision::Pass)
    }

    /// Fires exactly once per stream, after the terminal chunk.
    async fn on_response_complete(
        &self,
        ctx: &mut PolicyContext,
        finish_reason: &FinishReason,
        usage: Option<&Usage>,
    ) -> GatewayResult<ChunkDecision> {
        let _ = (ctx, finish_reason, usage);
        Ok(ChunkDecision::Pass)
    }
}

/// The identity policy; observes nothing and changes nothing.
pub struct NoopPolicy;

#[async_trait]
impl Policy for NoopPolicy {
    fn name(&self) -> &str {
        "noop"
    }
}
