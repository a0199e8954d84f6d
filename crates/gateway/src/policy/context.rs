//! Per-request policy context.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{
    canonical::{Chunk, Request},
    events::EventEmitter,
    policy::assembler::Block,
};

/// Everything a policy hook may reach for during one request.
///
/// The context is owned exclusively by the request task. It is created
/// before the request hooks fire and dropped after response completion,
/// taking the scratchpad with it.
pub struct PolicyContext {
    transaction_id: String,
    session_id: Option<String>,
    request: Arc<Request>,
    scratchpad: serde_json::Map<String, Value>,
    emitter: EventEmitter,
    cancellation: CancellationToken,
    blocks: Vec<Block>,
    last_chunk: Option<Chunk>,
}

impl PolicyContext {
    /// A fresh context for one request.
    pub fn new(
        transaction_id: String,
        request: Arc<Request>,
        emitter: EventEmitter,
        cancellation: CancellationToken,
    ) -> Self {
        let session_id = request.session_id.clone();
        Self {
            transaction_id,
            session_id,
            request,
            scratchpad: serde_json::Map::new(),
            emitter,
            cancellation,
            blocks: Vec::new(),
            last_chunk: None,
        }
    }

    /// The transaction id, equal to the client-visible `call_id`.
    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    /// The extracted session, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Immutable view of the current canonical request.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Swap in the post-policy request so response hooks see the final one.
    pub(crate) fn set_request(&mut self, request: Arc<Request>) {
        self.request = request;
    }

    /// Read access to the per-request scratchpad.
    pub fn scratchpad(&self) -> &serde_json::Map<String, Value> {
        &self.scratchpad
    }

    /// Append-only state shared between this request's hooks. Discarded at
    /// response completion.
    pub fn scratchpad_mut(&mut self) -> &mut serde_json::Map<String, Value> {
        &mut self.scratchpad
    }

    /// The pipeline event emitter.
    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    /// Cancellation signal shared by all tasks of this request.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// The latest assembled block list, valid during response processing.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// The last chunk received from upstream, valid during streaming.
    pub fn last_chunk(&self) -> Option<&Chunk> {
        self.last_chunk.as_ref()
    }

    pub(crate) fn set_blocks(&mut self, blocks: Vec<Block>) {
        self.blocks = blocks;
    }

    pub(crate) fn set_last_chunk(&mut self, chunk: Chunk) {
        self.last_chunk = Some(chunk);
    }
}
