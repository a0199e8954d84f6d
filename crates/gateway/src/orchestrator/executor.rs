//! The policy executor task.
//!
//! Consumes upstream chunks, drives the block assembler and the policy
//! chain, honors buffering and suppression, and writes the surviving
//! items to the formatter queue. Also owns both response accumulators,
//! so the transaction record freezes here at completion.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    canonical::{Chunk, FinishReason},
    error::{GatewayError, GatewayResult},
    events::{EventEmitter, PipelineEvent, now},
    orchestrator::{PipelineItem, accumulate::ResponseAccumulator, monitor::Keepalive},
    policy::{
        BlockAssembler, PolicyChain, PolicyContext,
        assembler::BlockEvent,
        chain::{ChunkAction, HookEvent},
    },
    store::{TransactionRecord, TransactionStore, record_best_effort},
};

pub(crate) struct PolicyExecutor {
    pub(crate) chain: Arc<PolicyChain>,
    pub(crate) ctx: PolicyContext,
    pub(crate) upstream_rx: mpsc::Receiver<GatewayResult<Chunk>>,
    pub(crate) policy_tx: mpsc::Sender<GatewayResult<PipelineItem>>,
    pub(crate) keepalive: Keepalive,
    pub(crate) cancellation: CancellationToken,
    pub(crate) emitter: EventEmitter,
    pub(crate) store: Arc<dyn TransactionStore>,
    pub(crate) record: TransactionRecord,
}

/// Mutable streaming state, separate from the task plumbing.
struct StreamState {
    assembler: BlockAssembler,
    original: ResponseAccumulator,
    r#final: ResponseAccumulator,
    held: Vec<Chunk>,
    chunk_index: u64,
    finish_reason: Option<FinishReason>,
    terminated: Option<String>,
}

impl PolicyExecutor {
    pub(crate) async fn run(mut self) {
        let buffering = self.chain.buffering();

        let mut state = StreamState {
            assembler: BlockAssembler::new(),
            original: ResponseAccumulator::new(),
            r#final: ResponseAccumulator::new(),
            held: Vec::new(),
            chunk_index: 0,
            finish_reason: None,
            terminated: None,
        };

        loop {
            let item = tokio::select! {
                _ = self.cancellation.cancelled() => break,
                item = self.upstream_rx.recv() => item,
            };

            let Some(item) = item else {
                // Upstream closed without a finish reason; flush whatever
                // buffering still holds and wind down.
                let held: Vec<Chunk> = state.held.drain(..).collect();
                for chunk in held {
                    if !self.send_chunk(&mut state, chunk).await {
                        break;
                    }
                }
                break;
            };

            let chunk = match item {
                Ok(chunk) => chunk,
                Err(error) => {
                    self.emit_error(&error);
                    let _ = self.policy_tx.send(Err(error)).await;
                    break;
                }
            };

            self.keepalive.touch();

            match self.process_chunk(&mut state, chunk, buffering).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(error) => {
                    self.emit_error(&error);
                    let _ = self.policy_tx.send(Err(error)).await;
                    break;
                }
            }

            self.keepalive.touch();

            if state.finish_reason.is_some() || state.terminated.is_some() {
                break;
            }
        }

        self.complete(state).await;
    }

    /// Process one upstream chunk. Returns `Ok(false)` when the client is
    /// gone and the pipeline should wind down.
    async fn process_chunk(&mut self, state: &mut StreamState, chunk: Chunk, buffering: bool) -> GatewayResult<bool> {
        state.original.ingest(&chunk);
        state.chunk_index += 1;
        self.ctx.set_last_chunk(chunk.clone());

        self.emitter.emit(PipelineEvent::PolicyOnChunk {
            transaction_id: self.ctx.transaction_id().to_string(),
            timestamp: now(),
            chunk_index: state.chunk_index,
        });

        let mut flush: Vec<PipelineItem> = Vec::new();
        let mut current: Vec<Chunk> = Vec::new();

        // 1. on_chunk_received, before assembly.
        let verdict = self.chain.dispatch(&mut self.ctx, HookEvent::ChunkReceived(&chunk)).await?;
        flush.extend(verdict.chunks_before.into_iter().map(PipelineItem::Chunk));
        match verdict.action {
            ChunkAction::Pass => current.push(chunk.clone()),
            ChunkAction::Replace(chunks) => current = chunks,
            ChunkAction::Suppress => {}
            ChunkAction::Terminate { reason } => state.terminated = Some(reason),
        }

        // 2. Assembly runs on the original chunk regardless of the verdict,
        //    so tool-call arguments keep accumulating even when suppressed.
        let events = state.assembler.ingest(&chunk);
        self.ctx.set_blocks(state.assembler.blocks().to_vec());

        for event in &events {
            if state.terminated.is_some() {
                break;
            }

            if let BlockEvent::ResponseCompleted { finish_reason, .. } = event {
                state.finish_reason = Some(finish_reason.clone());
            }

            let hook_event = match event {
                BlockEvent::BlockStarted(block) => HookEvent::BlockStarted(block),
                BlockEvent::ContentDelta(text) => HookEvent::ContentDelta(text),
                BlockEvent::ToolCallDelta { id, name, arguments } => HookEvent::ToolCallDelta {
                    id,
                    name: name.as_deref(),
                    arguments,
                },
                BlockEvent::ThinkingDelta(text) => HookEvent::ThinkingDelta(text),
                BlockEvent::BlockCompleted(block) => HookEvent::BlockComplete(block),
                BlockEvent::ResponseCompleted { finish_reason, usage } => HookEvent::ResponseComplete {
                    finish_reason,
                    usage: usage.as_ref(),
                },
            };

            let verdict = self.chain.dispatch(&mut self.ctx, hook_event).await?;
            flush.extend(verdict.chunks_before.into_iter().map(PipelineItem::Chunk));

            let completes_block = matches!(event, BlockEvent::BlockCompleted(_));

            match verdict.action {
                ChunkAction::Pass => {}
                ChunkAction::Replace(chunks) => {
                    if completes_block && buffering {
                        // The whole held block is replaced before any of
                        // its bytes reach the client.
                        state.held = chunks;
                    } else {
                        current = chunks;
                    }
                }
                ChunkAction::Suppress => {
                    if completes_block && buffering {
                        state.held.clear();
                    } else {
                        current.clear();
                    }
                }
                ChunkAction::Terminate { reason } => state.terminated = Some(reason),
            }

            if completes_block {
                // The settled block goes out, followed by an explicit
                // boundary so the formatter closes its wire block even
                // when the block's chunks were replaced or suppressed.
                flush.extend(state.held.drain(..).map(PipelineItem::Chunk));
                flush.push(PipelineItem::BlockBoundary);
            }
        }

        // 3. Attribute the surviving chunk: held while its block is open
        //    under buffering, emitted otherwise.
        if buffering && state.terminated.is_none() && !state.assembler.is_finished() {
            state.held.extend(current);
        } else {
            flush.extend(current.into_iter().map(PipelineItem::Chunk));
        }

        for item in flush {
            if !self.send_item(state, item).await {
                return Ok(false);
            }
        }

        if let Some(reason) = state.terminated.clone() {
            return self.terminate(state, reason).await;
        }

        Ok(true)
    }

    /// A policy asked to close the stream: flush buffers, fire the
    /// response-complete hook, emit a synthetic terminal chunk, and stop
    /// consuming upstream.
    async fn terminate(&mut self, state: &mut StreamState, reason: String) -> GatewayResult<bool> {
        log::info!(
            "policy terminated stream for transaction {}: {reason}",
            self.ctx.transaction_id()
        );

        self.emitter.emit(PipelineEvent::PolicyTerminated {
            transaction_id: self.ctx.transaction_id().to_string(),
            timestamp: now(),
            reason,
        });

        let held: Vec<Chunk> = state.held.drain(..).collect();
        for chunk in held {
            if !self.send_chunk(state, chunk).await {
                return Ok(false);
            }
        }

        let finish_reason = FinishReason::Stop;
        let verdict = self
            .chain
            .dispatch(
                &mut self.ctx,
                HookEvent::ResponseComplete {
                    finish_reason: &finish_reason,
                    usage: None,
                },
            )
            .await?;

        for chunk in verdict.chunks_before {
            if !self.send_chunk(state, chunk).await {
                return Ok(false);
            }
        }

        let (id, model) = stream_identity(&self.ctx);
        let terminal = Chunk::finish(id, model, finish_reason.clone());
        if !self.send_chunk(state, terminal).await {
            return Ok(false);
        }

        state.finish_reason = Some(finish_reason);
        Ok(false)
    }

    async fn send_chunk(&self, state: &mut StreamState, chunk: Chunk) -> bool {
        self.send_item(state, PipelineItem::Chunk(chunk)).await
    }

    /// Returns false when the formatter (and therefore the client) is gone.
    async fn send_item(&self, state: &mut StreamState, item: PipelineItem) -> bool {
        if let PipelineItem::Chunk(chunk) = &item {
            state.r#final.ingest(chunk);
        }

        if self.policy_tx.send(Ok(item)).await.is_err() {
            return false;
        }

        self.keepalive.touch();
        true
    }

    fn emit_error(&self, error: &GatewayError) {
        log::error!(
            "policy executor failed for transaction {}: {error}",
            self.ctx.transaction_id()
        );
        self.emitter.emit(PipelineEvent::Error {
            transaction_id: self.ctx.transaction_id().to_string(),
            timestamp: now(),
            kind: error.error_type().to_string(),
            message: error.client_message(),
        });
    }

    /// Freeze and persist the transaction record. Skipped after a client
    /// disconnect so a gone client causes no further persistence writes.
    async fn complete(mut self, state: StreamState) {
        let finish_reason = state.finish_reason.clone();
        self.record.original_response = state.original.finish();
        self.record.final_response = state.r#final.finish();
        self.record.phases.response_processed = Some(now());
        self.record.phases.completed = Some(now());

        if self.cancellation.is_cancelled() {
            log::debug!(
                "skipping persistence for cancelled transaction {}",
                self.record.transaction_id
            );
            return;
        }

        record_best_effort(&self.store, &self.record).await;

        self.emitter.emit(PipelineEvent::ResponseRecorded {
            transaction_id: self.record.transaction_id.clone(),
            timestamp: now(),
            finish_reason: finish_reason.map(|reason| reason.to_string()),
        });
    }
}

fn stream_identity(ctx: &PolicyContext) -> (String, String) {
    match ctx.last_chunk() {
        Some(chunk) => (chunk.id.clone(), chunk.model.clone()),
        None => (String::new(), ctx.request().model.clone()),
    }
}
