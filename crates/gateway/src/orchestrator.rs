//! The streaming orchestrator.
//!
//! Two explicit bounded queues define the pipeline:
//!
//! ```text
//! upstream chunks ─► PolicyExecutor ─► policy chunks ─► ClientFormatter ─► wire frames ─► HTTP writer
//! ```
//!
//! Exactly four tasks run per streaming request: the upstream reader, the
//! executor, the formatter, and the timeout monitor. All four share one
//! cancellation token; client disconnects, stalls, and the overall
//! deadline each cancel the whole set, which in turn drops the upstream
//! stream and aborts the provider request.

pub(crate) mod accumulate;
pub(crate) mod executor;
pub(crate) mod formatter;
pub(crate) mod monitor;

use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    canonical::{Chunk, ClientFormat},
    events::EventEmitter,
    orchestrator::{executor::PolicyExecutor, formatter::ClientFormatter, monitor::{Keepalive, TimeoutMonitor}},
    policy::{PolicyChain, PolicyContext},
    provider::ChunkStream,
    store::{TransactionRecord, TransactionStore},
};

/// What travels on the queue between the executor and the formatter.
///
/// Block boundaries are explicit so the formatter can close a wire block
/// even when that block's chunks were replaced or suppressed by policy.
#[derive(Debug)]
pub(crate) enum PipelineItem {
    /// A canonical chunk bound for the client.
    Chunk(Chunk),
    /// The block the preceding chunks belonged to has settled.
    BlockBoundary,
}

/// Sizing and timing knobs, taken from configuration.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    /// Bounded size of each queue; a full queue suspends its producer,
    /// which propagates back-pressure all the way to the upstream read.
    pub queue_capacity: usize,
    /// No forward progress for this long fails the request.
    pub stall_threshold: Duration,
    /// Hard cap on total request time.
    pub overall_deadline: Duration,
}

/// Everything a streaming request brings to the orchestrator.
pub(crate) struct StreamSession {
    pub(crate) client_format: ClientFormat,
    pub(crate) chain: Arc<PolicyChain>,
    pub(crate) ctx: PolicyContext,
    pub(crate) emitter: EventEmitter,
    pub(crate) store: Arc<dyn TransactionStore>,
    pub(crate) record: TransactionRecord,
}

/// Start the per-request task set and return the wire-frame stream that
/// backs the HTTP response body.
///
/// Dropping the returned stream (client disconnect) tears the whole
/// pipeline down within one queue hop.
pub(crate) fn run(settings: OrchestratorSettings, session: StreamSession, upstream: ChunkStream) -> ReceiverStream<Bytes> {
    let StreamSession {
        client_format,
        chain,
        ctx,
        emitter,
        store,
        record,
    } = session;

    let transaction_id = record.transaction_id.clone();
    let cancellation = ctx.cancellation().clone();
    let keepalive = Keepalive::new();
    let timeout_kind = Arc::new(OnceLock::new());

    let (upstream_tx, upstream_rx) = mpsc::channel(settings.queue_capacity);
    let (policy_tx, policy_rx) = mpsc::channel(settings.queue_capacity);
    let (frames_tx, frames_rx) = mpsc::channel(settings.queue_capacity);

    // Upstream reader: pushes provider chunks into the first queue and
    // closes it at provider end-of-stream. Cancellation drops the stream,
    // aborting the underlying provider request.
    {
        let cancellation = cancellation.clone();
        let keepalive = keepalive.clone();
        tokio::spawn(async move {
            let mut upstream = upstream;
            loop {
                let item = tokio::select! {
                    _ = cancellation.cancelled() => break,
                    item = upstream.next() => item,
                };

                let Some(item) = item else { break };
                keepalive.touch();

                if upstream_tx.send(item).await.is_err() {
                    break;
                }
            }
        });
    }

    tokio::spawn(
        PolicyExecutor {
            chain,
            ctx,
            upstream_rx,
            policy_tx,
            keepalive: keepalive.clone(),
            cancellation: cancellation.clone(),
            emitter: emitter.clone(),
            store,
            record,
        }
        .run(),
    );

    tokio::spawn(
        ClientFormatter {
            format: client_format,
            policy_rx,
            frames_tx,
            keepalive: keepalive.clone(),
            cancellation: cancellation.clone(),
            timeout_kind: timeout_kind.clone(),
            emitter: emitter.clone(),
            transaction_id: transaction_id.clone(),
        }
        .run(),
    );

    tokio::spawn(
        TimeoutMonitor {
            keepalive,
            stall_threshold: settings.stall_threshold,
            overall_deadline: settings.overall_deadline,
            cancellation,
            timeout_kind,
            emitter,
            transaction_id,
        }
        .run(),
    );

    ReceiverStream::new(frames_rx)
}
