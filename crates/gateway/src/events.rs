//! Structured pipeline events.
//!
//! Events flow from the pipeline to observers over a broadcast channel:
//! the activity stream endpoint multiplexes them to SSE subscribers, and a
//! background task forwards them to the persistence interface best-effort.
//! Emission never blocks and never fails the request.

use jiff::Timestamp;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::canonical::ClientFormat;

/// Default broadcast buffer; slow subscribers that fall further behind
/// than this lose events rather than exerting back-pressure.
const CHANNEL_CAPACITY: usize = 256;

/// One structured event at a pipeline boundary.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A client request entered the pipeline.
    #[serde(rename = "pipeline.client_request")]
    ClientRequest {
        /// Transaction this event belongs to.
        transaction_id: String,
        /// When the event fired.
        timestamp: Timestamp,
        /// Dialect the client speaks.
        client_format: ClientFormat,
        /// Requested model.
        model: String,
        /// Whether the client asked for streaming.
        stream: bool,
        /// Extracted session, if any.
        session_id: Option<String>,
    },

    /// Request-side policy hooks ran.
    #[serde(rename = "policy.on_request")]
    PolicyOnRequest {
        /// Transaction this event belongs to.
        transaction_id: String,
        /// When the event fired.
        timestamp: Timestamp,
        /// The configured policy chain.
        policy_class: String,
    },

    /// The canonical request was frozen into the transaction record.
    #[serde(rename = "transaction.request_recorded")]
    RequestRecorded {
        /// Transaction this event belongs to.
        transaction_id: String,
        /// When the event fired.
        timestamp: Timestamp,
    },

    /// The canonical request was sent upstream.
    #[serde(rename = "pipeline.upstream_request")]
    UpstreamRequest {
        /// Transaction this event belongs to.
        transaction_id: String,
        /// When the event fired.
        timestamp: Timestamp,
        /// Which provider was selected.
        provider: String,
        /// The model sent upstream.
        model: String,
    },

    /// A chunk passed through the policy executor.
    #[serde(rename = "policy.on_chunk")]
    PolicyOnChunk {
        /// Transaction this event belongs to.
        transaction_id: String,
        /// When the event fired.
        timestamp: Timestamp,
        /// Ordinal of the chunk within the stream.
        chunk_index: u64,
    },

    /// The canonical response was frozen into the transaction record.
    #[serde(rename = "transaction.response_recorded")]
    ResponseRecorded {
        /// Transaction this event belongs to.
        transaction_id: String,
        /// When the event fired.
        timestamp: Timestamp,
        /// Terminal finish reason, if the stream completed.
        finish_reason: Option<String>,
    },

    /// A policy terminated the stream early.
    #[serde(rename = "policy.terminated")]
    PolicyTerminated {
        /// Transaction this event belongs to.
        transaction_id: String,
        /// When the event fired.
        timestamp: Timestamp,
        /// The policy's stated reason.
        reason: String,
    },

    /// The pipeline stalled or hit its overall deadline.
    #[serde(rename = "policy.timeout")]
    PolicyTimeout {
        /// Transaction this event belongs to.
        transaction_id: String,
        /// When the event fired.
        timestamp: Timestamp,
        /// Whether the stall threshold or the overall deadline fired.
        kind: TimeoutKind,
    },

    /// The client went away mid-request.
    #[serde(rename = "pipeline.client_disconnected")]
    ClientDisconnected {
        /// Transaction this event belongs to.
        transaction_id: String,
        /// When the event fired.
        timestamp: Timestamp,
    },

    /// The pipeline failed.
    #[serde(rename = "pipeline.error")]
    Error {
        /// Transaction this event belongs to.
        transaction_id: String,
        /// When the event fired.
        timestamp: Timestamp,
        /// Error kind from the taxonomy.
        kind: String,
        /// Client-safe message.
        message: String,
    },
}

impl PipelineEvent {
    /// The transaction this event belongs to.
    pub fn transaction_id(&self) -> &str {
        match self {
            PipelineEvent::ClientRequest { transaction_id, .. }
            | PipelineEvent::PolicyOnRequest { transaction_id, .. }
            | PipelineEvent::RequestRecorded { transaction_id, .. }
            | PipelineEvent::UpstreamRequest { transaction_id, .. }
            | PipelineEvent::PolicyOnChunk { transaction_id, .. }
            | PipelineEvent::ResponseRecorded { transaction_id, .. }
            | PipelineEvent::PolicyTerminated { transaction_id, .. }
            | PipelineEvent::PolicyTimeout { transaction_id, .. }
            | PipelineEvent::ClientDisconnected { transaction_id, .. }
            | PipelineEvent::Error { transaction_id, .. } => transaction_id,
        }
    }
}

/// Which per-request timer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutKind {
    /// No forward progress within the stall threshold.
    Stall,
    /// Total request time exceeded the overall deadline.
    Deadline,
}

/// Fan-out handle for pipeline events.
///
/// Cloning is cheap; all clones publish to the same subscribers.
#[derive(Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    /// A new emitter with the default buffer.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish an event. Nothing listening is not an error.
    pub fn emit(&self, event: PipelineEvent) {
        log::debug!(
            "pipeline event for transaction {}: {event:?}",
            event.transaction_id()
        );
        let _ = self.sender.send(event);
    }

    /// Subscribe to the live event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

/// Timestamp helper used at every emission site.
pub fn now() -> Timestamp {
    Timestamp::now()
}
