//! Persistence interface and the transaction record.
//!
//! The gateway treats storage as an interface: implementations may write to
//! a relational store, a key/value store, or nothing at all. All writes are
//! best-effort; a failing store never affects client behavior.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use jiff::Timestamp;
use serde::Serialize;

use crate::{
    canonical::{ClientFormat, Request, Response},
    events::PipelineEvent,
};

/// One client request and its entire pipeline execution.
///
/// Created by the pipeline processor at ingress, mutated only by the
/// processor and the orchestrator, frozen after completion and handed to
/// the store.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionRecord {
    /// Stable id, equal to the `call_id` exposed to the client.
    pub transaction_id: String,
    /// Extracted session, if any.
    pub session_id: Option<String>,
    /// The configured policy chain, e.g. `noop > judge`.
    pub policy_class: String,
    /// Dialect the client spoke.
    pub client_format: ClientFormat,
    /// Whether the response streamed.
    pub stream: bool,
    /// The canonical request as parsed from the client.
    pub original_request: Option<Request>,
    /// The canonical request after request-side policy.
    pub final_request: Option<Request>,
    /// The canonical response as produced by the provider.
    pub original_response: Option<Response>,
    /// The canonical response after response-side policy.
    pub final_response: Option<Response>,
    /// Phase timestamps, filled in as the pipeline advances.
    pub phases: PhaseTimestamps,
}

impl TransactionRecord {
    /// A fresh record at ingress time.
    pub fn new(transaction_id: String, client_format: ClientFormat, stream: bool, policy_class: String) -> Self {
        Self {
            transaction_id,
            session_id: None,
            policy_class,
            client_format,
            stream,
            original_request: None,
            final_request: None,
            original_response: None,
            final_response: None,
            phases: PhaseTimestamps {
                received: Timestamp::now(),
                request_processed: None,
                upstream_sent: None,
                response_processed: None,
                completed: None,
            },
        }
    }
}

/// When each pipeline phase finished.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseTimestamps {
    /// Request arrived.
    pub received: Timestamp,
    /// Request-side policy done.
    pub request_processed: Option<Timestamp>,
    /// Upstream call issued.
    pub upstream_sent: Option<Timestamp>,
    /// Response-side policy done.
    pub response_processed: Option<Timestamp>,
    /// Transaction frozen.
    pub completed: Option<Timestamp>,
}

/// Storage interface for transaction records and pipeline events.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Persist a completed (or rejected) transaction.
    async fn record_transaction(&self, record: &TransactionRecord) -> anyhow::Result<()>;

    /// Persist a single pipeline event.
    async fn record_event(&self, event: &PipelineEvent) -> anyhow::Result<()>;
}

/// Persist a record, logging instead of failing.
pub async fn record_best_effort(store: &Arc<dyn TransactionStore>, record: &TransactionRecord) {
    if let Err(error) = store.record_transaction(record).await {
        log::warn!(
            "failed to persist transaction {}: {error:#}",
            record.transaction_id
        );
    }
}

/// In-memory store used by default and in tests.
#[derive(Default)]
pub struct MemoryStore {
    transactions: Mutex<Vec<TransactionRecord>>,
    events: Mutex<Vec<PipelineEvent>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of persisted transactions.
    pub fn transactions(&self) -> Vec<TransactionRecord> {
        self.transactions.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Snapshot of persisted events.
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn record_transaction(&self, record: &TransactionRecord) -> anyhow::Result<()> {
        self.transactions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }

    async fn record_event(&self, event: &PipelineEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_keeps_records() {
        let store = MemoryStore::new();

        let record = TransactionRecord::new(
            "tx-1".to_string(),
            ClientFormat::Openai,
            false,
            "noop".to_string(),
        );
        store.record_transaction(&record).await.unwrap();

        let stored = store.transactions();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].transaction_id, "tx-1");
        assert!(stored[0].final_request.is_none());
    }
}
