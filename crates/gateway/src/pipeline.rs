//! The pipeline processor: the single request-handling path used by both
//! client dialects.
//!
//! Phases run in order (process_request, send_upstream, process_response,
//! send_to_client), with the transaction record accumulating phase
//! timestamps and the canonical request/response pairs as the pipeline
//! advances. `transaction_id` equals the client-visible `call_id` and is
//! stamped on every event and record.

use std::sync::Arc;

use bytes::Bytes;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::{
    canonical::{ClientFormat, Request, Response},
    error::{GatewayError, GatewayResult},
    events::{EventEmitter, PipelineEvent, now},
    orchestrator::{self, OrchestratorSettings, StreamSession},
    policy::{PolicyChain, PolicyContext},
    provider::UpstreamRouter,
    store::{TransactionRecord, TransactionStore, record_best_effort},
};

/// What a handled request produced.
pub(crate) enum PipelineOutcome {
    /// A complete canonical response, ready for dialect formatting.
    Completed(Response),
    /// A live stream of pre-rendered wire frames.
    Streaming(ReceiverStream<Bytes>),
}

impl std::fmt::Debug for PipelineOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineOutcome::Completed(response) => {
                f.debug_tuple("Completed").field(response).finish()
            }
            PipelineOutcome::Streaming(_) => f.debug_tuple("Streaming").field(&"<stream>").finish(),
        }
    }
}

/// Result of a pipeline execution, carrying the transaction id even on
/// failure so handlers can echo the `call_id` header.
pub(crate) struct Processed {
    pub(crate) transaction_id: String,
    pub(crate) result: GatewayResult<PipelineOutcome>,
}

pub(crate) struct PipelineProcessor {
    pub(crate) chain: Arc<PolicyChain>,
    pub(crate) router: UpstreamRouter,
    pub(crate) store: Arc<dyn TransactionStore>,
    pub(crate) emitter: EventEmitter,
    pub(crate) settings: OrchestratorSettings,
}

impl PipelineProcessor {
    /// Run one request through the full pipeline.
    pub(crate) async fn execute(&self, request: Request, format: ClientFormat) -> Processed {
        let transaction_id = uuid::Uuid::new_v4().to_string();

        let result = self.run(transaction_id.clone(), request, format).await;

        if let Err(error) = &result {
            self.emitter.emit(PipelineEvent::Error {
                transaction_id: transaction_id.clone(),
                timestamp: now(),
                kind: error.error_type().to_string(),
                message: error.client_message(),
            });
        }

        Processed {
            transaction_id,
            result,
        }
    }

    async fn run(
        &self,
        transaction_id: String,
        request: Request,
        format: ClientFormat,
    ) -> GatewayResult<PipelineOutcome> {
        // Phase 1: process_request.
        request.validate()?;

        let mut record = TransactionRecord::new(
            transaction_id.clone(),
            format,
            request.stream,
            self.chain.class_name(),
        );
        record.session_id = request.session_id.clone();
        record.original_request = Some(request.clone());

        self.emitter.emit(PipelineEvent::ClientRequest {
            transaction_id: transaction_id.clone(),
            timestamp: now(),
            client_format: format,
            model: request.model.clone(),
            stream: request.stream,
            session_id: request.session_id.clone(),
        });

        let cancellation = CancellationToken::new();
        let mut ctx = PolicyContext::new(
            transaction_id.clone(),
            Arc::new(request.clone()),
            self.emitter.clone(),
            cancellation,
        );

        let final_request = match self.chain.on_request(&mut ctx, request).await {
            Ok(final_request) => final_request,
            Err(error) => {
                // The upstream is never called; the record freezes with no
                // final request.
                record.phases.completed = Some(now());
                record_best_effort(&self.store, &record).await;
                return Err(error);
            }
        };

        self.emitter.emit(PipelineEvent::PolicyOnRequest {
            transaction_id: transaction_id.clone(),
            timestamp: now(),
            policy_class: self.chain.class_name(),
        });

        record.final_request = Some(final_request.clone());
        record.phases.request_processed = Some(now());
        ctx.set_request(Arc::new(final_request.clone()));

        self.emitter.emit(PipelineEvent::RequestRecorded {
            transaction_id: transaction_id.clone(),
            timestamp: now(),
        });

        // Phase 2: send_upstream.
        let (provider_name, client) = match self.router.client_for(&final_request.model) {
            Ok(route) => route,
            Err(error) => {
                record.phases.completed = Some(now());
                record_best_effort(&self.store, &record).await;
                return Err(error);
            }
        };

        record.phases.upstream_sent = Some(now());
        self.emitter.emit(PipelineEvent::UpstreamRequest {
            transaction_id: transaction_id.clone(),
            timestamp: now(),
            provider: provider_name.to_string(),
            model: final_request.model.clone(),
        });

        // Phase 3 and 4: process_response / send_to_client.
        if final_request.stream {
            self.stream_response(final_request, format, ctx, record, client).await
        } else {
            self.complete_response(final_request, ctx, record, client).await
        }
    }

    async fn complete_response(
        &self,
        request: Request,
        mut ctx: PolicyContext,
        mut record: TransactionRecord,
        client: Arc<dyn crate::provider::UpstreamClient>,
    ) -> GatewayResult<PipelineOutcome> {
        let response = match client.complete(request).await {
            Ok(response) => response,
            Err(error) => {
                record.phases.completed = Some(now());
                record_best_effort(&self.store, &record).await;
                return Err(error);
            }
        };

        record.original_response = Some(response.clone());

        let final_response = self.chain.on_response(&mut ctx, response).await?;

        record.final_response = Some(final_response.clone());
        record.phases.response_processed = Some(now());
        record.phases.completed = Some(now());
        record_best_effort(&self.store, &record).await;

        let finish_reason = final_response
            .choices
            .first()
            .and_then(|choice| choice.finish_reason.as_ref())
            .map(|reason| reason.to_string());

        self.emitter.emit(PipelineEvent::ResponseRecorded {
            transaction_id: record.transaction_id.clone(),
            timestamp: now(),
            finish_reason,
        });

        Ok(PipelineOutcome::Completed(final_response))
    }

    async fn stream_response(
        &self,
        request: Request,
        format: ClientFormat,
        ctx: PolicyContext,
        mut record: TransactionRecord,
        client: Arc<dyn crate::provider::UpstreamClient>,
    ) -> GatewayResult<PipelineOutcome> {
        let upstream = match client.stream(request).await {
            Ok(upstream) => upstream,
            Err(error) => {
                record.phases.completed = Some(now());
                record_best_effort(&self.store, &record).await;
                return Err(error);
            }
        };

        let frames = orchestrator::run(
            self.settings,
            StreamSession {
                client_format: format,
                chain: self.chain.clone(),
                ctx,
                emitter: self.emitter.clone(),
                store: self.store.clone(),
                record,
            },
            upstream,
        );

        Ok(PipelineOutcome::Streaming(frames))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        canonical::{Chunk, FinishReason, Message, Role},
        policy::{Policy, RequestDecision},
        provider::{ChunkStream, UpstreamClient},
        store::MemoryStore,
    };
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Debug)]
    struct ScriptedUpstream {
        text: String,
    }

    #[async_trait]
    impl UpstreamClient for ScriptedUpstream {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: Request) -> GatewayResult<Response> {
            Ok(Response {
                id: "resp-1".to_string(),
                model: request.model,
                choices: vec![crate::canonical::Choice {
                    index: 0,
                    message: Message::text(Role::Assistant, self.text.clone()),
                    finish_reason: Some(FinishReason::Stop),
                }],
                usage: None,
            })
        }

        async fn stream(&self, request: Request) -> GatewayResult<ChunkStream> {
            let chunks = vec![
                Ok(Chunk::text("resp-1", request.model.clone(), self.text.clone())),
                Ok(Chunk::finish("resp-1", request.model, FinishReason::Stop)),
            ];
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    fn processor_with(chain: PolicyChain, store: Arc<MemoryStore>) -> PipelineProcessor {
        let router = UpstreamRouter::with_client(
            "scripted",
            config::ModelPattern::new(".*").unwrap(),
            Arc::new(ScriptedUpstream {
                text: "hello from upstream".to_string(),
            }),
        );

        PipelineProcessor {
            chain: Arc::new(chain),
            router,
            store,
            emitter: EventEmitter::new(),
            settings: OrchestratorSettings {
                queue_capacity: 8,
                stall_threshold: Duration::from_secs(5),
                overall_deadline: Duration::from_secs(30),
            },
        }
    }

    fn request(stream: bool) -> Request {
        Request {
            model: "gpt-4o".to_string(),
            messages: vec![Message::text(Role::User, "hi")],
            system: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop_sequences: None,
            stream,
            tools: None,
            tool_choice: None,
            metadata: None,
            session_id: None,
        }
    }

    struct RejectAll;

    #[async_trait]
    impl Policy for RejectAll {
        fn name(&self) -> &str {
            "reject-all"
        }

        async fn on_request(&self, _ctx: &mut PolicyContext, _request: Request) -> GatewayResult<RequestDecision> {
            Ok(RequestDecision::Reject {
                message: "blocked".to_string(),
                status: None,
            })
        }
    }

    #[tokio::test]
    async fn non_streaming_passthrough_records_equal_requests_and_responses() {
        let store = Arc::new(MemoryStore::new());
        let processor = processor_with(PolicyChain::passthrough(), store.clone());

        let processed = processor.execute(request(false), ClientFormat::Openai).await;

        let PipelineOutcome::Completed(response) = processed.result.unwrap() else {
            unreachable!("expected a completed response");
        };
        assert_eq!(response.primary_text(), "hello from upstream");

        let records = store.transactions();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.transaction_id, processed.transaction_id);
        assert_eq!(
            serde_json::to_value(&record.original_request).unwrap(),
            serde_json::to_value(&record.final_request).unwrap()
        );
        assert_eq!(
            serde_json::to_value(&record.original_response).unwrap(),
            serde_json::to_value(&record.final_response).unwrap()
        );
        assert!(record.phases.completed.is_some());
    }

    #[tokio::test]
    async fn streaming_requests_return_wire_frames() {
        use futures::StreamExt;

        let store = Arc::new(MemoryStore::new());
        let processor = processor_with(PolicyChain::passthrough(), store.clone());

        let processed = processor.execute(request(true), ClientFormat::Openai).await;

        let PipelineOutcome::Streaming(frames) = processed.result.unwrap() else {
            unreachable!("expected a stream");
        };

        let body: String = frames
            .collect::<Vec<_>>()
            .await
            .iter()
            .map(|b| String::from_utf8(b.to_vec()).unwrap())
            .collect();

        assert!(body.contains("hello from upstream"));
        assert!(body.ends_with("data: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn rejected_requests_freeze_with_no_final_request() {
        let store = Arc::new(MemoryStore::new());
        let processor = processor_with(PolicyChain::new(vec![Arc::new(RejectAll)]), store.clone());

        let processed = processor.execute(request(false), ClientFormat::Openai).await;

        let error = processed.result.unwrap_err();
        assert!(matches!(error, GatewayError::PolicyRejection { ref message, .. } if message == "blocked"));

        let records = store.transactions();
        assert_eq!(records.len(), 1);
        assert!(records[0].original_request.is_some());
        assert!(records[0].final_request.is_none());
        assert!(records[0].final_response.is_none());
    }

    #[tokio::test]
    async fn invalid_requests_never_reach_policy() {
        let store = Arc::new(MemoryStore::new());
        let processor = processor_with(PolicyChain::passthrough(), store.clone());

        let mut invalid = request(false);
        invalid.messages.clear();

        let processed = processor.execute(invalid, ClientFormat::Openai).await;
        assert!(matches!(processed.result.unwrap_err(), GatewayError::InvalidRequest { .. }));
        assert!(store.transactions().is_empty());
    }
}
