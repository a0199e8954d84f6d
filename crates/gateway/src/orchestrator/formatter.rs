//! Client-dialect SSE formatting.
//!
//! The formatter task consumes canonical chunks and emits wire frames. The
//! OpenAI shape is stateless (one `data:` frame per chunk plus a terminal
//! `[DONE]`); the Anthropic shape is stateful, and this module is the
//! single place that knows Anthropic block indexing.

use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    canonical::{Chunk, ClientFormat, FinishReason, ToolCallDelta},
    error::{GatewayError, GatewayResult},
    events::{EventEmitter, PipelineEvent, TimeoutKind, now},
    orchestrator::{PipelineItem, monitor::Keepalive},
    protocol::{anthropic, openai},
};

pub(crate) const OPENAI_DONE_FRAME: &str = "data: [DONE]\n\n";

/// Render one OpenAI SSE frame.
pub(crate) fn openai_frame(chunk: Chunk) -> Bytes {
    let wire = openai::ChatCompletionChunk::from(chunk);
    let json = sonic_rs::to_string(&wire).unwrap_or_else(|e| {
        log::error!("failed to serialize chunk: {e}");
        r#"{"error":"serialization failed"}"#.to_string()
    });

    Bytes::from(format!("data: {json}\n\n"))
}

/// Render one Anthropic SSE frame with its event name.
pub(crate) fn anthropic_frame(event: &anthropic::StreamEvent) -> Bytes {
    let json = sonic_rs::to_string(event).unwrap_or_else(|e| {
        log::error!("failed to serialize Anthropic stream event: {e}");
        r#"{"type":"error","error":{"type":"internal_error","message":"serialization failed"}}"#.to_string()
    });

    Bytes::from(format!("event: {}\ndata: {json}\n\n", event.event_name()))
}

/// Render a mid-stream error in the dialect currently in flight.
pub(crate) fn error_frame(error: &GatewayError, format: ClientFormat) -> Bytes {
    match format {
        ClientFormat::Openai => {
            let body = serde_json::json!({
                "error": {
                    "message": error.client_message(),
                    "type": error.error_type(),
                    "code": error.status_code().as_u16(),
                }
            });
            Bytes::from(format!("data: {body}\n\n"))
        }
        ClientFormat::Anthropic => anthropic_frame(&anthropic::StreamEvent::Error {
            error: anthropic::ErrorDetails {
                r#type: error.error_type().to_string(),
                message: error.client_message(),
            },
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum OpenBlock {
    Text,
    ToolCall,
    Thinking,
}

/// Anthropic framing state for one response.
///
/// Assigns `content_block_start/stop` indices in emission order and closes
/// the message properly even when the canonical stream ends without a
/// terminal chunk (for example after a policy termination).
pub(crate) struct AnthropicFrameState {
    message_started: bool,
    finished: bool,
    open: Option<OpenBlock>,
    next_index: u32,
    usage: anthropic::Usage,
}

impl AnthropicFrameState {
    pub(crate) fn new() -> Self {
        Self {
            message_started: false,
            finished: false,
            open: None,
            next_index: 0,
            usage: anthropic::Usage {
                input_tokens: 0,
                output_tokens: 0,
            },
        }
    }

    /// Frames for one canonical chunk.
    pub(crate) fn frames(&mut self, chunk: &Chunk) -> Vec<Bytes> {
        if self.finished {
            return Vec::new();
        }

        let mut events: Vec<anthropic::StreamEvent> = Vec::new();

        if let Some(usage) = chunk.usage {
            self.usage = anthropic::Usage::from(usage);
        }

        if !self.message_started {
            self.message_started = true;
            events.push(anthropic::StreamEvent::MessageStart {
                message: anthropic::StreamMessageStart {
                    id: chunk.id.clone(),
                    r#type: "message".to_string(),
                    role: anthropic::Role::Assistant,
                    content: Vec::new(),
                    model: chunk.model.clone(),
                    usage: anthropic::Usage {
                        input_tokens: self.usage.input_tokens,
                        output_tokens: 0,
                    },
                },
            });
        }

        if let Some(text) = &chunk.delta.content {
            self.ensure_open(OpenBlock::Text, &mut events, || anthropic::StreamContentBlock::Text {
                text: String::new(),
            });
            events.push(anthropic::StreamEvent::ContentBlockDelta {
                index: self.next_index - 1,
                delta: anthropic::ContentDelta::TextDelta { text: text.clone() },
            });
        }

        if let Some(tool_call) = &chunk.delta.tool_call {
            match tool_call {
                ToolCallDelta::Start { id, name } => {
                    self.close_open(&mut events);
                    self.open = Some(OpenBlock::ToolCall);
                    events.push(anthropic::StreamEvent::ContentBlockStart {
                        index: self.next_index,
                        content_block: anthropic::StreamContentBlock::ToolUse {
                            id: id.clone(),
                            name: name.clone(),
                            input: serde_json::Value::Object(serde_json::Map::new()),
                        },
                    });
                    self.next_index += 1;
                }
                ToolCallDelta::Fragment { arguments } => {
                    if self.open == Some(OpenBlock::ToolCall) {
                        events.push(anthropic::StreamEvent::ContentBlockDelta {
                            index: self.next_index - 1,
                            delta: anthropic::ContentDelta::InputJsonDelta {
                                partial_json: arguments.clone(),
                            },
                        });
                    } else {
                        log::warn!("tool call fragment without an open tool_use block; dropping frame");
                    }
                }
            }
        }

        if let Some(text) = &chunk.delta.thinking {
            self.ensure_open(OpenBlock::Thinking, &mut events, || {
                anthropic::StreamContentBlock::Thinking {
                    thinking: String::new(),
                }
            });
            events.push(anthropic::StreamEvent::ContentBlockDelta {
                index: self.next_index - 1,
                delta: anthropic::ContentDelta::ThinkingDelta { thinking: text.clone() },
            });
        }

        if let Some(reason) = &chunk.finish_reason {
            self.close_open(&mut events);
            self.finished = true;
            events.push(anthropic::StreamEvent::MessageDelta {
                delta: anthropic::MessageDeltaData {
                    stop_reason: Some(anthropic::StopReason::from(reason.clone())),
                    stop_sequence: None,
                },
                usage: self.usage,
            });
            events.push(anthropic::StreamEvent::MessageStop);
        }

        events.iter().map(anthropic_frame).collect()
    }

    /// Frames for an explicit block boundary: close the open wire block,
    /// if any. This is how a replaced or suppressed block still ends up
    /// properly delimited on the wire.
    pub(crate) fn boundary(&mut self) -> Vec<Bytes> {
        if self.finished {
            return Vec::new();
        }

        let mut events = Vec::new();
        self.close_open(&mut events);
        events.iter().map(anthropic_frame).collect()
    }

    /// Frames that close the message when the canonical stream ends
    /// without a terminal chunk.
    pub(crate) fn finish(&mut self) -> Vec<Bytes> {
        if self.finished || !self.message_started {
            return Vec::new();
        }

        let mut events = Vec::new();
        self.close_open(&mut events);
        self.finished = true;
        events.push(anthropic::StreamEvent::MessageDelta {
            delta: anthropic::MessageDeltaData {
                stop_reason: Some(anthropic::StopReason::EndTurn),
                stop_sequence: None,
            },
            usage: self.usage,
        });
        events.push(anthropic::StreamEvent::MessageStop);

        events.iter().map(anthropic_frame).collect()
    }

    fn ensure_open(
        &mut self,
        kind: OpenBlock,
        events: &mut Vec<anthropic::StreamEvent>,
        make: impl FnOnce() -> anthropic::StreamContentBlock,
    ) {
        if self.open == Some(kind) {
            return;
        }

        self.close_open(events);
        self.open = Some(kind);
        events.push(anthropic::StreamEvent::ContentBlockStart {
            index: self.next_index,
            content_block: make(),
        });
        self.next_index += 1;
    }

    fn close_open(&mut self, events: &mut Vec<anthropic::StreamEvent>) {
        if self.open.take().is_some() {
            events.push(anthropic::StreamEvent::ContentBlockStop {
                index: self.next_index - 1,
            });
        }
    }
}

/// The formatter task: canonical chunks in, dialect frames out.
pub(crate) struct ClientFormatter {
    pub(crate) format: ClientFormat,
    pub(crate) policy_rx: mpsc::Receiver<GatewayResult<PipelineItem>>,
    pub(crate) frames_tx: mpsc::Sender<Bytes>,
    pub(crate) keepalive: Keepalive,
    pub(crate) cancellation: CancellationToken,
    pub(crate) timeout_kind: Arc<OnceLock<TimeoutKind>>,
    pub(crate) emitter: EventEmitter,
    pub(crate) transaction_id: String,
}

impl ClientFormatter {
    pub(crate) async fn run(mut self) {
        let mut anthropic_state = AnthropicFrameState::new();

        loop {
            let item = tokio::select! {
                _ = self.cancellation.cancelled() => {
                    if self.timeout_kind.get().is_some() {
                        let frame = error_frame(&GatewayError::PolicyTimeout, self.format);
                        let _ = self.frames_tx.try_send(frame);
                    }
                    return;
                }
                item = self.policy_rx.recv() => item,
            };

            match item {
                None => {
                    // Normal end of stream: emit the dialect terminal
                    // frames, then release the monitor and the reader.
                    let frames = match self.format {
                        ClientFormat::Openai => vec![Bytes::from_static(OPENAI_DONE_FRAME.as_bytes())],
                        ClientFormat::Anthropic => anthropic_state.finish(),
                    };
                    for frame in frames {
                        if !self.send(frame).await {
                            return;
                        }
                    }
                    self.cancellation.cancel();
                    return;
                }
                Some(Ok(PipelineItem::Chunk(chunk))) => {
                    let frames = match self.format {
                        ClientFormat::Openai => vec![openai_frame(chunk)],
                        ClientFormat::Anthropic => anthropic_state.frames(&chunk),
                    };
                    for frame in frames {
                        if !self.send(frame).await {
                            return;
                        }
                    }
                }
                Some(Ok(PipelineItem::BlockBoundary)) => {
                    let frames = match self.format {
                        // Block boundaries have no wire representation in
                        // this dialect.
                        ClientFormat::Openai => Vec::new(),
                        ClientFormat::Anthropic => anthropic_state.boundary(),
                    };
                    for frame in frames {
                        if !self.send(frame).await {
                            return;
                        }
                    }
                }
                Some(Err(error)) => {
                    log::error!(
                        "stream error for transaction {}: {error}",
                        self.transaction_id
                    );
                    let frame = error_frame(&error, self.format);
                    let _ = self.send(frame).await;
                    self.cancellation.cancel();
                    return;
                }
            }
        }
    }

    /// Returns false when the client went away.
    async fn send(&self, frame: Bytes) -> bool {
        if self.frames_tx.send(frame).await.is_err() {
            log::debug!("client disconnected for transaction {}", self.transaction_id);
            self.emitter.emit(PipelineEvent::ClientDisconnected {
                transaction_id: self.transaction_id.clone(),
                timestamp: now(),
            });
            self.cancellation.cancel();
            return false;
        }

        self.keepalive.touch();
        true
    }
}
