//! Block-aware assembly of streaming chunks.
//!
//! The assembler turns a flat chunk stream into an ordered list of blocks
//! (text, tool call, thinking) and a sequence of lifecycle events, hiding
//! dialect quirks from policies. At most one block is open at a time per
//! choice; a chunk of a different kind closes the open block before
//! opening the next.

use serde::Serialize;

use crate::canonical::{Chunk, FinishReason, ToolCallDelta, Usage};

/// A maximal contiguous run of streaming output of one kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Block {
    /// Assembled text. There is a single text block per choice, with the
    /// fixed id `content`.
    Text {
        /// Always `content`.
        id: String,
        /// Text assembled so far.
        text: String,
        /// Whether the block has closed.
        done: bool,
    },
    /// An assembled tool call.
    ToolCall {
        /// The tool_use id from the call's first chunk.
        id: String,
        /// Tool name.
        name: String,
        /// Raw argument characters as accumulated; never parsed here.
        args_json: String,
        /// Whether the block has closed.
        done: bool,
    },
    /// Assembled thinking text.
    Thinking {
        /// Synthesized id, `thinking_0`, `thinking_1`, ...
        id: String,
        /// Thinking text assembled so far.
        text: String,
        /// Whether the block has closed.
        done: bool,
    },
}

impl Block {
    /// The block's id.
    pub fn id(&self) -> &str {
        match self {
            Block::Text { id, .. } | Block::ToolCall { id, .. } | Block::Thinking { id, .. } => id,
        }
    }

    /// Whether the block has closed.
    pub fn is_done(&self) -> bool {
        match self {
            Block::Text { done, .. } | Block::ToolCall { done, .. } | Block::Thinking { done, .. } => *done,
        }
    }

    fn mark_done(&mut self) {
        match self {
            Block::Text { done, .. } | Block::ToolCall { done, .. } | Block::Thinking { done, .. } => {
                *done = true;
            }
        }
    }
}

/// Lifecycle events produced while ingesting a chunk, in hook order.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockEvent {
    /// A block opened.
    BlockStarted(Block),
    /// A text fragment was appended to the open text block.
    ContentDelta(String),
    /// A tool-call fragment arrived. `name` is set on the first fragment.
    ToolCallDelta {
        /// Id of the call being built.
        id: String,
        /// Tool name, first fragment only.
        name: Option<String>,
        /// Raw argument characters.
        arguments: String,
    },
    /// A thinking fragment was appended to the open thinking block.
    ThinkingDelta(String),
    /// A block closed; carries the complete block.
    BlockCompleted(Block),
    /// The stream reported its finish reason. Fired exactly once.
    ResponseCompleted {
        /// Terminal finish reason.
        finish_reason: FinishReason,
        /// Final usage, when the provider attached it.
        usage: Option<Usage>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum OpenKind {
    Text,
    ToolCall,
    Thinking,
}

/// Streaming state machine: `Idle → (open block)* → Finished`.
pub struct BlockAssembler {
    blocks: Vec<Block>,
    open: Option<OpenKind>,
    thinking_seq: usize,
    finished: bool,
}

impl BlockAssembler {
    /// A fresh assembler in the idle state.
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            open: None,
            thinking_seq: 0,
            finished: false,
        }
    }

    /// The blocks assembled so far, in wire order.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Whether the stream has reported its finish reason.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Ingest one chunk and return the lifecycle events it triggers.
    pub fn ingest(&mut self, chunk: &Chunk) -> Vec<BlockEvent> {
        let mut events = Vec::new();

        if self.finished {
            log::warn!("chunk received after finish_reason; ignoring");
            return events;
        }

        if let Some(text) = &chunk.delta.content {
            self.ensure_open(OpenKind::Text, &mut events, |_| Block::Text {
                id: "content".to_string(),
                text: String::new(),
                done: false,
            });

            if let Some(Block::Text { text: existing, .. }) = self.blocks.last_mut() {
                existing.push_str(text);
            }
            events.push(BlockEvent::ContentDelta(text.clone()));
        }

        if let Some(tool_call) = &chunk.delta.tool_call {
            match tool_call {
                ToolCallDelta::Start { id, name } => {
                    self.close_open(&mut events);
                    self.open = Some(OpenKind::ToolCall);
                    let block = Block::ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        args_json: String::new(),
                        done: false,
                    };
                    self.blocks.push(block.clone());
                    events.push(BlockEvent::BlockStarted(block));
                    events.push(BlockEvent::ToolCallDelta {
                        id: id.clone(),
                        name: Some(name.clone()),
                        arguments: String::new(),
                    });
                }
                ToolCallDelta::Fragment { arguments } => {
                    match self.blocks.last_mut() {
                        Some(Block::ToolCall { id, args_json, done, .. }) if !*done => {
                            args_json.push_str(arguments);
                            events.push(BlockEvent::ToolCallDelta {
                                id: id.clone(),
                                name: None,
                                arguments: arguments.clone(),
                            });
                        }
                        _ => {
                            log::warn!("tool call fragment without an open tool call; dropping");
                        }
                    }
                }
            }
        }

        if let Some(text) = &chunk.delta.thinking {
            let seq = self.thinking_seq;
            self.ensure_open(OpenKind::Thinking, &mut events, |assembler| {
                assembler.thinking_seq += 1;
                Block::Thinking {
                    id: format!("thinking_{seq}"),
                    text: String::new(),
                    done: false,
                }
            });

            if let Some(Block::Thinking { text: existing, .. }) = self.blocks.last_mut() {
                existing.push_str(text);
            }
            events.push(BlockEvent::ThinkingDelta(text.clone()));
        }

        if let Some(finish_reason) = &chunk.finish_reason {
            self.close_open(&mut events);
            self.finished = true;
            events.push(BlockEvent::ResponseCompleted {
                finish_reason: finish_reason.clone(),
                usage: chunk.usage,
            });
        }

        events
    }

    fn ensure_open(
        &mut self,
        kind: OpenKind,
        events: &mut Vec<BlockEvent>,
        make: impl FnOnce(&mut Self) -> Block,
    ) {
        if self.open == Some(kind) {
            return;
        }

        self.close_open(events);
        self.open = Some(kind);
        let block = make(self);
        self.blocks.push(block.clone());
        events.push(BlockEvent::BlockStarted(block));
    }

    fn close_open(&mut self, events: &mut Vec<BlockEvent>) {
        if self.open.take().is_none() {
            return;
        }

        if let Some(block) = self.blocks.last_mut() {
            block.mark_done();
            events.push(BlockEvent::BlockCompleted(block.clone()));
        }
    }
}

impl Default for BlockAssembler {
    fn default() -> Self {
        Self::new()
    }
}
