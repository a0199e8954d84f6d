//! Folding a chunk stream back into a canonical response.
//!
//! The executor keeps two of these per streaming request: one over the raw
//! upstream chunks and one over the chunks that actually reached the
//! client, producing the `original_response` and `final_response` of the
//! transaction record.

use serde_json::Value;

use crate::{
    canonical::{Choice, Chunk, ContentPart, FinishReason, Message, MessageContent, Response, Role, Usage},
    policy::assembler::{Block, BlockAssembler},
};

pub(crate) struct ResponseAccumulator {
    assembler: BlockAssembler,
    id: Option<String>,
    model: Option<String>,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
    saw_chunk: bool,
}

impl ResponseAccumulator {
    pub(crate) fn new() -> Self {
        Self {
            assembler: BlockAssembler::new(),
            id: None,
            model: None,
            finish_reason: None,
            usage: None,
            saw_chunk: false,
        }
    }

    pub(crate) fn ingest(&mut self, chunk: &Chunk) {
        self.saw_chunk = true;

        if self.id.is_none() && !chunk.id.is_empty() {
            self.id = Some(chunk.id.clone());
        }
        if self.model.is_none() && !chunk.model.is_empty() {
            self.model = Some(chunk.model.clone());
        }
        if let Some(reason) = &chunk.finish_reason {
            self.finish_reason = Some(reason.clone());
        }
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }

        self.assembler.ingest(chunk);
    }

    pub(crate) fn finish(self) -> Option<Response> {
        if !self.saw_chunk {
            return None;
        }

        let parts: Vec<ContentPart> = self.assembler.blocks().iter().map(block_to_part).collect();

        let content = match parts.as_slice() {
            [ContentPart::Text { text }] => MessageContent::Text(text.clone()),
            _ => MessageContent::Parts(parts),
        };

        Some(Response {
            id: self.id.unwrap_or_default(),
            model: self.model.unwrap_or_default(),
            choices: vec![Choice {
                index: 0,
                message: Message {
                    role: Role::Assistant,
                    content,
                    tool_call_id: None,
                },
                finish_reason: self.finish_reason,
            }],
            usage: self.usage,
        })
    }
}

fn block_to_part(block: &Block) -> ContentPart {
    match block {
        Block::Text { text, .. } => ContentPart::Text { text: text.clone() },
        Block::ToolCall { id, name, args_json, .. } => ContentPart::ToolUse {
            id: id.clone(),
            name: name.clone(),
            // Invalid or partial argument JSON is kept verbatim as a string.
            input: sonic_rs::from_str::<Value>(args_json)
                .unwrap_or_else(|_| Value::String(args_json.clone())),
        },
        Block::Thinking { text, .. } => ContentPart::Thinking { text: text.clone() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::{Delta, ToolCallDelta};

    #[test]
    fn empty_stream_yields_no_response() {
        assert!(ResponseAccumulator::new().finish().is_none());
    }

    #[test]
    fn text_stream_folds_to_text_response() {
        let mut acc = ResponseAccumulator::new();
        acc.ingest(&Chunk::text("id-1", "gpt-4o", "Hello "));
        acc.ingest(&Chunk::text("id-1", "gpt-4o", "world"));
        acc.ingest(&Chunk::finish("id-1", "gpt-4o", FinishReason::Stop));

        let response = acc.finish().unwrap();
        assert_eq!(response.id, "id-1");
        assert_eq!(response.primary_text(), "Hello world");
        assert_eq!(
            response.choices[0].finish_reason,
            Some(FinishReason::Stop)
        );
    }

    #[test]
    fn tool_call_stream_folds_to_tool_use_part() {
        let mut acc = ResponseAccumulator::new();
        acc.ingest(&Chunk {
            id: "id-1".to_string(),
            model: "m".to_string(),
            choice_index: 0,
            delta: Delta {
                tool_call: Some(ToolCallDelta::Start {
                    id: "toolu_1".to_string(),
                    name: "search".to_string(),
                }),
                ..Delta::default()
            },
            finish_reason: None,
            usage: None,
        });
        acc.ingest(&Chunk {
            id: "id-1".to_string(),
            model: "m".to_string(),
            choice_index: 0,
            delta: Delta {
                tool_call: Some(ToolCallDelta::Fragment {
                    arguments: r#"{"q":"rust"}"#.to_string(),
                }),
                ..Delta::default()
            },
            finish_reason: None,
            usage: None,
        });
        acc.ingest(&Chunk::finish("id-1", "m", FinishReason::ToolCalls));

        let response = acc.finish().unwrap();
        let MessageContent::Parts(parts) = &response.choices[0].message.content else {
            unreachable!("expected parts");
        };
        let ContentPart::ToolUse { name, input, .. } = &parts[0] else {
            unreachable!("expected tool use");
        };
        assert_eq!(name, "search");
        assert_eq!(input["q"], "rust");
    }
}
