//! Conversions from the Anthropic wire format to canonical types.

use crate::{canonical, protocol::anthropic};

impl From<anthropic::MessagesRequest> for canonical::Request {
    fn from(req: anthropic::MessagesRequest) -> Self {
        let metadata = req.metadata.and_then(|meta| {
            let mut map = serde_json::Map::new();
            if let Some(user_id) = meta.user_id {
                map.insert("user_id".to_string(), serde_json::Value::String(user_id));
            }
            if map.is_empty() { None } else { Some(map) }
        });

        Self {
            model: req.model,
            messages: req.messages.into_iter().map(canonical::Message::from).collect(),
            system: req.system.map(anthropic::SystemPrompt::into_text),
            max_tokens: Some(req.max_tokens),
            temperature: req.temperature,
            top_p: req.top_p,
            stop_sequences: req.stop_sequences,
            stream: req.stream.unwrap_or(false),
            tools: req.tools.map(|tools| tools.into_iter().map(canonical::ToolSpec::from).collect()),
            tool_choice: req.tool_choice.map(canonical::ToolChoice::from),
            metadata,
            session_id: None,
        }
    }
}

impl From<anthropic::Role> for canonical::Role {
    fn from(role: anthropic::Role) -> Self {
        match role {
            anthropic::Role::User => canonical::Role::User,
            anthropic::Role::Assistant => canonical::Role::Assistant,
        }
    }
}

impl From<anthropic::Message> for canonical::Message {
    fn from(msg: anthropic::Message) -> Self {
        let role = canonical::Role::from(msg.role);

        let content = match msg.content {
            anthropic::MessageContent::Text(text) => canonical::MessageContent::Text(text),
            anthropic::MessageContent::Blocks(blocks) => {
                let has_tool_use = blocks
                    .iter()
                    .any(|block| matches!(block, anthropic::ContentBlock::ToolUse { .. }));

                let parts: Vec<canonical::ContentPart> = blocks
                    .into_iter()
                    .filter(|block| {
                        // Some clients send empty text blocks alongside tool
                        // use; strip them before policies see the message.
                        !(has_tool_use
                            && matches!(block, anthropic::ContentBlock::Text { text } if text.is_empty()))
                    })
                    .map(canonical::ContentPart::from)
                    .collect();

                canonical::MessageContent::Parts(parts)
            }
        };

        Self {
            role,
            content,
            tool_call_id: None,
        }
    }
}

impl From<anthropic::ContentBlock> for canonical::ContentPart {
    fn from(block: anthropic::ContentBlock) -> Self {
        match block {
            anthropic::ContentBlock::Text { text } => canonical::ContentPart::Text { text },
            anthropic::ContentBlock::Image { source } => canonical::ContentPart::Image {
                source: canonical::ImageSource::from(source),
            },
            anthropic::ContentBlock::ToolUse { id, name, input } => {
                canonical::ContentPart::ToolUse { id, name, input }
            }
            anthropic::ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => canonical::ContentPart::ToolResult {
                tool_call_id: tool_use_id,
                content: canonical::ToolResultContent::from(content),
                is_error,
            },
            anthropic::ContentBlock::Thinking { thinking, .. } => {
                canonical::ContentPart::Thinking { text: thinking }
            }
        }
    }
}

impl From<anthropic::ToolResultContent> for canonical::ToolResultContent {
    fn from(content: anthropic::ToolResultContent) -> Self {
        match content {
            anthropic::ToolResultContent::Text(text) => canonical::ToolResultContent::Text(text),
            anthropic::ToolResultContent::Blocks(blocks) => {
                let mut texts: Vec<String> = blocks
                    .into_iter()
                    .map(|anthropic::ToolResultBlock::Text { text }| text)
                    .collect();

                if texts.len() == 1 {
                    canonical::ToolResultContent::Text(texts.remove(0))
                } else {
                    canonical::ToolResultContent::Multiple(texts)
                }
            }
        }
    }
}

impl From<anthropic::ImageSource> for canonical::ImageSource {
    fn from(source: anthropic::ImageSource) -> Self {
        match source {
            anthropic::ImageSource::Base64 { media_type, data } => {
                canonical::ImageSource::Base64 { media_type, data }
            }
            anthropic::ImageSource::Url { url } => canonical::ImageSource::Url { url },
        }
    }
}

impl From<anthropic::Tool> for canonical::ToolSpec {
    fn from(tool: anthropic::Tool) -> Self {
        Self {
            name: tool.name,
            description: tool.description,
            parameters: tool.input_schema,
        }
    }
}

impl From<anthropic::ToolChoice> for canonical::ToolChoice {
    fn from(choice: anthropic::ToolChoice) -> Self {
        match choice {
            anthropic::ToolChoice::Auto => canonical::ToolChoice::Auto,
            anthropic::ToolChoice::Any => canonical::ToolChoice::Required,
            anthropic::ToolChoice::None => canonical::ToolChoice::None,
            anthropic::ToolChoice::Tool { name } => canonical::ToolChoice::Tool { name },
        }
    }
}

impl From<anthropic::StopReason> for canonical::FinishReason {
    fn from(reason: anthropic::StopReason) -> Self {
        match reason {
            anthropic::StopReason::EndTurn => canonical::FinishReason::Stop,
            anthropic::StopReason::MaxTokens => canonical::FinishReason::Length,
            anthropic::StopReason::StopSequence => canonical::FinishReason::Stop,
            anthropic::StopReason::ToolUse => canonical::FinishReason::ToolCalls,
            anthropic::StopReason::Refusal => canonical::FinishReason::ContentFilter,
            anthropic::StopReason::Other(s) => {
                log::warn!("Unknown stop reason from Anthropic upstream: {s}");
                canonical::FinishReason::Other(s)
            }
        }
    }
}

impl From<anthropic::Usage> for canonical::Usage {
    fn from(usage: anthropic::Usage) -> Self {
        Self {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: usage.input_tokens + usage.output_tokens,
        }
    }
}

impl From<anthropic::MessagesResponse> for canonical::Response {
    fn from(resp: anthropic::MessagesResponse) -> Self {
        let finish_reason = resp.stop_reason.map(canonical::FinishReason::from);

        let message = canonical::Message {
            role: canonical::Role::Assistant,
            content: canonical::MessageContent::Parts(
                resp.content.into_iter().map(canonical::ContentPart::from).collect(),
            ),
            tool_call_id: None,
        };

        Self {
            id: resp.id,
            model: resp.model,
            choices: vec![canonical::Choice {
                index: 0,
                message,
                finish_reason,
            }],
            usage: Some(canonical::Usage::from(resp.usage)),
        }
    }
}
