//! Conversions from canonical types to the Anthropic wire format.

use crate::{canonical, protocol::anthropic};

/// This dialect requires max_tokens; used when the client did not set one.
const DEFAULT_MAX_TOKENS: u32 = 4096;

impl From<canonical::Request> for anthropic::MessagesRequest {
    fn from(req: canonical::Request) -> Self {
        // System instructions live in a dedicated field here; collect the
        // separate system string and any system-role messages.
        let mut system_texts: Vec<String> = Vec::new();
        if let Some(system) = req.system {
            system_texts.push(system);
        }

        let mut messages: Vec<anthropic::Message> = Vec::new();

        for message in req.messages {
            match message.role {
                canonical::Role::System => system_texts.push(message.text_content()),
                canonical::Role::Tool => {
                    // Tool results ride in user messages in this dialect.
                    let tool_call_id = message.tool_call_id.clone().unwrap_or_default();
                    messages.push(anthropic::Message {
                        role: anthropic::Role::User,
                        content: anthropic::MessageContent::Blocks(vec![anthropic::ContentBlock::ToolResult {
                            tool_use_id: tool_call_id,
                            content: anthropic::ToolResultContent::Text(message.text_content()),
                            is_error: None,
                        }]),
                    });
                }
                canonical::Role::User | canonical::Role::Assistant => {
                    messages.push(anthropic::Message::from(message));
                }
            }
        }

        let system = if system_texts.is_empty() {
            None
        } else {
            Some(anthropic::SystemPrompt::Text(system_texts.join("\n")))
        };

        let metadata = req.metadata.as_ref().and_then(|map| {
            map.get("user_id")
                .and_then(|v| v.as_str())
                .map(|user_id| anthropic::Metadata {
                    user_id: Some(user_id.to_string()),
                })
        });

        Self {
            model: req.model,
            messages,
            max_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system,
            temperature: req.temperature,
            top_p: req.top_p,
            stop_sequences: req.stop_sequences,
            stream: Some(req.stream),
            metadata,
            tools: req
                .tools
                .map(|tools| tools.into_iter().map(anthropic::Tool::from).collect()),
            tool_choice: req.tool_choice.map(anthropic::ToolChoice::from),
        }
    }
}

impl From<canonical::Message> for anthropic::Message {
    fn from(msg: canonical::Message) -> Self {
        let role = match msg.role {
            canonical::Role::Assistant => anthropic::Role::Assistant,
            _ => anthropic::Role::User,
        };

        let content = match msg.content {
            canonical::MessageContent::Text(text) => anthropic::MessageContent::Text(text),
            canonical::MessageContent::Parts(parts) => anthropic::MessageContent::Blocks(
                parts.into_iter().map(anthropic::ContentBlock::from).collect(),
            ),
        };

        Self { role, content }
    }
}

impl From<canonical::ContentPart> for anthropic::ContentBlock {
    fn from(part: canonical::ContentPart) -> Self {
        match part {
            canonical::ContentPart::Text { text } => anthropic::ContentBlock::Text { text },
            canonical::ContentPart::Image { source } => anthropic::ContentBlock::Image {
                source: anthropic::ImageSource::from(source),
            },
            canonical::ContentPart::ToolUse { id, name, input } => {
                anthropic::ContentBlock::ToolUse { id, name, input }
            }
            canonical::ContentPart::ToolResult {
                tool_call_id,
                content,
                is_error,
            } => anthropic::ContentBlock::ToolResult {
                tool_use_id: tool_call_id,
                content: anthropic::ToolResultContent::from(content),
                is_error,
            },
            canonical::ContentPart::Thinking { text } => anthropic::ContentBlock::Thinking {
                thinking: text,
                signature: None,
            },
        }
    }
}

impl From<canonical::ToolResultContent> for anthropic::ToolResultContent {
    fn from(content: canonical::ToolResultContent) -> Self {
        match content {
            canonical::ToolResultContent::Text(text) => anthropic::ToolResultContent::Text(text),
            canonical::ToolResultContent::Multiple(texts) => anthropic::ToolResultContent::Blocks(
                texts
                    .into_iter()
                    .map(|text| anthropic::ToolResultBlock::Text { text })
                    .collect(),
            ),
        }
    }
}

impl From<canonical::ImageSource> for anthropic::ImageSource {
    fn from(source: canonical::ImageSource) -> Self {
        match source {
            canonical::ImageSource::Base64 { media_type, data } => {
                anthropic::ImageSource::Base64 { media_type, data }
            }
            canonical::ImageSource::Url { url } => anthropic::ImageSource::Url { url },
        }
    }
}

impl From<canonical::ToolSpec> for anthropic::Tool {
    fn from(tool: canonical::ToolSpec) -> Self {
        Self {
            name: tool.name,
            description: tool.description,
            input_schema: tool.parameters,
        }
    }
}

impl From<canonical::ToolChoice> for anthropic::ToolChoice {
    fn from(choice: canonical::ToolChoice) -> Self {
        match choice {
            canonical::ToolChoice::Auto => anthropic::ToolChoice::Auto,
            canonical::ToolChoice::None => anthropic::ToolChoice::None,
            canonical::ToolChoice::Required => anthropic::ToolChoice::Any,
            canonical::ToolChoice::Tool { name } => anthropic::ToolChoice::Tool { name },
        }
    }
}

impl From<canonical::FinishReason> for anthropic::StopReason {
    fn from(reason: canonical::FinishReason) -> Self {
        match reason {
            canonical::FinishReason::Stop => anthropic::StopReason::EndTurn,
            canonical::FinishReason::Length => anthropic::StopReason::MaxTokens,
            canonical::FinishReason::ContentFilter => anthropic::StopReason::Refusal,
            canonical::FinishReason::ToolCalls => anthropic::StopReason::ToolUse,
            canonical::FinishReason::Other(s) => anthropic::StopReason::Other(s),
        }
    }
}

impl From<canonical::Usage> for anthropic::Usage {
    fn from(usage: canonical::Usage) -> Self {
        Self {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }
    }
}

impl From<canonical::Response> for anthropic::MessagesResponse {
    fn from(resp: canonical::Response) -> Self {
        let usage = resp
            .usage
            .map(anthropic::Usage::from)
            .unwrap_or(anthropic::Usage {
                input_tokens: 0,
                output_tokens: 0,
            });

        let (content, stop_reason) = resp
            .choices
            .into_iter()
            .next()
            .map(|choice| {
                let blocks = match choice.message.content {
                    canonical::MessageContent::Text(text) if text.is_empty() => Vec::new(),
                    canonical::MessageContent::Text(text) => {
                        vec![anthropic::ContentBlock::Text { text }]
                    }
                    canonical::MessageContent::Parts(parts) => parts
                        .into_iter()
                        // Tool results never appear in responses.
                        .filter(|part| !matches!(part, canonical::ContentPart::ToolResult { .. }))
                        .map(anthropic::ContentBlock::from)
                        .collect(),
                };

                (blocks, choice.finish_reason.map(anthropic::StopReason::from))
            })
            .unwrap_or((Vec::new(), None));

        Self {
            id: resp.id,
            r#type: "message".to_string(),
            role: anthropic::Role::Assistant,
            content,
            model: resp.model,
            stop_reason,
            stop_sequence: None,
            usage,
        }
    }
}
