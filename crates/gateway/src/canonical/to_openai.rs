//! Conversions from canonical types to the OpenAI wire format.

use crate::{canonical, protocol::openai};

impl From<canonical::Request> for openai::ChatCompletionRequest {
    fn from(req: canonical::Request) -> Self {
        let mut messages: Vec<openai::ChatMessage> = Vec::with_capacity(req.messages.len() + 1);

        // The separate system field folds back into a leading system message.
        if let Some(system) = req.system {
            messages.push(openai::ChatMessage {
                role: openai::ChatRole::System,
                content: Some(openai::ChatContent::Text(system)),
                tool_calls: None,
                tool_call_id: None,
            });
        }

        for message in req.messages {
            messages.extend(wire_messages(message));
        }

        Self {
            model: req.model,
            messages,
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            top_p: req.top_p,
            stop: req.stop_sequences.map(openai::StopSequences::Many),
            stream: Some(req.stream),
            tools: req.tools.map(|tools| tools.into_iter().map(openai::Tool::from).collect()),
            tool_choice: req.tool_choice.map(openai::ToolChoice::from),
            metadata: None,
        }
    }
}

/// A canonical message can expand to several wire messages: tool results
/// embedded in a user message (the Anthropic shape) become separate `tool`
/// role messages here.
fn wire_messages(message: canonical::Message) -> Vec<openai::ChatMessage> {
    let role = openai::ChatRole::from(message.role);

    let parts = match message.content {
        canonical::MessageContent::Text(text) => {
            return vec![openai::ChatMessage {
                role,
                content: Some(openai::ChatContent::Text(text)),
                tool_calls: None,
                tool_call_id: message.tool_call_id,
            }];
        }
        canonical::MessageContent::Parts(parts) => parts,
    };

    let mut out = Vec::new();
    let mut content_parts: Vec<openai::ChatContentPart> = Vec::new();
    let mut tool_calls: Vec<openai::ToolCall> = Vec::new();

    for part in parts {
        match part {
            canonical::ContentPart::Text { text } => {
                content_parts.push(openai::ChatContentPart::Text { text });
            }
            canonical::ContentPart::Image { source } => {
                let url = match source {
                    canonical::ImageSource::Url { url } => url,
                    canonical::ImageSource::Base64 { media_type, data } => {
                        format!("data:{media_type};base64,{data}")
                    }
                };
                content_parts.push(openai::ChatContentPart::ImageUrl {
                    image_url: openai::ImageUrl { url },
                });
            }
            canonical::ContentPart::ToolUse { id, name, input } => {
                tool_calls.push(openai::ToolCall {
                    id,
                    r#type: openai::ToolType::Function,
                    function: openai::FunctionCall {
                        name,
                        arguments: sonic_rs::to_string(&input).unwrap_or_else(|_| "{}".to_string()),
                    },
                });
            }
            canonical::ContentPart::ToolResult {
                tool_call_id,
                content,
                is_error: _,
            } => {
                out.push(openai::ChatMessage {
                    role: openai::ChatRole::Tool,
                    content: Some(openai::ChatContent::Text(flatten_tool_result(content))),
                    tool_calls: None,
                    tool_call_id: Some(tool_call_id),
                });
            }
            // This dialect has no thinking channel; thinking stays internal.
            canonical::ContentPart::Thinking { .. } => {}
        }
    }

    if !content_parts.is_empty() || !tool_calls.is_empty() {
        let single_text =
            content_parts.len() == 1 && matches!(content_parts[0], openai::ChatContentPart::Text { .. });

        let content = if content_parts.is_empty() {
            None
        } else if single_text {
            match content_parts.remove(0) {
                openai::ChatContentPart::Text { text } => Some(openai::ChatContent::Text(text)),
                part => Some(openai::ChatContent::Parts(vec![part])),
            }
        } else {
            Some(openai::ChatContent::Parts(content_parts))
        };

        out.insert(
            0,
            openai::ChatMessage {
                role,
                content,
                tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                tool_call_id: message.tool_call_id,
            },
        );
    }

    out
}

fn flatten_tool_result(content: canonical::ToolResultContent) -> String {
    match content {
        canonical::ToolResultContent::Text(text) => text,
        canonical::ToolResultContent::Multiple(texts) => texts.join("\n"),
    }
}

impl From<canonical::Role> for openai::ChatRole {
    fn from(role: canonical::Role) -> Self {
        match role {
            canonical::Role::System => openai::ChatRole::System,
            canonical::Role::User => openai::ChatRole::User,
            canonical::Role::Assistant => openai::ChatRole::Assistant,
            canonical::Role::Tool => openai::ChatRole::Tool,
        }
    }
}

impl From<canonical::ToolSpec> for openai::Tool {
    fn from(tool: canonical::ToolSpec) -> Self {
        Self {
            r#type: openai::ToolType::Function,
            function: openai::FunctionDefinition {
                name: tool.name,
                description: tool.description,
                parameters: tool.parameters,
            },
        }
    }
}

impl From<canonical::ToolChoice> for openai::ToolChoice {
    fn from(choice: canonical::ToolChoice) -> Self {
        match choice {
            canonical::ToolChoice::None => openai::ToolChoice::Mode(openai::ToolChoiceMode::None),
            canonical::ToolChoice::Auto => openai::ToolChoice::Mode(openai::ToolChoiceMode::Auto),
            canonical::ToolChoice::Required => openai::ToolChoice::Mode(openai::ToolChoiceMode::Required),
            canonical::ToolChoice::Tool { name } => openai::ToolChoice::Specific {
                r#type: openai::ToolType::Function,
                function: openai::FunctionName { name },
            },
        }
    }
}

impl From<canonical::FinishReason> for openai::FinishReason {
    fn from(reason: canonical::FinishReason) -> Self {
        match reason {
            canonical::FinishReason::Stop => openai::FinishReason::Stop,
            canonical::FinishReason::Length => openai::FinishReason::Length,
            canonical::FinishReason::ContentFilter => openai::FinishReason::ContentFilter,
            canonical::FinishReason::ToolCalls => openai::FinishReason::ToolCalls,
            canonical::FinishReason::Other(s) => openai::FinishReason::Other(s),
        }
    }
}

impl From<canonical::Usage> for openai::Usage {
    fn from(usage: canonical::Usage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

impl From<canonical::Response> for openai::ChatCompletionResponse {
    fn from(resp: canonical::Response) -> Self {
        Self {
            id: resp.id,
            object: openai::ObjectType::ChatCompletion,
            created: now_unix(),
            model: resp.model,
            choices: resp
                .choices
                .into_iter()
                .map(|choice| {
                    let mut messages = wire_messages(choice.message);
                    let message = if messages.is_empty() {
                        openai::ChatMessage {
                            role: openai::ChatRole::Assistant,
                            content: Some(openai::ChatContent::Text(String::new())),
                            tool_calls: None,
                            tool_call_id: None,
                        }
                    } else {
                        messages.remove(0)
                    };

                    openai::ChatChoice {
                        index: choice.index,
                        message,
                        finish_reason: choice.finish_reason.map(Into::into),
                    }
                })
                .collect(),
            usage: resp.usage.map(Into::into),
        }
    }
}

impl From<canonical::Chunk> for openai::ChatCompletionChunk {
    fn from(chunk: canonical::Chunk) -> Self {
        let tool_calls = chunk.delta.tool_call.map(|call| {
            vec![match call {
                canonical::ToolCallDelta::Start { id, name } => openai::StreamingToolCall::Start {
                    index: 0,
                    id,
                    r#type: openai::ToolType::Function,
                    function: openai::FunctionStart {
                        name,
                        arguments: String::new(),
                    },
                },
                canonical::ToolCallDelta::Fragment { arguments } => openai::StreamingToolCall::Delta {
                    index: 0,
                    function: openai::FunctionDelta { arguments },
                },
            }]
        });

        Self {
            id: chunk.id,
            object: openai::ObjectType::ChatCompletionChunk,
            created: now_unix(),
            model: chunk.model,
            choices: vec![openai::ChatChoiceDelta {
                index: chunk.choice_index,
                delta: openai::ChatMessageDelta {
                    role: chunk.delta.role.map(Into::into),
                    content: chunk.delta.content,
                    tool_calls,
                },
                finish_reason: chunk.finish_reason.map(Into::into),
            }],
            usage: chunk.usage.map(Into::into),
        }
    }
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
