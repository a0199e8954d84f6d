//! Conversions from the OpenAI wire format to canonical types.

use serde_json::Value;

use crate::{canonical, protocol::openai};

impl From<openai::ChatCompletionRequest> for canonical::Request {
    fn from(req: openai::ChatCompletionRequest) -> Self {
        Self {
            model: req.model,
            messages: req.messages.into_iter().map(canonical::Message::from).collect(),
            system: None,
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            top_p: req.top_p,
            stop_sequences: req.stop.map(Into::into),
            stream: req.stream.unwrap_or(false),
            tools: req.tools.map(|tools| tools.into_iter().map(canonical::ToolSpec::from).collect()),
            tool_choice: req.tool_choice.map(canonical::ToolChoice::from),
            metadata: req.metadata,
            session_id: None,
        }
    }
}

impl From<openai::ChatRole> for canonical::Role {
    fn from(role: openai::ChatRole) -> Self {
        match role {
            openai::ChatRole::System => canonical::Role::System,
            openai::ChatRole::User => canonical::Role::User,
            openai::ChatRole::Assistant => canonical::Role::Assistant,
            openai::ChatRole::Tool => canonical::Role::Tool,
        }
    }
}

impl From<openai::ChatMessage> for canonical::Message {
    fn from(msg: openai::ChatMessage) -> Self {
        let role = canonical::Role::from(msg.role);

        let mut parts: Vec<canonical::ContentPart> = Vec::new();
        let mut plain_text: Option<String> = None;

        match msg.content {
            Some(openai::ChatContent::Text(text)) => plain_text = Some(text),
            Some(openai::ChatContent::Parts(wire_parts)) => {
                parts.extend(wire_parts.into_iter().map(canonical::ContentPart::from));
            }
            None => {}
        }

        // Tool calls fold into the content as tool_use parts so policies
        // see one shape regardless of dialect.
        if let Some(tool_calls) = msg.tool_calls {
            if let Some(text) = plain_text.take()
                && !text.is_empty()
            {
                parts.push(canonical::ContentPart::Text { text });
            }

            parts.extend(tool_calls.into_iter().map(|call| canonical::ContentPart::ToolUse {
                id: call.id,
                name: call.function.name,
                input: parse_arguments(&call.function.arguments),
            }));
        }

        let content = match plain_text {
            Some(text) => canonical::MessageContent::Text(text),
            None => canonical::MessageContent::Parts(parts),
        };

        Self {
            role,
            content,
            tool_call_id: msg.tool_call_id,
        }
    }
}

impl From<openai::ChatContentPart> for canonical::ContentPart {
    fn from(part: openai::ChatContentPart) -> Self {
        match part {
            openai::ChatContentPart::Text { text } => canonical::ContentPart::Text { text },
            openai::ChatContentPart::ImageUrl { image_url } => canonical::ContentPart::Image {
                source: canonical::ImageSource::Url { url: image_url.url },
            },
        }
    }
}

impl From<openai::Tool> for canonical::ToolSpec {
    fn from(tool: openai::Tool) -> Self {
        Self {
            name: tool.function.name,
            description: tool.function.description,
            parameters: tool.function.parameters,
        }
    }
}

impl From<openai::ToolChoice> for canonical::ToolChoice {
    fn from(choice: openai::ToolChoice) -> Self {
        match choice {
            openai::ToolChoice::Mode(openai::ToolChoiceMode::None) => canonical::ToolChoice::None,
            openai::ToolChoice::Mode(openai::ToolChoiceMode::Auto) => canonical::ToolChoice::Auto,
            openai::ToolChoice::Mode(openai::ToolChoiceMode::Required) => canonical::ToolChoice::Required,
            openai::ToolChoice::Specific { function, .. } => canonical::ToolChoice::Tool { name: function.name },
        }
    }
}

impl From<openai::FinishReason> for canonical::FinishReason {
    fn from(reason: openai::FinishReason) -> Self {
        match reason {
            openai::FinishReason::Stop => canonical::FinishReason::Stop,
            openai::FinishReason::Length => canonical::FinishReason::Length,
            openai::FinishReason::ContentFilter => canonical::FinishReason::ContentFilter,
            openai::FinishReason::ToolCalls => canonical::FinishReason::ToolCalls,
            openai::FinishReason::Other(s) => canonical::FinishReason::Other(s),
        }
    }
}

impl From<openai::Usage> for canonical::Usage {
    fn from(usage: openai::Usage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

impl From<openai::ChatCompletionResponse> for canonical::Response {
    fn from(resp: openai::ChatCompletionResponse) -> Self {
        Self {
            id: resp.id,
            model: resp.model,
            choices: resp
                .choices
                .into_iter()
                .map(|choice| canonical::Choice {
                    index: choice.index,
                    message: canonical::Message::from(choice.message),
                    finish_reason: choice.finish_reason.map(Into::into),
                })
                .collect(),
            usage: resp.usage.map(Into::into),
        }
    }
}

impl From<openai::ChatCompletionChunk> for canonical::Chunk {
    fn from(chunk: openai::ChatCompletionChunk) -> Self {
        let usage = chunk.usage.map(Into::into);

        let Some(choice) = chunk.choices.into_iter().next() else {
            // Usage-only frames occur at stream end with some providers.
            return Self {
                id: chunk.id,
                model: chunk.model,
                choice_index: 0,
                delta: canonical::Delta::default(),
                finish_reason: None,
                usage,
            };
        };

        let tool_call = choice.delta.tool_calls.and_then(|calls| {
            calls.into_iter().next().map(|call| match call {
                openai::StreamingToolCall::Start { id, function, .. } => {
                    canonical::ToolCallDelta::Start { id, name: function.name }
                }
                openai::StreamingToolCall::Delta { function, .. } => canonical::ToolCallDelta::Fragment {
                    arguments: function.arguments,
                },
            })
        });

        Self {
            id: chunk.id,
            model: chunk.model,
            choice_index: choice.index,
            delta: canonical::Delta {
                role: choice.delta.role.map(Into::into),
                content: choice.delta.content,
                tool_call,
                thinking: None,
            },
            finish_reason: choice.finish_reason.map(Into::into),
            usage,
        }
    }
}

/// Tool arguments arrive as a JSON string; a parse failure keeps the raw
/// string so nothing is lost for downstream policies.
fn parse_arguments(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Object(serde_json::Map::new());
    }

    sonic_rs::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use crate::canonical;
    use serde_json::json;

    #[test]
    fn request_with_tool_calls_folds_into_parts() {
        let wire: crate::protocol::openai::ChatCompletionRequest = serde_json::from_value(json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "user", "content": "weather in Paris?"},
                {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_1", "type": "function", "function": {"name": "get_weather", "arguments": "{\"city\":\"Paris\"}"}}
                ]},
                {"role": "tool", "content": "18C", "tool_call_id": "call_1"}
            ]
        }))
        .unwrap();

        let request = canonical::Request::from(wire);
        request.validate().unwrap();

        let canonical::MessageContent::Parts(parts) = &request.messages[1].content else {
            unreachable!("expected parts");
        };
        let canonical::ContentPart::ToolUse { id, name, input } = &parts[0] else {
            unreachable!("expected tool use");
        };
        assert_eq!(id, "call_1");
        assert_eq!(name, "get_weather");
        assert_eq!(input["city"], "Paris");
    }

    #[test]
    fn invalid_argument_json_is_kept_as_string() {
        let value = super::parse_arguments(r#"{"broken"#);
        assert_eq!(value, json!(r#"{"broken"#));
    }

    #[test]
    fn chunk_with_no_choices_keeps_usage() {
        let wire: crate::protocol::openai::ChatCompletionChunk = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "created": 0,
            "model": "gpt-4o",
            "choices": [],
            "usage": {"prompt_tokens": 5, "completion_tokens": 7, "total_tokens": 12}
        }))
        .unwrap();

        let chunk = canonical::Chunk::from(wire);
        assert_eq!(chunk.usage.unwrap().total_tokens, 12);
        assert!(chunk.delta.content.is_none());
    }
}
