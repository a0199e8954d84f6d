//! Protocol-agnostic canonical types for LLM traffic.
//!
//! Every request is parsed into this shape at ingress, every policy hook
//! sees this shape, and the formatters at the egress edge turn it back into
//! whichever dialect the client or provider speaks. The conversion flow:
//!
//! ```text
//! client wire → Request → policy chain → provider wire
//! provider wire → Chunk/Response → policy chain → client wire
//! ```
//!
//! Conversions live in the `from_*`/`to_*` submodules as `From` impls so
//! that adapters stay pure and testable in isolation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayError;

pub(crate) mod from_anthropic;
pub(crate) mod from_openai;
pub(crate) mod to_anthropic;
pub(crate) mod to_openai;

/// Which wire dialect a client or provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientFormat {
    /// OpenAI chat completions.
    Openai,
    /// Anthropic messages.
    Anthropic,
}

impl std::fmt::Display for ClientFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientFormat::Openai => write!(f, "openai"),
            ClientFormat::Anthropic => write!(f, "anthropic"),
        }
    }
}

/// Canonical request representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Model identifier, used for provider routing.
    pub model: String,

    /// Conversation messages, oldest first. Never empty after validation.
    pub messages: Vec<Message>,

    /// System instruction, held separately from the messages the way the
    /// Anthropic dialect does; the OpenAI adapter folds it back into a
    /// leading system message.
    pub system: Option<String>,

    /// Maximum tokens to generate. Required by the Anthropic dialect, so
    /// the adapter fills a default when forwarding there.
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    pub temperature: Option<f32>,

    /// Nucleus sampling cutoff.
    pub top_p: Option<f32>,

    /// Sequences that stop generation.
    pub stop_sequences: Option<Vec<String>>,

    /// Whether the client asked for a streaming response.
    pub stream: bool,

    /// Tools the model may call.
    pub tools: Option<Vec<ToolSpec>>,

    /// Controls how the model uses tools.
    pub tool_choice: Option<ToolChoice>,

    /// Opaque request metadata, passed through unexamined except for
    /// session-id extraction.
    pub metadata: Option<serde_json::Map<String, Value>>,

    /// Session identifier extracted from the wire; see [`crate::session`].
    pub session_id: Option<String>,
}

impl Request {
    /// Validate the structural invariants the pipeline relies on.
    ///
    /// - `messages` is non-empty.
    /// - Every `tool` message cites a `tool_call_id` introduced by an
    ///   earlier assistant tool_use.
    /// - `tool_result` parts appear only in `user` or `tool` messages.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.messages.is_empty() {
            return Err(GatewayError::InvalidRequest {
                path: "messages".to_string(),
                reason: "must contain at least one message".to_string(),
            });
        }

        let mut seen_tool_call_ids: Vec<&str> = Vec::new();

        for (i, message) in self.messages.iter().enumerate() {
            if let MessageContent::Parts(parts) = &message.content {
                for part in parts {
                    if let ContentPart::ToolUse { id, .. } = part
                        && message.role == Role::Assistant
                    {
                        seen_tool_call_ids.push(id);
                    }

                    if matches!(part, ContentPart::ToolResult { .. })
                        && !matches!(message.role, Role::User | Role::Tool)
                    {
                        return Err(GatewayError::InvalidRequest {
                            path: format!("messages[{i}].content"),
                            reason: "tool_result parts are only valid in user or tool messages".to_string(),
                        });
                    }
                }
            }

            if message.role == Role::Tool {
                let Some(tool_call_id) = message.tool_call_id.as_deref() else {
                    return Err(GatewayError::InvalidRequest {
                        path: format!("messages[{i}].tool_call_id"),
                        reason: "tool messages must reference a tool call".to_string(),
                    });
                };

                if !seen_tool_call_ids.contains(&tool_call_id) {
                    return Err(GatewayError::InvalidRequest {
                        path: format!("messages[{i}].tool_call_id"),
                        reason: format!("'{tool_call_id}' does not match any earlier assistant tool call"),
                    });
                }
            }
        }

        Ok(())
    }
}

/// A single conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Who authored the message.
    pub role: Role,
    /// The message content.
    pub content: MessageContent,
    /// For tool messages, the id of the call being answered.
    pub tool_call_id: Option<String>,
}

impl Message {
    /// A plain-text message.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
            tool_call_id: None,
        }
    }

    /// Concatenated text of the message, ignoring non-text parts.
    pub fn text_content(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }
}

/// Message sender role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// End-user input.
    User,
    /// Model output.
    Assistant,
    /// Tool execution result.
    Tool,
}

/// Message content; plain text or an ordered sequence of parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text.
    Text(String),
    /// Typed content parts.
    Parts(Vec<ContentPart>),
}

/// One content part of a multi-part message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// An image, carried opaquely; the gateway never decodes image bytes.
    Image {
        /// The image source.
        source: ImageSource,
    },
    /// A tool invocation issued by the assistant.
    ToolUse {
        /// Unique call id.
        id: String,
        /// Tool name.
        name: String,
        /// Arguments as parsed JSON.
        input: Value,
    },
    /// The result of a tool invocation.
    ToolResult {
        /// Id of the call being answered.
        tool_call_id: String,
        /// Result content.
        content: ToolResultContent,
        /// Whether the tool failed.
        is_error: Option<bool>,
    },
    /// Extended thinking.
    Thinking {
        /// The thinking text.
        text: String,
    },
}

/// Tool result content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    /// A single text result.
    Text(String),
    /// Multiple result fragments.
    Multiple(Vec<String>),
}

/// Image reference or inline bytes; never decoded by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ImageSource {
    /// Inline base64 bytes plus MIME type.
    Base64 {
        /// MIME type, e.g. `image/png`.
        media_type: String,
        /// The encoded bytes.
        data: String,
    },
    /// An external URL.
    Url {
        /// The image URL.
        url: String,
    },
}

/// A tool the model may call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name, unique within the request.
    pub name: String,
    /// What the tool does.
    pub description: String,
    /// JSON Schema of the accepted arguments.
    pub parameters: Value,
}

/// Controls whether and which tools the model uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    /// Model decides.
    Auto,
    /// Tools disabled.
    None,
    /// Model must use at least one tool.
    Required,
    /// Force a specific tool.
    Tool {
        /// Name of the forced tool.
        name: String,
    },
}

/// Canonical non-streaming response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Response id, stable for the transaction.
    pub id: String,
    /// The model that produced the response.
    pub model: String,
    /// Generated choices; index 0 is the primary response.
    pub choices: Vec<Choice>,
    /// Token usage.
    pub usage: Option<Usage>,
}

impl Response {
    /// Text of the primary choice, for logs and tests.
    pub fn primary_text(&self) -> String {
        self.choices.first().map(|c| c.message.text_content()).unwrap_or_default()
    }
}

/// One generated choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    /// Choice index.
    pub index: u32,
    /// The generated assistant message.
    pub message: Message,
    /// Why generation stopped.
    pub finish_reason: Option<FinishReason>,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural stop.
    Stop,
    /// Token limit reached.
    Length,
    /// Content was filtered or refused.
    ContentFilter,
    /// The model called tools.
    ToolCalls,
    /// Forward-compatible catch-all.
    #[serde(untagged)]
    Other(String),
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinishReason::Stop => write!(f, "stop"),
            FinishReason::Length => write!(f, "length"),
            FinishReason::ContentFilter => write!(f, "content_filter"),
            FinishReason::ToolCalls => write!(f, "tool_calls"),
            FinishReason::Other(s) => write!(f, "{s}"),
        }
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt.
    pub prompt_tokens: u32,
    /// Tokens in the completion.
    pub completion_tokens: u32,
    /// Sum of both.
    pub total_tokens: u32,
}

/// One chunk of a streaming response.
///
/// Exactly one chunk in a well-formed stream carries a `finish_reason`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Stream id, stable across all chunks of a response.
    pub id: String,
    /// The model producing the stream.
    pub model: String,
    /// Which choice this chunk updates.
    pub choice_index: u32,
    /// The incremental content.
    pub delta: Delta,
    /// Present on the terminal chunk only.
    pub finish_reason: Option<FinishReason>,
    /// Usage; providers attach it to the terminal chunk.
    pub usage: Option<Usage>,
}

impl Chunk {
    /// A chunk carrying only a text fragment.
    pub fn text(id: impl Into<String>, model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            choice_index: 0,
            delta: Delta {
                content: Some(text.into()),
                ..Delta::default()
            },
            finish_reason: None,
            usage: None,
        }
    }

    /// A terminal chunk carrying only a finish reason.
    pub fn finish(id: impl Into<String>, model: impl Into<String>, reason: FinishReason) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            choice_index: 0,
            delta: Delta::default(),
            finish_reason: Some(reason),
            usage: None,
        }
    }

    /// The same chunk with its text fragment swapped out.
    pub fn with_content(&self, text: impl Into<String>) -> Self {
        let mut chunk = self.clone();
        chunk.delta.content = Some(text.into());
        chunk
    }
}

/// Incremental message content in a chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Delta {
    /// Role, present in the first chunk only.
    pub role: Option<Role>,
    /// Text fragment to append.
    pub content: Option<String>,
    /// Tool call update.
    pub tool_call: Option<ToolCallDelta>,
    /// Thinking fragment to append.
    pub thinking: Option<String>,
}

/// Tool calls arrive as a start marker followed by raw argument fragments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolCallDelta {
    /// Establishes a new tool call.
    Start {
        /// Unique call id.
        id: String,
        /// Tool name.
        name: String,
    },
    /// Appends raw argument characters to the open call. The gateway never
    /// parses these; policies that need parsed arguments handle partial
    /// JSON themselves.
    Fragment {
        /// The raw characters.
        arguments: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool_use_message(id: &str) -> Message {
        Message {
            role: Role::Assistant,
            content: MessageContent::Parts(vec![ContentPart::ToolUse {
                id: id.to_string(),
                name: "search".to_string(),
                input: json!({}),
            }]),
            tool_call_id: None,
        }
    }

    #[test]
    fn validate_rejects_empty_messages() {
        let request = Request {
            model: "m".to_string(),
            messages: vec![],
            system: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop_sequences: None,
            stream: false,
            tools: None,
            tool_choice: None,
            metadata: None,
            session_id: None,
        };

        let error = request.validate().unwrap_err();
        assert!(error.to_string().contains("at least one message"));
    }

    #[test]
    fn validate_accepts_tool_message_citing_earlier_call() {
        let request = Request {
            model: "m".to_string(),
            messages: vec![
                Message::text(Role::User, "hi"),
                tool_use_message("call_1"),
                Message {
                    role: Role::Tool,
                    content: MessageContent::Text("result".to_string()),
                    tool_call_id: Some("call_1".to_string()),
                },
            ],
            system: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop_sequences: None,
            stream: false,
            tools: None,
            tool_choice: None,
            metadata: None,
            session_id: None,
        };

        request.validate().unwrap();
    }

    #[test]
    fn validate_rejects_dangling_tool_call_id() {
        let request = Request {
            model: "m".to_string(),
            messages: vec![
                Message::text(Role::User, "hi"),
                Message {
                    role: Role::Tool,
                    content: MessageContent::Text("result".to_string()),
                    tool_call_id: Some("call_unknown".to_string()),
                },
            ],
            system: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop_sequences: None,
            stream: false,
            tools: None,
            tool_choice: None,
            metadata: None,
            session_id: None,
        };

        let error = request.validate().unwrap_err();
        assert!(error.to_string().contains("call_unknown"));
    }

    #[test]
    fn validate_rejects_tool_result_in_assistant_message() {
        let request = Request {
            model: "m".to_string(),
            messages: vec![Message {
                role: Role::Assistant,
                content: MessageContent::Parts(vec![ContentPart::ToolResult {
                    tool_call_id: "call_1".to_string(),
                    content: ToolResultContent::Text("out".to_string()),
                    is_error: None,
                }]),
                tool_call_id: None,
            }],
            system: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop_sequences: None,
            stream: false,
            tools: None,
            tool_choice: None,
            metadata: None,
            session_id: None,
        };

        let error = request.validate().unwrap_err();
        assert!(error.to_string().contains("tool_result"));
    }

    #[test]
    fn chunk_with_content_preserves_identity() {
        let chunk = Chunk::text("id-1", "gpt-4o", "hello");
        let replaced = chunk.with_content("HELLO");

        assert_eq!(replaced.id, "id-1");
        assert_eq!(replaced.delta.content.as_deref(), Some("HELLO"));
        assert!(replaced.finish_reason.is_none());
    }
}
