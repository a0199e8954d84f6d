//! Anthropic messages wire format, including the streaming event grammar.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for the Anthropic Messages API.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessagesRequest {
    /// The model to use for the completion.
    pub model: String,

    /// The conversation, alternating user and assistant turns.
    pub messages: Vec<Message>,

    /// Maximum number of tokens to generate. Required by this dialect.
    pub max_tokens: u32,

    /// System prompt; a plain string or an array of text blocks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,

    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling cutoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Sequences that stop generation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    /// Whether to stream the response as SSE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// Request metadata; `user_id` may carry an encoded session id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,

    /// Tools the model may use.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,

    /// Controls how the model uses tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

/// System prompt accepts both a string and an array of text blocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    /// Plain text.
    Text(String),
    /// Structured text blocks.
    Blocks(Vec<SystemBlock>),
}

impl SystemPrompt {
    /// Flatten to a single string.
    pub fn into_text(self) -> String {
        match self {
            SystemPrompt::Text(text) => text,
            SystemPrompt::Blocks(blocks) => blocks
                .into_iter()
                .map(|block| block.text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// One block of a structured system prompt.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemBlock {
    /// Always "text".
    pub r#type: String,
    /// The text content.
    pub text: String,
}

/// A message with role and content.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    /// Who authored the message.
    pub role: Role,
    /// Content; a plain string or an array of content blocks.
    pub content: MessageContent,
}

/// Message content accepts both a string and an array of blocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text shorthand.
    Text(String),
    /// Typed content blocks.
    Blocks(Vec<ContentBlock>),
}

/// Message sender role. This dialect has no system or tool roles; system
/// prompts are a separate field and tool results live in user messages.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End-user input.
    User,
    /// Model output.
    Assistant,
}

/// A content block within a message.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// An image.
    Image {
        /// The image source.
        source: ImageSource,
    },
    /// A tool invocation by the assistant.
    ToolUse {
        /// Unique id, format `toolu_...`.
        id: String,
        /// Name of the invoked tool.
        name: String,
        /// Arguments as parsed JSON.
        input: Value,
    },
    /// The result of a tool invocation.
    ToolResult {
        /// Id of the tool_use block being answered.
        tool_use_id: String,
        /// Result content.
        content: ToolResultContent,
        /// Whether the tool failed.
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    /// Extended thinking emitted by the model.
    Thinking {
        /// The thinking text.
        thinking: String,
        /// Integrity signature, passed through opaquely.
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
}

/// Tool result content; a plain string or an array of text blocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    /// Plain text result.
    Text(String),
    /// Structured result blocks.
    Blocks(Vec<ToolResultBlock>),
}

/// One block of a structured tool result.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultBlock {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
}

/// Image source.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ImageSource {
    /// Inline base64 data.
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

/// Request metadata.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Metadata {
    /// Caller-supplied user identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// A tool definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Tool {
    /// Tool name.
    pub name: String,
    /// What the tool does.
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the accepted input.
    pub input_schema: Value,
}

/// Controls whether and which tools the model uses.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    /// Model decides.
    Auto,
    /// Model must use some tool.
    Any,
    /// Tools disabled.
    None,
    /// Force a specific tool.
    Tool {
        /// Name of the forced tool.
        name: String,
    },
}

/// Response body for a non-streaming message.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessagesResponse {
    /// Message id, format `msg_...`.
    pub id: String,
    /// Always "message".
    pub r#type: String,
    /// Always "assistant".
    pub role: Role,
    /// Generated content blocks.
    pub content: Vec<ContentBlock>,
    /// The model that produced the response.
    pub model: String,
    /// Why generation stopped.
    pub stop_reason: Option<StopReason>,
    /// Which stop sequence fired, if any.
    pub stop_sequence: Option<String>,
    /// Token usage.
    pub usage: Usage,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of turn.
    EndTurn,
    /// Token limit reached.
    MaxTokens,
    /// A stop sequence fired.
    StopSequence,
    /// The model invoked a tool.
    ToolUse,
    /// The model refused to answer.
    Refusal,
    /// Forward-compatible catch-all.
    #[serde(untagged)]
    Other(String),
}

/// Token usage.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct Usage {
    /// Tokens in the input. Streaming `message_delta` events may omit this.
    #[serde(default)]
    pub input_tokens: u32,
    /// Tokens generated so far.
    pub output_tokens: u32,
}

/// Error body in the Anthropic shape.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorResponse {
    /// Always "error".
    pub r#type: String,
    /// Error details.
    pub error: ErrorDetails,
}

/// Error detail fields.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorDetails {
    /// Machine-readable error type, e.g. `invalid_request_error`.
    pub r#type: String,
    /// Human-readable message.
    pub message: String,
}

/// Streaming SSE events.
///
/// A well-formed stream is `message_start`, then per content block
/// `content_block_start`, zero or more `content_block_delta`,
/// `content_block_stop`, then `message_delta` and `message_stop`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Opens the message with its metadata.
    MessageStart {
        /// Initial message envelope.
        message: StreamMessageStart,
    },
    /// Opens a content block at an index.
    ContentBlockStart {
        /// Block index, assigned in emission order from 0.
        index: u32,
        /// The opened block.
        content_block: StreamContentBlock,
    },
    /// Appends content to the block at an index.
    ContentBlockDelta {
        /// Block index.
        index: u32,
        /// The appended content.
        delta: ContentDelta,
    },
    /// Closes the block at an index.
    ContentBlockStop {
        /// Block index.
        index: u32,
    },
    /// Carries the stop reason and final usage.
    MessageDelta {
        /// Stop reason and sequence.
        delta: MessageDeltaData,
        /// Final usage counts.
        usage: Usage,
    },
    /// Ends the stream.
    MessageStop,
    /// Keepalive; carries no content.
    Ping,
    /// Terminal error; the stream ends after this event.
    Error {
        /// The error details.
        error: ErrorDetails,
    },
}

impl StreamEvent {
    /// The SSE `event:` name for this event.
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamEvent::MessageStart { .. } => "message_start",
            StreamEvent::ContentBlockStart { .. } => "content_block_start",
            StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
            StreamEvent::ContentBlockStop { .. } => "content_block_stop",
            StreamEvent::MessageDelta { .. } => "message_delta",
            StreamEvent::MessageStop => "message_stop",
            StreamEvent::Ping => "ping",
            StreamEvent::Error { .. } => "error",
        }
    }
}

/// Message envelope carried by `message_start`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamMessageStart {
    /// Message id.
    pub id: String,
    /// Always "message".
    pub r#type: String,
    /// Always "assistant".
    pub role: Role,
    /// Empty at start; populated through block events.
    pub content: Vec<Value>,
    /// The model producing the stream.
    pub model: String,
    /// Initial usage (input tokens known, output zero).
    pub usage: Usage,
}

/// The shape of a block announced by `content_block_start`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamContentBlock {
    /// A text block; `text` is empty at start.
    Text {
        /// Initial text, normally empty.
        text: String,
    },
    /// A tool invocation; arguments arrive via `input_json_delta`.
    ToolUse {
        /// Unique call id.
        id: String,
        /// Tool name.
        name: String,
        /// Initial input, normally an empty object.
        #[serde(default)]
        input: Value,
    },
    /// A thinking block; text arrives via `thinking_delta`.
    Thinking {
        /// Initial thinking text, normally empty.
        #[serde(default)]
        thinking: String,
    },
}

/// Incremental content carried by `content_block_delta`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    /// Text fragment for a text block.
    TextDelta {
        /// The fragment to append.
        text: String,
    },
    /// Raw argument characters for a tool_use block.
    InputJsonDelta {
        /// The partial JSON to append.
        partial_json: String,
    },
    /// Thinking fragment for a thinking block.
    ThinkingDelta {
        /// The fragment to append.
        thinking: String,
    },
    /// Thinking signature; passed through opaquely.
    SignatureDelta {
        /// The signature fragment.
        signature: String,
    },
}

/// Stop metadata carried by `message_delta`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MessageDeltaData {
    /// Why generation stopped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    /// Which stop sequence fired.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
}
