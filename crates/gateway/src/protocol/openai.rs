//! OpenAI chat completions wire format.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for the OpenAI chat completions API.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatCompletionRequest {
    /// The model to use for the completion.
    pub model: String,

    /// The conversation so far, oldest first.
    pub messages: Vec<ChatMessage>,

    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling cutoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Up to four sequences where generation stops.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequences>,

    /// Whether to stream the response as SSE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// Tools the model may call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,

    /// Controls how the model uses tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    /// Opaque request metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, Value>>,
}

/// Stop sequences accept both a single string and an array.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum StopSequences {
    /// A single stop sequence.
    One(String),
    /// Multiple stop sequences.
    Many(Vec<String>),
}

impl From<StopSequences> for Vec<String> {
    fn from(stop: StopSequences) -> Self {
        match stop {
            StopSequences::One(s) => vec![s],
            StopSequences::Many(v) => v,
        }
    }
}

/// A chat message.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatMessage {
    /// Who authored the message.
    pub role: ChatRole,

    /// Message content; string for plain text, array for multi-modal parts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ChatContent>,

    /// Tool calls issued by the assistant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// For `tool` messages, the id of the call being answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// Message sender role.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System instructions.
    System,
    /// End-user input.
    User,
    /// Model output.
    Assistant,
    /// Tool execution result.
    Tool,
}

/// Content is either a plain string or an array of typed parts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ChatContent {
    /// Plain text content.
    Text(String),
    /// Multi-modal content parts.
    Parts(Vec<ChatContentPart>),
}

/// A single content part in a multi-modal message.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatContentPart {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// An image reference.
    ImageUrl {
        /// The image URL container.
        image_url: ImageUrl,
    },
}

/// Image reference; may be an HTTP URL or a data URI.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageUrl {
    /// The URL or data URI.
    pub url: String,
}

/// A tool the model may call.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Tool {
    /// Always "function".
    pub r#type: ToolType,
    /// The function specification.
    pub function: FunctionDefinition,
}

/// The only tool type OpenAI defines today.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolType {
    /// A callable function.
    Function,
}

/// Function specification for a tool.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionDefinition {
    /// Function name, unique among tools.
    pub name: String,
    /// What the function does.
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the accepted arguments.
    #[serde(default)]
    pub parameters: Value,
}

/// Controls whether and which tools the model uses.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ToolChoice {
    /// `"none"`, `"auto"` or `"required"`.
    Mode(ToolChoiceMode),
    /// Force a specific function.
    Specific {
        /// Always "function".
        r#type: ToolType,
        /// The forced function.
        function: FunctionName,
    },
}

/// Mode-based tool choice.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoiceMode {
    /// Tools disabled.
    None,
    /// Model decides.
    Auto,
    /// Model must call at least one tool.
    Required,
}

/// Names a specific function.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionName {
    /// The function name.
    pub name: String,
}

/// A tool call in an assistant message.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolCall {
    /// Unique id of this call, cited by the tool result.
    pub id: String,
    /// Always "function".
    pub r#type: ToolType,
    /// The invoked function and its arguments.
    pub function: FunctionCall,
}

/// An invoked function with raw JSON arguments.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionCall {
    /// The function name.
    pub name: String,
    /// Arguments as a JSON string; not parsed by the gateway.
    pub arguments: String,
}

/// Response body for a non-streaming completion.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatCompletionResponse {
    /// Completion id, e.g. `chatcmpl-...`.
    pub id: String,
    /// Always `chat.completion`.
    pub object: ObjectType,
    /// Unix timestamp of creation.
    pub created: u64,
    /// The model that produced the response.
    pub model: String,
    /// Generated choices; index 0 is the primary response.
    pub choices: Vec<ChatChoice>,
    /// Token usage for the request/response pair.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// One generated choice.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatChoice {
    /// Choice index.
    pub index: u32,
    /// The generated message.
    pub message: ChatMessage,
    /// Why generation stopped.
    pub finish_reason: Option<FinishReason>,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural stop.
    Stop,
    /// Token limit reached.
    Length,
    /// Content was filtered.
    ContentFilter,
    /// The model called tools.
    ToolCalls,
    /// Forward-compatible catch-all.
    #[serde(untagged)]
    Other(String),
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct Usage {
    /// Tokens in the prompt.
    pub prompt_tokens: u32,
    /// Tokens in the completion.
    pub completion_tokens: u32,
    /// Sum of both.
    pub total_tokens: u32,
}

/// Object type marker in responses.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub enum ObjectType {
    /// A complete chat completion.
    #[serde(rename = "chat.completion")]
    ChatCompletion,
    /// A streaming chunk.
    #[serde(rename = "chat.completion.chunk")]
    ChatCompletionChunk,
}

/// One SSE chunk of a streaming completion.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatCompletionChunk {
    /// Completion id, stable across the stream.
    pub id: String,
    /// Always `chat.completion.chunk`.
    pub object: ObjectType,
    /// Unix timestamp of creation.
    pub created: u64,
    /// The model producing the stream.
    pub model: String,
    /// Incremental choice updates.
    pub choices: Vec<ChatChoiceDelta>,
    /// Usage, present on the final chunk only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Incremental update for one choice.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatChoiceDelta {
    /// Choice index.
    pub index: u32,
    /// The content to append.
    pub delta: ChatMessageDelta,
    /// Present on the final chunk for this choice.
    pub finish_reason: Option<FinishReason>,
}

/// Partial message content in a chunk.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ChatMessageDelta {
    /// Role, present in the first chunk only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<ChatRole>,
    /// Text fragment to append.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool call updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<StreamingToolCall>>,
}

/// Tool calls build up incrementally: a start frame, then argument deltas.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum StreamingToolCall {
    /// Establishes a new tool call.
    Start {
        /// Position in the tool_calls array.
        index: usize,
        /// Unique call id.
        id: String,
        /// Always "function".
        r#type: ToolType,
        /// Function name plus (usually empty) initial arguments.
        function: FunctionStart,
    },
    /// Appends argument bytes to an established call.
    Delta {
        /// Position matching the call being updated.
        index: usize,
        /// The argument fragment.
        function: FunctionDelta,
    },
}

/// Initial function information for a streaming tool call.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionStart {
    /// Function name.
    pub name: String,
    /// Initial arguments, usually empty.
    #[serde(default)]
    pub arguments: String,
}

/// Argument fragment for a streaming tool call.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionDelta {
    /// Raw characters to append to the call's arguments.
    pub arguments: String,
}

/// Error body in the OpenAI shape.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorResponse {
    /// Error details.
    pub error: ErrorDetails,
}

/// Error detail fields.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorDetails {
    /// Human-readable message.
    pub message: String,
    /// Machine-readable error type.
    pub r#type: String,
    /// HTTP status code.
    pub code: u16,
}
