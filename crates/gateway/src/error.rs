//! Gateway error taxonomy.
//!
//! Every failure the pipeline can produce maps to one of these kinds, each
//! with a fixed HTTP status and a dialect-native body. The OpenAI shape is
//! the `IntoResponse` default; Anthropic handlers wrap errors in
//! [`AnthropicErrorResponse`].

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::protocol::{anthropic, openai};

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Errors surfaced by the gateway pipeline.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed client input. Never retried.
    #[error("Invalid request at '{path}': {reason}")]
    InvalidRequest {
        /// JSON path of the offending field.
        path: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Missing or wrong gateway credentials.
    #[error("Unauthorized")]
    Unauthorized,

    /// Request body exceeded the configured limit.
    #[error("Request body exceeds the configured limit of {limit} bytes")]
    RequestTooLarge {
        /// The configured byte limit.
        limit: usize,
    },

    /// A request-side policy declined the request.
    #[error("{message}")]
    PolicyRejection {
        /// The policy's message, surfaced verbatim.
        message: String,
        /// Override status; defaults to 400.
        status: Option<u16>,
    },

    /// The pipeline stalled or exceeded its overall deadline.
    #[error("Policy pipeline timed out")]
    PolicyTimeout,

    /// A policy hook raised an unexpected error.
    #[error("Policy '{policy}' failed: {message}")]
    PolicyError {
        /// Name of the failing policy.
        policy: String,
        /// What went wrong.
        message: String,
    },

    /// The provider returned a non-retryable error.
    #[error("Upstream error ({status}): {message}")]
    UpstreamError {
        /// The provider's HTTP status.
        status: u16,
        /// The provider's message, credentials redacted.
        message: String,
    },

    /// Connectivity failure or retryable provider error, after retries.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The client went away mid-request. Not an error to the client.
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Anything else. If `Some(message)`, it came from outside and can be
    /// shown; if `None`, details stay in the logs.
    #[error("Internal server error")]
    Internal(Option<String>),
}

impl GatewayError {
    /// The HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::RequestTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::PolicyRejection { status, .. } => status
                .and_then(|code| StatusCode::from_u16(code).ok())
                .unwrap_or(StatusCode::BAD_REQUEST),
            Self::PolicyTimeout => StatusCode::REQUEST_TIMEOUT,
            Self::PolicyError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UpstreamError { .. } => StatusCode::BAD_GATEWAY,
            Self::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            // 499 is nginx's "client closed request"; it only ever reaches
            // access logs, never a connected client.
            Self::ClientDisconnected => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error type string, shared by both dialect shapes.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request_error",
            Self::Unauthorized => "authentication_error",
            Self::RequestTooLarge { .. } => "request_too_large",
            Self::PolicyRejection { .. } => "policy_rejection",
            Self::PolicyTimeout => "policy_timeout",
            Self::PolicyError { .. } => "policy_error",
            Self::UpstreamError { .. } => "api_error",
            Self::UpstreamUnavailable(_) => "overloaded_error",
            Self::ClientDisconnected => "client_disconnected",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether the pipeline may retry the upstream call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable(_))
    }

    /// Message that is safe to expose to API consumers.
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal(Some(message)) => message.clone(),
            Self::Internal(None) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Strip credential-looking material from provider error messages.
pub(crate) fn redact_credentials(message: &str) -> String {
    static PATTERNS: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

    let regex = PATTERNS.get_or_init(|| {
        regex::Regex::new(r"(?i)(sk-[A-Za-z0-9_-]{8,}|bearer\s+\S+|x-api-key:\s*\S+)")
            .expect("credential pattern compiles")
    });

    regex.replace_all(message, "[redacted]").into_owned()
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_response = openai::ErrorResponse {
            error: openai::ErrorDetails {
                message: self.client_message(),
                r#type: self.error_type().to_string(),
                code: status.as_u16(),
            },
        };

        (status, Json(error_response)).into_response()
    }
}

/// A gateway error rendered in the Anthropic error shape.
pub struct AnthropicErrorResponse {
    status: StatusCode,
    body: anthropic::ErrorResponse,
}

impl From<GatewayError> for AnthropicErrorResponse {
    fn from(error: GatewayError) -> Self {
        Self {
            status: error.status_code(),
            body: anthropic::ErrorResponse::from(error),
        }
    }
}

impl From<GatewayError> for anthropic::ErrorResponse {
    fn from(error: GatewayError) -> Self {
        Self {
            r#type: "error".to_string(),
            error: anthropic::ErrorDetails {
                r#type: error.error_type().to_string(),
                message: error.client_message(),
            },
        }
    }
}

impl IntoResponse for AnthropicErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub type AnthropicResult<T> = std::result::Result<T, AnthropicErrorResponse>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_taxonomy() {
        assert_eq!(
            GatewayError::InvalidRequest {
                path: "model".to_string(),
                reason: "missing".to_string()
            }
            .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(GatewayError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            GatewayError::RequestTooLarge { limit: 1024 }.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(GatewayError::PolicyTimeout.status_code(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(
            GatewayError::UpstreamError {
                status: 500,
                message: "boom".to_string()
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::UpstreamUnavailable("down".to_string()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(GatewayError::ClientDisconnected.status_code().as_u16(), 499);
    }

    #[test]
    fn policy_rejection_honors_custom_status() {
        let error = GatewayError::PolicyRejection {
            message: "blocked".to_string(),
            status: Some(403),
        };
        assert_eq!(error.status_code(), StatusCode::FORBIDDEN);

        let default = GatewayError::PolicyRejection {
            message: "blocked".to_string(),
            status: None,
        };
        assert_eq!(default.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn internal_without_message_does_not_leak() {
        let error = GatewayError::Internal(None);
        assert_eq!(error.client_message(), "Internal server error");
    }

    #[test]
    fn redacts_api_keys_and_bearer_tokens() {
        let redacted = redact_credentials("auth failed for sk-proj-abcdef123456 via Bearer tok_123");
        assert!(!redacted.contains("sk-proj"));
        assert!(!redacted.contains("tok_123"));
        assert!(redacted.contains("[redacted]"));
    }
}
