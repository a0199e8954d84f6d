//! Session-id extraction from the two dialects.
//!
//! OpenAI clients pass an `x-session-id` header; Anthropic clients encode
//! the session into `metadata.user_id` as
//! `user_<hash>_account__session_<uuid>`.

use std::sync::OnceLock;

use axum::http::HeaderMap;
use regex::Regex;

use crate::canonical::Request;

const SESSION_HEADER: &str = "x-session-id";

fn user_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^user_[^_]+_account__session_([0-9a-f-]+)$").expect("session pattern compiles")
    })
}

/// Session id from the `x-session-id` header, if present.
pub fn from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Session id encoded in `metadata.user_id`, if present and well-formed.
pub fn from_metadata(request: &Request) -> Option<String> {
    let user_id = request.metadata.as_ref()?.get("user_id")?.as_str()?;

    user_id_pattern()
        .captures(user_id)
        .map(|captures| captures[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::{Message, MessageContent, Request, Role};
    use serde_json::json;

    fn request_with_user_id(user_id: &str) -> Request {
        let mut metadata = serde_json::Map::new();
        metadata.insert("user_id".to_string(), json!(user_id));

        Request {
            model: "m".to_string(),
            messages: vec![Message {
                role: Role::User,
                content: MessageContent::Text("hi".to_string()),
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
            metadata: Some(metadata),
            session_id: None,
        }
    }

    #[test]
    fn extracts_session_from_encoded_user_id() {
        let request =
            request_with_user_id("user_3f2a_account__session_a1b2c3d4-e5f6-4a0b-8c0d-9e8f7a6b5c4d");

        assert_eq!(
            from_metadata(&request).as_deref(),
            Some("a1b2c3d4-e5f6-4a0b-8c0d-9e8f7a6b5c4d")
        );
    }

    #[test]
    fn plain_user_id_yields_no_session() {
        let request = request_with_user_id("user-42");
        assert_eq!(from_metadata(&request), None);
    }

    #[test]
    fn header_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert("x-session-id", "sess-123".parse().unwrap());

        assert_eq!(from_headers(&headers).as_deref(), Some("sess-123"));
        assert_eq!(from_headers(&HeaderMap::new()), None);
    }
}
