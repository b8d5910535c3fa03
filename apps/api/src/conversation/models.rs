use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Body of `POST /api/companion/chat`.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    /// Parses and validates a raw request body. Any invalid entry rejects the
    /// whole request; nothing is partially accepted.
    pub fn from_json(body: &[u8], max_messages: usize) -> Result<Self, AppError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| AppError::Validation(format!("Body is not valid JSON: {e}")))?;

        let entries = value
            .get("messages")
            .and_then(Value::as_array)
            .ok_or_else(|| AppError::Validation("`messages` must be an array".to_string()))?;

        if entries.len() > max_messages {
            return Err(AppError::Validation(format!(
                "At most {max_messages} messages are accepted per request"
            )));
        }

        let messages = entries
            .iter()
            .enumerate()
            .map(|(i, entry)| parse_entry(i, entry))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { messages })
    }
}

fn parse_entry(index: usize, entry: &Value) -> Result<ChatMessage, AppError> {
    let role = entry
        .get("role")
        .and_then(Value::as_str)
        .and_then(Role::parse)
        .ok_or_else(|| {
            AppError::Validation(format!(
                "messages[{index}].role must be one of user, assistant, system"
            ))
        })?;

    let content = entry
        .get("content")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            AppError::Validation(format!("messages[{index}].content must be a string"))
        })?;

    Ok(ChatMessage::new(role, content))
}

/// Reply returned to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanionReply {
    pub reply: String,
    pub suggested_actions: Vec<String>,
    pub source: ReplySource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    Model,
    Fallback,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_valid_request() {
        let body = br#"{"messages":[{"role":"user","content":"hi"},{"role":"assistant","content":"hello"}]}"#;
        let req = ChatRequest::from_json(body, 100).unwrap();
        assert_eq!(
            req.messages,
            vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")]
        );
    }

    #[test]
    fn test_empty_content_is_accepted_at_validation() {
        // Blank messages are dropped later during assembly, not rejected here.
        let req = ChatRequest::from_json(br#"{"messages":[{"role":"user","content":"  "}]}"#, 100)
            .unwrap();
        assert_eq!(req.messages.len(), 1);
    }

    #[test]
    fn test_rejects_unknown_role() {
        let body = br#"{"messages":[{"role":"user","content":"ok"},{"role":"tool","content":"x"}]}"#;
        let err = ChatRequest::from_json(body, 100).unwrap_err();
        assert!(matches!(err, AppError::Validation(msg) if msg.contains("messages[1].role")));
    }

    #[test]
    fn test_rejects_non_string_content() {
        let body = br#"{"messages":[{"role":"user","content":42}]}"#;
        assert!(matches!(
            ChatRequest::from_json(body, 100),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_rejects_missing_messages_and_bad_json() {
        assert!(ChatRequest::from_json(br#"{"msgs":[]}"#, 100).is_err());
        assert!(ChatRequest::from_json(br#"{"messages":"hi"}"#, 100).is_err());
        assert!(ChatRequest::from_json(b"not json", 100).is_err());
    }

    #[test]
    fn test_rejects_too_many_messages() {
        let body = br#"{"messages":[{"role":"user","content":"a"},{"role":"user","content":"b"}]}"#;
        assert!(ChatRequest::from_json(body, 1).is_err());
    }

    #[test]
    fn test_reply_serializes_camel_case() {
        let reply = CompanionReply {
            reply: "hey".to_string(),
            suggested_actions: vec!["Log mood".to_string()],
            source: ReplySource::Fallback,
        };
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["suggestedActions"][0], "Log mood");
        assert_eq!(json["source"], "fallback");
    }
}
