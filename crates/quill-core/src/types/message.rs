use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::content::Content;
use crate::types::tool::ToolCall;

/// Longest accepted participant name
pub const MAX_NAME_LEN: usize = 64;

/// Message role in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A single chat turn.
///
/// `content` is serialized as `null` when absent, which is the required
/// shape for assistant turns that only carry tool calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    fn with_role(role: Role, content: Option<Content>) -> Self {
        Self {
            role,
            content,
            name: None,
            tool_calls: None,
            tool_call_id: None,
            timestamp: None,
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, Some(Content::Text(content.into())))
    }

    /// Create a user message
    pub fn user(content: impl Into<Content>) -> Self {
        Self::with_role(Role::User, Some(content.into()))
    }

    /// Create an assistant prose message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, Some(Content::Text(content.into())))
    }

    /// Create an assistant message that only invokes tools
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::with_role(Role::Assistant, None);
        msg.tool_calls = Some(tool_calls);
        msg
    }

    /// Create a tool result message
    pub fn tool(call_id: impl Into<String>, result: impl Into<String>) -> Self {
        let mut msg = Self::with_role(Role::Tool, Some(Content::Text(result.into())));
        msg.tool_call_id = Some(call_id.into());
        msg
    }

    /// Set the participant name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the timestamp
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Text of the message, empty when content is null
    pub fn text_content(&self) -> String {
        self.content
            .as_ref()
            .map(|c| c.to_text())
            .unwrap_or_default()
    }

    /// Check if this message contains tool calls
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().map(|tc| !tc.is_empty()).unwrap_or(false)
    }

    /// Ids of the tool calls this message issues
    pub fn tool_call_ids(&self) -> impl Iterator<Item = &str> {
        self.tool_calls
            .iter()
            .flatten()
            .map(|call| call.id.as_str())
    }

    /// Check the message against the conversation shape rules.
    ///
    /// Whether a tool message points at a call that was actually issued
    /// earlier depends on the surrounding history, so that check lives in
    /// the history store.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(name) = &self.name {
            let valid_chars = name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
            if name.chars().count() > MAX_NAME_LEN || !valid_chars {
                return Err(ValidationError::InvalidName(name.clone()));
            }
        }

        if self.tool_calls.is_some() && self.role != Role::Assistant {
            return Err(ValidationError::ToolCallsNotAllowed(self.role));
        }

        if self.has_tool_calls() {
            if self.content.is_some() {
                return Err(ValidationError::ContentWithToolCalls);
            }
            if self.tool_call_ids().any(str::is_empty) {
                return Err(ValidationError::EmptyToolCallId);
            }
        }

        if self.role == Role::Tool {
            match self.tool_call_id.as_deref() {
                Some(id) if !id.is_empty() => {}
                _ => return Err(ValidationError::MissingToolCallId),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::content::ContentPart;

    #[test]
    fn test_constructors() {
        let msg = Message::system("You are a helpful assistant");
        assert_eq!(msg.role, Role::System);
        assert_eq!(msg.text_content(), "You are a helpful assistant");

        let msg = Message::tool("call_123", "Tool result");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_123"));
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn test_assistant_with_tool_calls_and_content_fails() {
        let mut msg = Message::assistant_tool_calls(vec![ToolCall::new("c1", "f", "{}")]);
        assert!(msg.validate().is_ok());

        msg.content = Some(Content::text("also prose"));
        assert_eq!(msg.validate(), Err(ValidationError::ContentWithToolCalls));
    }

    #[test]
    fn test_tool_without_call_id_fails() {
        let mut msg = Message::tool("c1", "x");
        msg.tool_call_id = None;
        assert_eq!(msg.validate(), Err(ValidationError::MissingToolCallId));

        msg.tool_call_id = Some(String::new());
        assert_eq!(msg.validate(), Err(ValidationError::MissingToolCallId));
    }

    #[test]
    fn test_name_rules() {
        assert!(Message::user("hi").with_name("alice_01").validate().is_ok());
        assert!(Message::user("hi").with_name("bad name").validate().is_err());
        assert!(Message::user("hi").with_name("a".repeat(65)).validate().is_err());
    }

    #[test]
    fn test_tool_calls_only_on_assistant() {
        let mut msg = Message::user("hi");
        msg.tool_calls = Some(vec![ToolCall::new("c1", "f", "{}")]);
        assert_eq!(
            msg.validate(),
            Err(ValidationError::ToolCallsNotAllowed(Role::User))
        );
    }

    #[test]
    fn test_null_content_serialization() {
        let msg = Message::assistant_tool_calls(vec![ToolCall::new("c1", "f", "{}")]);
        let value = serde_json::to_value(&msg).unwrap();
        assert!(value["content"].is_null());
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["tool_calls"][0]["id"], "c1");

        let back: Message = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_deserialize_multimodal() {
        let json = r#"{
            "role": "user",
            "content": [{"type": "text", "text": "what is this?"},
                        {"type": "image_url", "image_url": {"url": "file:///a.png"}}]
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg.content,
            Some(Content::parts(vec![
                ContentPart::text("what is this?"),
                ContentPart::image_url("file:///a.png", None),
            ]))
        );
        assert!(msg.timestamp.is_none());
    }
}
