//! Error types for quill-core

use thiserror::Error;

use crate::types::message::Role;

/// A message that breaks the conversation shape rules.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("assistant message with tool calls must have null content")]
    ContentWithToolCalls,

    #[error("tool message requires a tool_call_id")]
    MissingToolCallId,

    #[error("tool message references unknown tool call id: {0}")]
    UnknownToolCallId(String),

    #[error("tool calls are only allowed on assistant messages, got role {0}")]
    ToolCallsNotAllowed(Role),

    #[error("tool call id must not be empty")]
    EmptyToolCallId,

    #[error("invalid name '{0}': at most 64 characters of [a-zA-Z0-9_]")]
    InvalidName(String),
}
