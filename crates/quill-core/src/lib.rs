//! quill-core - shared types for the Quill session stores
//!
//! This crate provides:
//! - The chat [`Message`] model with content blocks and tool calls
//! - Message validation rules
//! - The [`Summarizer`] collaborator trait (an opaque LLM call)
//! - A [`Clock`] abstraction so expiry and idle logic can be driven in tests

pub mod clock;
pub mod error;
pub mod summarizer;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::ValidationError;
pub use summarizer::{SummarizeError, Summarizer};
pub use types::content::{Content, ContentPart, ImageUrl};
pub use types::message::{Message, Role};
pub use types::tool::{FunctionCall, ToolCall, ToolCallKind};

/// Re-export async_trait for implementers
pub use async_trait::async_trait;
