//! quill-tool - LLM-callable tools over the Quill session stores
//!
//! This crate provides:
//! - The [`Tool`] trait: a function-calling definition plus a string-in/string-out executor
//! - [`SketchPadTool`], the `sketch_pad_operations` tool over the current session's SketchPad

pub mod error;
pub mod sketch_tool;
pub mod types;

pub use error::{Result, ToolError};
pub use sketch_tool::{SketchPadTool, TOOL_NAME};
pub use types::{FunctionDefinition, SketchOperation, SketchPadArgs, ToolDefinition};

/// Re-export async_trait for implementers
pub use async_trait::async_trait;

/// A tool the agent can call.
///
/// `execute` never fails: problems are reported to the model as text.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Definition advertised to the LLM
    fn definition(&self) -> ToolDefinition;

    /// Execute with the raw JSON arguments produced by the model
    async fn execute(&self, args_json: &str) -> String;
}
