//! Error types for quill-tool

use quill_session::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ToolError>;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Unknown operation '{0}'. Supported: store, retrieve, delete, list, search_tags, search, clear, stats")]
    UnknownOperation(String),

    #[error("{0} is required for {1} operation")]
    MissingArgument(&'static str, &'static str),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("No active conversation context. SketchPad operations must be called within a conversation context.")]
    NoActiveSession,

    #[error("SketchPad operation failed: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ToolError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NoActiveSession => ToolError::NoActiveSession,
            other => ToolError::Store(other),
        }
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        ToolError::InvalidArguments(err.to_string())
    }
}
