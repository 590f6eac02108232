//! The summarization collaborator.
//!
//! Stores treat summarization as an opaque, fallible, possibly slow call.
//! Callers bound every invocation with a timeout and never let a failure
//! abort the operation that triggered it.

use async_trait::async_trait;
use thiserror::Error;

/// Error returned by a [`Summarizer`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SummarizeError {
    #[error("summarizer unavailable: {0}")]
    Unavailable(String),

    #[error("summarization failed: {0}")]
    Failed(String),
}

/// Produces a short abstract of a piece of text
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String, SummarizeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FirstWords(usize);

    #[async_trait]
    impl Summarizer for FirstWords {
        async fn summarize(&self, text: &str) -> Result<String, SummarizeError> {
            if text.is_empty() {
                return Err(SummarizeError::Failed("empty input".to_string()));
            }
            Ok(text.split_whitespace().take(self.0).collect::<Vec<_>>().join(" "))
        }
    }

    #[test]
    fn test_summarizer_as_trait_object() {
        let summarizer: Box<dyn Summarizer> = Box::new(FirstWords(2));
        let out = tokio_test::block_on(summarizer.summarize("one two three")).unwrap();
        assert_eq!(out, "one two");

        let err = tokio_test::block_on(summarizer.summarize("")).unwrap_err();
        assert!(matches!(err, SummarizeError::Failed(_)));
    }
}
