//! `sketch_pad_operations`: the SketchPad exposed as an LLM tool.
//!
//! The tool always works on the SketchPad of the session scope it is called
//! from. Every outcome, including failures, comes back as readable text for
//! the model.

use async_trait::async_trait;
use quill_observability::create_tool_span;
use quill_session::item::{char_prefix, stringify};
use quill_session::{current_session, parse_tags, KeyValueStore, SetRequest, SketchItem, SketchPad};
use serde_json::json;
use tracing::{debug, warn, Instrument};

use crate::error::{Result, ToolError};
use crate::types::{SketchOperation, SketchPadArgs, ToolDefinition};
use crate::Tool;

pub const TOOL_NAME: &str = "sketch_pad_operations";

/// SketchPad tool
#[derive(Debug, Clone)]
pub struct SketchPadTool {
    /// Maximum results shown by searches
    result_limit: usize,
    /// Characters of summary shown per listed item
    preview_chars: usize,
}

impl Default for SketchPadTool {
    fn default() -> Self {
        Self {
            result_limit: 5,
            preview_chars: 50,
        }
    }
}

impl SketchPadTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how many search results are reported
    pub fn with_result_limit(mut self, limit: usize) -> Self {
        self.result_limit = limit.max(1);
        self
    }

    /// Set the summary preview length
    pub fn with_preview_chars(mut self, chars: usize) -> Self {
        self.preview_chars = chars;
        self
    }

    /// JSON schema for function calling
    pub fn tool_definition() -> ToolDefinition {
        let operations: Vec<&str> = SketchOperation::ALL.iter().map(|op| op.as_str()).collect();
        ToolDefinition::function(
            TOOL_NAME,
            "Store, retrieve, search and manage data in SketchPad. Supports key-value storage with automatic summarization.",
            json!({
                "type": "object",
                "properties": {
                    "operation": {
                        "type": "string",
                        "enum": operations,
                        "description": "Operation to perform"
                    },
                    "key": {
                        "type": "string",
                        "description": "Key for store/retrieve/delete operations; generated when omitted on store"
                    },
                    "value": {
                        "type": "string",
                        "description": "Value to store (required for store)"
                    },
                    "tags": {
                        "type": "string",
                        "description": "Comma-separated tags for store"
                    },
                    "search_query": {
                        "type": "string",
                        "description": "Query for search, or comma-separated tags for search_tags"
                    },
                    "ttl": {
                        "type": "integer",
                        "minimum": 0,
                        "description": "Time to live in seconds (store only)"
                    }
                },
                "required": ["operation"]
            }),
        )
    }

    /// Run against the current session's SketchPad
    pub async fn run(&self, args_json: &str) -> Result<String> {
        let args: SketchPadArgs = serde_json::from_str(args_json)?;
        let operation: SketchOperation = args.operation.parse()?;
        let session = current_session()?;
        self.apply(session.sketch_pad(), operation, &args).await
    }

    /// Run against an explicit SketchPad, outside any session scope
    pub async fn execute_on(&self, pad: &SketchPad, args_json: &str) -> String {
        let result = async {
            let args: SketchPadArgs = serde_json::from_str(args_json)?;
            let operation: SketchOperation = args.operation.parse()?;
            self.apply(pad, operation, &args).await
        }
        .await;
        render(result)
    }

    async fn apply(
        &self,
        pad: &SketchPad,
        operation: SketchOperation,
        args: &SketchPadArgs,
    ) -> Result<String> {
        debug!("sketch pad tool: {} on {}", operation, pad.id());
        match operation {
            SketchOperation::Store => self.store(pad, args).await,
            SketchOperation::Retrieve => {
                let key = args.key().ok_or(ToolError::MissingArgument("key", "retrieve"))?;
                Ok(match pad.get_value(key).await {
                    Some(value) => stringify(&value),
                    None => format!("Key '{}' not found", key),
                })
            }
            SketchOperation::Delete => {
                let key = args.key().ok_or(ToolError::MissingArgument("key", "delete"))?;
                Ok(if pad.delete(key).await {
                    format!("Key '{}' deleted successfully", key)
                } else {
                    format!("Key '{}' not found", key)
                })
            }
            SketchOperation::List => {
                let items = pad.list_items(false).await;
                if items.is_empty() {
                    return Ok("SketchPad is empty".to_string());
                }
                let mut out = String::from("SketchPad Contents:\n");
                for item in &items {
                    out.push_str(&format!(
                        "- {}: {}\n",
                        item.key,
                        self.preview(item.summary.as_deref())
                    ));
                }
                Ok(out)
            }
            SketchOperation::SearchTags => {
                let query = args
                    .search_query()
                    .ok_or(ToolError::MissingArgument("search_query", "search_tags"))?;
                let results = pad.search_by_tags(&parse_tags(query), false).await;
                if results.is_empty() {
                    return Ok(format!("No items found with tags: {}", query));
                }
                Ok(self.render_hits(
                    format!("Found {} items with tags '{}':\n", results.len(), query),
                    &results,
                ))
            }
            SketchOperation::Search => {
                let query = args
                    .search_query()
                    .ok_or(ToolError::MissingArgument("search_query", "search"))?;
                let results = pad.search_by_content(query, self.result_limit).await;
                if results.is_empty() {
                    return Ok(format!("No items found for query: {}", query));
                }
                Ok(self.render_hits(
                    format!("Found {} items for '{}':\n", results.len(), query),
                    &results,
                ))
            }
            SketchOperation::Clear => {
                pad.clear().await;
                Ok("SketchPad cleared successfully".to_string())
            }
            SketchOperation::Stats => {
                let stats = pad.statistics().await;
                let mut out = String::from("SketchPad Statistics:\n");
                out.push_str(&format!("- Total items: {}\n", stats.total_items));
                out.push_str(&format!("- Max items: {}\n", stats.max_items));
                out.push_str(&format!("- Items with summary: {}\n", stats.items_with_summary));
                out.push_str(&format!("- Total accesses: {}\n", stats.total_accesses));
                out.push_str(&format!("- Memory usage: {:.1}%\n", stats.memory_usage_percent));
                if !stats.popular_tags.is_empty() {
                    let tags: Vec<&str> = stats.popular_tags.iter().map(|(t, _)| t.as_str()).collect();
                    out.push_str(&format!("- Popular tags: {}\n", tags.join(", ")));
                }
                if !stats.content_types.is_empty() {
                    let types: Vec<&str> = stats.content_types.keys().map(String::as_str).collect();
                    out.push_str(&format!("- Content types: {}\n", types.join(", ")));
                }
                if stats.degraded {
                    out.push_str("- Mode: memory-only (fast tier unavailable)\n");
                }
                Ok(out)
            }
        }
    }

    async fn store(&self, pad: &SketchPad, args: &SketchPadArgs) -> Result<String> {
        let value = args
            .value()
            .ok_or(ToolError::MissingArgument("value", "store"))?;

        let mut request = SetRequest::new(value.clone());
        if let Some(key) = args.key() {
            request = request.with_key(key);
        }
        if let Some(tags) = args.tags.as_deref() {
            request = request.with_tags(parse_tags(tags));
        }
        if let Some(ttl) = args.ttl {
            request = request.with_ttl_secs(ttl);
        }

        let key = pad.set(request).await?;
        Ok(format!("Stored successfully with key: {}", key))
    }

    fn render_hits(&self, mut header: String, hits: &[(String, SketchItem)]) -> String {
        for (key, item) in hits.iter().take(self.result_limit) {
            header.push_str(&format!("- {}: {}\n", key, self.preview(item.summary.as_deref())));
        }
        header
    }

    fn preview(&self, summary: Option<&str>) -> String {
        let summary = summary.unwrap_or("No summary");
        let cut = char_prefix(summary, self.preview_chars);
        if cut.len() < summary.len() {
            format!("{}...", cut)
        } else {
            cut.to_string()
        }
    }
}

#[async_trait]
impl Tool for SketchPadTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn definition(&self) -> ToolDefinition {
        Self::tool_definition()
    }

    async fn execute(&self, args_json: &str) -> String {
        let session_id = current_session().ok().map(|s| s.id().to_string());
        let span = create_tool_span(TOOL_NAME, session_id.as_deref());
        render(self.run(args_json).instrument(span).await)
    }
}

fn render(result: Result<String>) -> String {
    match result {
        Ok(output) => output,
        Err(err @ ToolError::Store(_)) => {
            warn!("{}", err);
            err.to_string()
        }
        Err(err) => {
            debug!("sketch pad tool rejected call: {}", err);
            format!("Error: {}", err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pad(dir: &TempDir) -> SketchPad {
        SketchPad::in_memory("tool", dir.path().join("skt_tool.json"))
    }

    #[tokio::test]
    async fn test_store_and_retrieve() {
        let dir = TempDir::new().unwrap();
        let pad = pad(&dir);
        let tool = SketchPadTool::new();

        let out = tool
            .execute_on(&pad, r#"{"operation":"store","key":"plan","value":"step 1","tags":"todo, a"}"#)
            .await;
        assert_eq!(out, "Stored successfully with key: plan");

        let out = tool.execute_on(&pad, r#"{"operation":"retrieve","key":"plan"}"#).await;
        assert_eq!(out, "step 1");

        let out = tool.execute_on(&pad, r#"{"operation":"retrieve","key":"nope"}"#).await;
        assert_eq!(out, "Key 'nope' not found");
    }

    #[tokio::test]
    async fn test_store_generates_key() {
        let dir = TempDir::new().unwrap();
        let pad = pad(&dir);
        let out = SketchPadTool::new()
            .execute_on(&pad, r#"{"operation":"store","value":"Build output"}"#)
            .await;
        assert!(out.starts_with("Stored successfully with key: auto_build_output_"), "{}", out);
    }

    #[tokio::test]
    async fn test_argument_errors_are_readable() {
        let dir = TempDir::new().unwrap();
        let pad = pad(&dir);
        let tool = SketchPadTool::new();

        assert_eq!(
            tool.execute_on(&pad, r#"{"operation":"store"}"#).await,
            "Error: value is required for store operation"
        );
        assert_eq!(
            tool.execute_on(&pad, r#"{"operation":"delete"}"#).await,
            "Error: key is required for delete operation"
        );
        assert!(tool
            .execute_on(&pad, r#"{"operation":"fly"}"#)
            .await
            .starts_with("Error: Unknown operation 'fly'"));
        assert!(tool
            .execute_on(&pad, "not json")
            .await
            .starts_with("Error: Invalid arguments"));
        assert!(tool
            .execute_on(&pad, r#"{"operation":"store","key":"\u0007","value":"x"}"#)
            .await
            .starts_with("SketchPad operation failed"));
    }

    #[tokio::test]
    async fn test_list_search_stats_clear() {
        let dir = TempDir::new().unwrap();
        let pad = pad(&dir);
        let tool = SketchPadTool::new().with_preview_chars(10);

        assert_eq!(tool.execute_on(&pad, r#"{"operation":"list"}"#).await, "SketchPad is empty");

        pad.set(
            SetRequest::new("rust borrow checker notes")
                .with_key("notes")
                .with_summary("Notes about the borrow checker")
                .with_tag("rust"),
        )
        .await
        .unwrap();

        let listed = tool.execute_on(&pad, r#"{"operation":"list"}"#).await;
        assert_eq!(listed, "SketchPad Contents:\n- notes: Notes abou...\n");

        let found = tool
            .execute_on(&pad, r#"{"operation":"search","search_query":"BORROW"}"#)
            .await;
        assert!(found.starts_with("Found 1 items for 'BORROW':"));

        let tagged = tool
            .execute_on(&pad, r#"{"operation":"search_tags","search_query":"rust, go"}"#)
            .await;
        assert!(tagged.starts_with("Found 1 items with tags 'rust, go':"));

        let stats = tool.execute_on(&pad, r#"{"operation":"stats"}"#).await;
        assert!(stats.contains("- Total items: 1"));
        assert!(stats.contains("- Popular tags: rust"));

        assert_eq!(
            tool.execute_on(&pad, r#"{"operation":"clear"}"#).await,
            "SketchPad cleared successfully"
        );
        assert_eq!(
            tool.execute_on(&pad, r#"{"operation":"delete","key":"notes"}"#).await,
            "Key 'notes' not found"
        );
    }

    #[tokio::test]
    async fn test_execute_outside_session() {
        let out = SketchPadTool::new().execute(r#"{"operation":"list"}"#).await;
        assert!(out.starts_with("Error: No active conversation context"));
    }

    #[test]
    fn test_tool_definition() {
        let def = SketchPadTool::tool_definition();
        assert_eq!(def.function.name, TOOL_NAME);
        let ops = &def.function.parameters["properties"]["operation"]["enum"];
        assert_eq!(ops.as_array().unwrap().len(), 8);
        assert_eq!(def.function.parameters["required"][0], "operation");
    }
}
