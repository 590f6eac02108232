//! Tool definitions and argument types

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ToolError;

/// Function-calling definition handed to the LLM
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn function(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            kind: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// SketchPad tool operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SketchOperation {
    Store,
    Retrieve,
    Delete,
    List,
    SearchTags,
    Search,
    Clear,
    Stats,
}

impl SketchOperation {
    pub const ALL: [SketchOperation; 8] = [
        SketchOperation::Store,
        SketchOperation::Retrieve,
        SketchOperation::Delete,
        SketchOperation::List,
        SketchOperation::SearchTags,
        SketchOperation::Search,
        SketchOperation::Clear,
        SketchOperation::Stats,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SketchOperation::Store => "store",
            SketchOperation::Retrieve => "retrieve",
            SketchOperation::Delete => "delete",
            SketchOperation::List => "list",
            SketchOperation::SearchTags => "search_tags",
            SketchOperation::Search => "search",
            SketchOperation::Clear => "clear",
            SketchOperation::Stats => "stats",
        }
    }
}

impl std::fmt::Display for SketchOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SketchOperation {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        SketchOperation::ALL
            .into_iter()
            .find(|op| op.as_str() == wanted)
            .ok_or_else(|| ToolError::UnknownOperation(s.to_string()))
    }
}

/// Raw arguments of a `sketch_pad_operations` call
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SketchPadArgs {
    pub operation: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    /// Comma separated
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub search_query: Option<String>,
    /// Seconds
    #[serde(default)]
    pub ttl: Option<u64>,
}

impl SketchPadArgs {
    /// Key argument, treating blank strings as absent
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }

    pub fn search_query(&self) -> Option<&str> {
        self.search_query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
    }

    /// Value argument; null and empty strings count as missing
    pub fn value(&self) -> Option<&Value> {
        match &self.value {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(value) => Some(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_parsing() {
        assert_eq!("store".parse::<SketchOperation>().unwrap(), SketchOperation::Store);
        assert_eq!(" Search_Tags ".parse::<SketchOperation>().unwrap(), SketchOperation::SearchTags);
        assert!(matches!(
            "explode".parse::<SketchOperation>(),
            Err(ToolError::UnknownOperation(op)) if op == "explode"
        ));
    }

    #[test]
    fn test_args_normalization() {
        let args: SketchPadArgs = serde_json::from_value(json!({
            "operation": "store",
            "key": "  ",
            "value": "",
            "search_query": " q "
        }))
        .unwrap();
        assert!(args.key().is_none());
        assert!(args.value().is_none());
        assert_eq!(args.search_query(), Some("q"));

        let args: SketchPadArgs =
            serde_json::from_value(json!({"operation": "store", "value": {"a": 1}})).unwrap();
        assert_eq!(args.value(), Some(&json!({"a": 1})));
    }

    #[test]
    fn test_definition_shape() {
        let def = ToolDefinition::function("f", "does f", json!({"type": "object"}));
        let value = serde_json::to_value(&def).unwrap();
        assert_eq!(value["type"], "function");
        assert_eq!(value["function"]["name"], "f");
    }
}
