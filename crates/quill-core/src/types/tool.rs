use serde::{Deserialize, Serialize};

/// Kind of tool call; only function calls exist today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallKind {
    #[default]
    Function,
}

/// Function name plus its JSON-encoded arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// A tool call requested by the assistant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: ToolCallKind,
    pub function: FunctionCall,
}

impl ToolCall {
    /// Create a new function tool call
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: ToolCallKind::Function,
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    /// Parse arguments to a specific type
    pub fn parse_arguments<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.function.arguments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let call = ToolCall::new("call_1", "sketch_pad_operations", r#"{"operation":"list"}"#);
        let value = serde_json::to_value(&call).unwrap();
        assert_eq!(value["type"], "function");
        assert_eq!(value["function"]["name"], "sketch_pad_operations");

        let args: serde_json::Value = call.parse_arguments().unwrap();
        assert_eq!(args["operation"], "list");
    }
}
