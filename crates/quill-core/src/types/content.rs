use serde::{Deserialize, Serialize};

/// Message content: either a plain string or an ordered list of blocks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Content {
    /// Plain text content
    Text(String),
    /// Multimodal content blocks
    Parts(Vec<ContentPart>),
}

/// Individual content block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text block
    Text { text: String },
    /// Image reference
    ImageUrl { image_url: ImageUrl },
}

/// Image reference carried by an `image_url` block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub detail: Option<String>,
}

impl Content {
    /// Create text content
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Create content from blocks
    pub fn parts(parts: Vec<ContentPart>) -> Self {
        Self::Parts(parts)
    }

    /// Check if content is empty
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Parts(parts) => parts.is_empty(),
        }
    }

    /// All text blocks joined; image blocks are rendered as their URL marker.
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => text.clone(),
                    ContentPart::ImageUrl { image_url } => format!("[image: {}]", image_url.url),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl ContentPart {
    /// Create a text block
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create an image block from URL
    pub fn image_url(url: impl Into<String>, detail: Option<String>) -> Self {
        Self::ImageUrl {
            image_url: ImageUrl {
                url: url.into(),
                detail,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_string_content() {
        let content: Content = serde_json::from_str(r#""hello""#).unwrap();
        assert_eq!(content, Content::text("hello"));
        assert_eq!(serde_json::to_string(&content).unwrap(), r#""hello""#);
    }

    #[test]
    fn test_block_content() {
        let json = r#"[
            {"type": "text", "text": "look at this"},
            {"type": "image_url", "image_url": {"url": "https://x/y.png", "detail": "low"}}
        ]"#;
        let content: Content = serde_json::from_str(json).unwrap();
        match &content {
            Content::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                assert_eq!(parts[0], ContentPart::text("look at this"));
            }
            _ => panic!("expected parts"),
        }
        assert_eq!(content.to_text(), "look at this\n[image: https://x/y.png]");
    }
}
