//! The retrievable unit of document text.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// An immutable slice of the uploaded document.
///
/// Produced once by ingestion. `id` is unique within a document version and
/// is never reused by a later upload into the same session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    /// Plain text used for embedding and lexical indexing.
    pub text: String,
    /// Text with light formatting preserved, for display.
    pub rich_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_text: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Chunk {
    /// Create a chunk with no neighbours or metadata.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id: id.into(),
            rich_text: text.clone(),
            text,
            prev_text: None,
            next_text: None,
            metadata: HashMap::new(),
        }
    }

    /// Short single-line preview of the chunk text, at most `max_chars` characters.
    pub fn preview(&self, max_chars: usize) -> String {
        let flat = self.text.split_whitespace().collect::<Vec<_>>().join(" ");
        if flat.chars().count() <= max_chars {
            return flat;
        }
        let mut out: String = flat.chars().take(max_chars.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let chunk = Chunk::new("c1", "数据库 索引  是一种\n数据结构");
        let preview = chunk.preview(5);
        assert_eq!(preview.chars().count(), 5);
        assert!(preview.ends_with('…'));
    }

    #[test]
    fn test_preview_short_text_untouched() {
        let chunk = Chunk::new("c1", "short\ttext");
        assert_eq!(chunk.preview(200), "short text");
    }

    #[test]
    fn test_deserialize_minimal() {
        let chunk: Chunk = serde_json::from_value(serde_json::json!({
            "id": "abc",
            "text": "hello",
            "rich_text": "<b>hello</b>",
        }))
        .unwrap();
        assert_eq!(chunk.id, "abc");
        assert!(chunk.prev_text.is_none());
        assert!(chunk.metadata.is_empty());
    }
}
