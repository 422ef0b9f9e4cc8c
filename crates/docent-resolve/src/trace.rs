//! Per-turn retrieval trace.
//!
//! Records what each stage did (or why it was skipped) and the final context
//! previews, so a turn can be inspected after the fact.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use docent_core::Chunk;

use crate::types::RetrievalMode;

pub const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct TraceStep {
    pub name: String,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub data: Value,
}

impl TraceStep {
    pub fn ran(name: &str, data: Value) -> Self {
        Self {
            name: name.to_string(),
            skipped: false,
            reason: None,
            data,
        }
    }

    pub fn skipped(name: &str, reason: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            skipped: true,
            reason: Some(reason.into()),
            data: Value::Null,
        }
    }

    /// Ran, but fell back to its documented default.
    pub fn fell_back(name: &str, reason: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.to_string(),
            skipped: false,
            reason: Some(reason.into()),
            data,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkPreview {
    pub chunk_id: String,
    pub rank: usize,
    pub score: f64,
    pub preview: String,
}

impl ChunkPreview {
    pub fn new(chunk: &Chunk, rank: usize, score: f64) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            rank,
            score,
            preview: chunk.preview(PREVIEW_CHARS),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalTrace {
    pub trace_id: String,
    /// RFC 3339.
    pub created_at: String,
    pub mode: RetrievalMode,
    pub query: String,
    pub steps: Vec<TraceStep>,
    /// Final evidence in delivery order.
    pub context: Vec<ChunkPreview>,
}

impl RetrievalTrace {
    pub fn new(query: &str, mode: RetrievalMode) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            created_at: Utc::now().to_rfc3339(),
            mode,
            query: query.to_string(),
            steps: Vec::new(),
            context: Vec::new(),
        }
    }

    pub fn push(&mut self, step: TraceStep) {
        self.steps.push(step);
    }

    pub fn step(&self, name: &str) -> Option<&TraceStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trace_serializes_steps_in_order() {
        let mut trace = RetrievalTrace::new("what is rust", RetrievalMode::Fast);
        trace.push(TraceStep::skipped("expansion", "fast mode"));
        trace.push(TraceStep::ran("search", json!({"variants": 1})));

        let value = trace.to_json();
        assert_eq!(value["mode"], "fast");
        assert_eq!(value["steps"][0]["name"], "expansion");
        assert_eq!(value["steps"][0]["skipped"], true);
        assert_eq!(value["steps"][1]["data"]["variants"], 1);
        assert!(value["steps"][1].get("reason").is_none());
        assert!(chrono::DateTime::parse_from_rfc3339(&trace.created_at).is_ok());
    }

    #[test]
    fn test_preview_is_bounded() {
        let chunk = Chunk::new("c1", "word ".repeat(100));
        let preview = ChunkPreview::new(&chunk, 1, 0.5);
        assert!(preview.preview.chars().count() <= PREVIEW_CHARS);
    }
}
