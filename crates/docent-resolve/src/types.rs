//! Pipeline types.

use serde::{Deserialize, Serialize};

use crate::trace::RetrievalTrace;

/// Per-request operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    /// Full stage sequence.
    #[default]
    Accuracy,
    /// Single variant, truncated dense search, no LLM stages.
    Fast,
}

/// Where a query variant came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantKind {
    /// The user's text as typed.
    Original,
    /// The user's text translated into the document language.
    Aligned,
    /// A model-generated rephrasing.
    Expansion,
    /// A hypothetical answer passage, used for dense search only.
    Hyde,
}

impl VariantKind {
    /// Protected variants are never removed by drift filtering.
    pub fn is_protected(&self) -> bool {
        matches!(self, Self::Original | Self::Aligned)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Aligned => "aligned",
            Self::Expansion => "expansion",
            Self::Hyde => "hyde",
        }
    }
}

/// One search probe for the current turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryVariant {
    pub kind: VariantKind,
    pub text: String,
    #[serde(skip)]
    pub vector: Vec<f32>,
}

impl QueryVariant {
    pub fn new(kind: VariantKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            vector: Vec::new(),
        }
    }

    /// Text used for the lexical side of the search. HyDE is dense-only.
    pub fn lexical_text(&self) -> &str {
        match self.kind {
            VariantKind::Hyde => "",
            _ => &self.text,
        }
    }
}

/// A chunk after cross-variant rank fusion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedCandidate {
    pub chunk_id: String,
    pub chunk_index: usize,
    pub rrf_score: f64,
    /// Best (smallest, 1-based) rank across the fused lists.
    pub best_rank: usize,
    /// Number of lists the chunk appeared in.
    pub hits: usize,
}

/// One entry of the evidence set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedChunk {
    pub chunk_id: String,
    /// 1-based relevance rank. Delivery order is the list order.
    pub rank: usize,
}

/// Result of one retrieval turn.
#[derive(Debug, Clone, Serialize)]
pub struct Retrieval {
    pub chunks: Vec<RankedChunk>,
    pub trace: RetrievalTrace,
}

impl Retrieval {
    pub fn chunk_ids(&self) -> Vec<&str> {
        self.chunks.iter().map(|c| c.chunk_id.as_str()).collect()
    }
}
