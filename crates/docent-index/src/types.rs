//! Index types.

use serde::{Deserialize, Serialize};

use crate::language::Language;

/// One scored chunk returned by a hybrid search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub chunk_id: String,
    /// Position of the chunk in document order.
    pub chunk_index: usize,
    /// Cosine rescaled to [0, 1]; 0 when the dense side did not return the chunk.
    pub dense_score: f64,
    pub lexical_score_raw: f64,
    /// Min-max normalized over this search's lexical hits; 0 when absent.
    pub lexical_score_norm: f64,
    pub fused_score: f64,
    /// Index of the query variant that produced this candidate, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_variant: Option<usize>,
}

/// Build-time options for [`crate::HybridIndex`].
#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub dense_weight: f64,
    pub lexical_weight: f64,
    /// Force a language instead of detecting it from the leading chunks.
    pub language: Option<Language>,
    pub language_sample_chunks: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            dense_weight: 0.8,
            lexical_weight: 0.2,
            language: None,
            language_sample_chunks: 8,
        }
    }
}
