//! Hybrid index: dense cosine plus BM25 with per-query min-max fusion.

use std::collections::{BTreeMap, HashMap, HashSet};

use docent_core::{Chunk, Error, Result};
use tracing::{debug, info};

use crate::dense::{rescale_cosine, DenseIndex};
use crate::language::{detect_language, tokenize, Language, DOCUMENT_MIN_CJK};
use crate::lexical::{Bm25Index, Bm25Params};
use crate::types::{Candidate, IndexOptions};

/// Immutable search structures for one document version.
pub struct HybridIndex {
    chunks: Vec<Chunk>,
    positions: HashMap<String, usize>,
    dense: DenseIndex,
    lexical: Bm25Index,
    language: Language,
    dense_weight: f64,
    lexical_weight: f64,
}

impl std::fmt::Debug for HybridIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridIndex")
            .field("chunks", &self.chunks.len())
            .field("dim", &self.dense.dim())
            .field("language", &self.language)
            .finish()
    }
}

impl HybridIndex {
    /// Build with default weights and detected language.
    pub fn build(chunks: Vec<Chunk>, embeddings: Vec<Vec<f32>>) -> Result<Self> {
        Self::build_with(chunks, embeddings, &IndexOptions::default())
    }

    /// Build both sub-indexes. Either both succeed or nothing is returned.
    pub fn build_with(
        chunks: Vec<Chunk>,
        embeddings: Vec<Vec<f32>>,
        options: &IndexOptions,
    ) -> Result<Self> {
        if chunks.is_empty() {
            return Err(Error::IndexBuild("chunk list is empty".into()));
        }
        if embeddings.len() != chunks.len() {
            return Err(Error::IndexBuild(format!(
                "{} embeddings supplied for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }
        if options.dense_weight < 0.0
            || options.lexical_weight < 0.0
            || ((options.dense_weight + options.lexical_weight) - 1.0).abs() > 1e-6
        {
            return Err(Error::IndexBuild(format!(
                "fusion weights must be non-negative and sum to 1.0 (got {} + {})",
                options.dense_weight, options.lexical_weight
            )));
        }

        let mut positions = HashMap::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            if positions.insert(chunk.id.clone(), i).is_some() {
                return Err(Error::IndexBuild(format!("duplicate chunk id: {}", chunk.id)));
            }
        }

        let language = options.language.unwrap_or_else(|| {
            let sample = chunks
                .iter()
                .take(options.language_sample_chunks.max(1))
                .map(|c| c.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            detect_language(&sample, DOCUMENT_MIN_CJK)
        });

        let dense = DenseIndex::build(&embeddings)?;
        let corpus: Vec<Vec<String>> = chunks.iter().map(|c| tokenize(&c.text, language)).collect();
        let lexical = Bm25Index::build(&corpus, Bm25Params::default())?;

        info!(
            "Built hybrid index: {} chunks, dim={}, language={}",
            chunks.len(),
            dense.dim(),
            language
        );

        Ok(Self {
            chunks,
            positions,
            dense,
            lexical,
            language,
            dense_weight: options.dense_weight,
            lexical_weight: options.lexical_weight,
        })
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn dim(&self) -> usize {
        self.dense.dim()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn chunk(&self, id: &str) -> Option<&Chunk> {
        self.positions.get(id).map(|&i| &self.chunks[i])
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    /// Hybrid search for one query variant.
    ///
    /// Dense and lexical sides each contribute their own top `top_n`; the union
    /// is scored with `dense_weight * dense + lexical_weight * lexical_norm`, a
    /// side contributing 0 for candidates it did not return. Lexical scores are
    /// min-max normalized over the lexical side's own hits only. An empty
    /// `query_text` makes the search dense-only.
    pub fn search(
        &self,
        query_vector: &[f32],
        query_text: &str,
        top_n: usize,
        search_dim: usize,
    ) -> Result<Vec<Candidate>> {
        if top_n < 1 {
            return Err(Error::InvalidQuery("top_n must be >= 1".into()));
        }
        let fetch = top_n.min(self.len());

        let similarities = self.dense.similarities(query_vector, search_dim)?;
        let dense_hits = DenseIndex::top_n(&similarities, fetch);

        let tokens = tokenize(query_text, self.language);
        let lexical_hits = self.lexical.top_n(&tokens, fetch);
        let lexical_norm = min_max(&lexical_hits);

        // BTreeMap keeps candidates in chunk order before the stable sort below.
        let mut merged: BTreeMap<usize, Candidate> = BTreeMap::new();
        for &(idx, cos) in &dense_hits {
            let cand = merged.entry(idx).or_insert_with(|| self.blank_candidate(idx));
            cand.dense_score = rescale_cosine(cos);
        }
        for (&(idx, raw), &norm) in lexical_hits.iter().zip(lexical_norm.iter()) {
            let cand = merged.entry(idx).or_insert_with(|| self.blank_candidate(idx));
            cand.lexical_score_raw = raw;
            cand.lexical_score_norm = norm;
        }

        let mut candidates: Vec<Candidate> = merged
            .into_values()
            .map(|mut c| {
                c.fused_score =
                    self.dense_weight * c.dense_score + self.lexical_weight * c.lexical_score_norm;
                c
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.fused_score
                .partial_cmp(&a.fused_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(top_n);

        debug!(
            "Hybrid search: dense_hits={} lexical_hits={} returned={} search_dim={}",
            dense_hits.len(),
            lexical_hits.len(),
            candidates.len(),
            search_dim
        );
        Ok(candidates)
    }

    /// Ids present in both this index and `ids`, preserving `ids` order.
    pub fn retain_known<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> Vec<&Chunk> {
        let mut seen = HashSet::new();
        ids.into_iter()
            .filter(|id| seen.insert(*id))
            .filter_map(|id| self.chunk(id))
            .collect()
    }

    fn blank_candidate(&self, idx: usize) -> Candidate {
        Candidate {
            chunk_id: self.chunks[idx].id.clone(),
            chunk_index: idx,
            dense_score: 0.0,
            lexical_score_raw: 0.0,
            lexical_score_norm: 0.0,
            fused_score: 0.0,
            source_variant: None,
        }
    }
}

/// Min-max normalize raw scores into [0, 1]; equal scores all map to 0.5.
fn min_max(hits: &[(usize, f64)]) -> Vec<f64> {
    let Some(max) = hits.iter().map(|h| h.1).reduce(f64::max) else {
        return Vec::new();
    };
    let min = hits.iter().map(|h| h.1).fold(f64::INFINITY, f64::min);
    let range = max - min;
    hits.iter()
        .map(|&(_, raw)| {
            if range.abs() < 1e-12 {
                0.5
            } else {
                ((raw - min) / range).clamp(0.0, 1.0)
            }
        })
        .collect()
}
