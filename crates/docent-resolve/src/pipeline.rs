//! Query pipeline: from a user question to an ordered evidence set.
//!
//! Accuracy mode runs alignment, expansion and HyDE, embeds every variant,
//! drops drifted variants, searches each survivor, fuses with RRF and lets
//! the language model promote relevant passages before packing. Fast mode
//! embeds the question once and runs a single truncated-dimension search.
//!
//! Stages backed by the language model are fail-soft: a failure is logged,
//! recorded in the trace and replaced by the stage's fallback. Embedding the
//! question and searching the index are fail-hard.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use docent_core::{Aggregation, Error, PackingStrategy, Result, RetrievalConfig};
use docent_index::{detect_language, Candidate, HybridIndex, Language, QUERY_MIN_CJK};
use docent_infer::{check_batch, CompletionMode, Embedder, LanguageModel};

use crate::drift::judge_drift;
use crate::embedding::aggregate;
use crate::expansion::{
    cap_words, clean_translation, dedupe_keep_order, expansion_prompt, hyde_prompt,
    parse_variants, translation_prompt, ParseOutcome,
};
use crate::fusion::rrf_fuse;
use crate::packing::pack;
use crate::rerank::{judge_all, stable_partition, Verdict};
use crate::trace::{ChunkPreview, RetrievalTrace, TraceStep};
use crate::types::{
    FusedCandidate, QueryVariant, RankedChunk, Retrieval, RetrievalMode, VariantKind,
};

/// Runs retrieval turns against a [`HybridIndex`].
pub struct QueryPipeline {
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn LanguageModel>,
    config: RetrievalConfig,
}

impl QueryPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LanguageModel>,
        config: RetrievalConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            embedder,
            llm,
            config,
        })
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Retrieve at most `top_k` distinct chunks for `query`.
    ///
    /// Returns exactly `min(top_k, index.len())` chunks. Ranks are relevance
    /// ranks; list order is the packed delivery order.
    pub async fn retrieve(
        &self,
        index: &HybridIndex,
        query: &str,
        top_k: usize,
        mode: RetrievalMode,
    ) -> Result<Retrieval> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::InvalidQuery("query is empty".into()));
        }
        if top_k == 0 {
            return Err(Error::InvalidQuery("top_k must be >= 1".into()));
        }

        info!(
            "Retrieval: mode={:?} top_k={} chunks={} doc_language={}",
            mode,
            top_k,
            index.len(),
            index.language()
        );
        let mut trace = RetrievalTrace::new(query, mode);

        let ordered = match mode {
            RetrievalMode::Accuracy => self.run_accuracy(index, query, top_k, &mut trace).await?,
            RetrievalMode::Fast => self.run_fast(index, query, top_k, &mut trace).await?,
        };

        let selected: Vec<FusedCandidate> = ordered.into_iter().take(top_k).collect();
        let ranked: Vec<RankedChunk> = selected
            .iter()
            .enumerate()
            .map(|(i, c)| RankedChunk {
                chunk_id: c.chunk_id.clone(),
                rank: i + 1,
            })
            .collect();

        let packed = match mode {
            RetrievalMode::Accuracy => {
                let strategy = self.config.packing;
                trace.push(TraceStep::ran(
                    "packing",
                    json!({"strategy": strategy.to_string(), "count": ranked.len()}),
                ));
                pack(ranked, strategy)
            }
            RetrievalMode::Fast => {
                trace.push(TraceStep::skipped("packing", "fast mode"));
                pack(ranked, PackingStrategy::None)
            }
        };

        let scores: HashMap<&str, f64> = selected
            .iter()
            .map(|c| (c.chunk_id.as_str(), c.rrf_score))
            .collect();
        trace.context = packed
            .iter()
            .filter_map(|r| {
                let chunk = index.chunk(&r.chunk_id)?;
                let score = scores.get(r.chunk_id.as_str()).copied().unwrap_or(0.0);
                Some(ChunkPreview::new(chunk, r.rank, score))
            })
            .collect();

        info!("Retrieval done: {} chunks selected", packed.len());
        Ok(Retrieval {
            chunks: packed,
            trace,
        })
    }

    async fn run_fast(
        &self,
        index: &HybridIndex,
        query: &str,
        top_k: usize,
        trace: &mut RetrievalTrace,
    ) -> Result<Vec<FusedCandidate>> {
        for stage in ["alignment", "expansion", "hyde"] {
            trace.push(TraceStep::skipped(stage, "fast mode"));
        }

        let mut variants = vec![QueryVariant::new(VariantKind::Original, query)];
        trace.push(self.embed_variants(&mut variants, Aggregation::Uniform).await?);
        trace.push(TraceStep::skipped("drift", "fast mode"));

        let search_dim = self.config.fast_search_dim;
        let (lists, step) = self.search_variants(index, &variants, search_dim).await?;
        trace.push(step);
        let fused = self.fuse(index, &lists, &variants[0], top_k, search_dim, trace)?;

        trace.push(TraceStep::skipped("rerank", "fast mode"));
        Ok(fused)
    }

    async fn run_accuracy(
        &self,
        index: &HybridIndex,
        query: &str,
        top_k: usize,
        trace: &mut RetrievalTrace,
    ) -> Result<Vec<FusedCandidate>> {
        let doc_language = index.language();

        let (mut variants, step) = self.align(query, doc_language).await;
        trace.push(step);
        let primary = variants[0].text.clone();

        let ((expansions, expansion_step), (hyde, hyde_step)) = futures::join!(
            self.expand(&primary, doc_language),
            self.hyde(&primary, doc_language)
        );
        trace.push(expansion_step);
        trace.push(hyde_step);

        let known = variants.len();
        let merged = dedupe_keep_order(
            variants
                .iter()
                .map(|v| v.text.clone())
                .chain(expansions),
        );
        variants.extend(
            merged
                .into_iter()
                .skip(known)
                .map(|text| QueryVariant::new(VariantKind::Expansion, text)),
        );
        if let Some(text) = hyde {
            variants.push(QueryVariant::new(VariantKind::Hyde, text));
        }

        trace.push(self.embed_variants(&mut variants, self.config.aggregation).await?);
        trace.push(self.filter_drift(&mut variants));

        let (lists, step) = self.search_variants(index, &variants, 0).await?;
        trace.push(step);
        let fused = self.fuse(index, &lists, &variants[0], top_k, 0, trace)?;

        let (reranked, step) = self.rerank(index, &primary, fused).await;
        trace.push(step);
        Ok(reranked)
    }

    /// Primary variant first: the aligned query when translation applies,
    /// followed by the original.
    async fn align(&self, query: &str, doc_language: Language) -> (Vec<QueryVariant>, TraceStep) {
        let original = QueryVariant::new(VariantKind::Original, query);
        let query_language = detect_language(query, QUERY_MIN_CJK);
        if query_language == doc_language {
            return (
                vec![original],
                TraceStep::skipped("alignment", format!("query already in {}", doc_language)),
            );
        }

        let prompt = translation_prompt(query, doc_language);
        match self.llm.complete(prompt, CompletionMode::Simple).await {
            Ok(reply) => match clean_translation(&reply) {
                Some(aligned) if aligned != query => {
                    info!("Aligned query {} -> {}", query_language, doc_language);
                    let data = json!({
                        "from": query_language,
                        "to": doc_language,
                        "aligned": aligned,
                    });
                    (
                        vec![QueryVariant::new(VariantKind::Aligned, aligned), original],
                        TraceStep::ran("alignment", data),
                    )
                }
                Some(_) => (
                    vec![original],
                    TraceStep::fell_back("alignment", "translation equals query", Value::Null),
                ),
                None => {
                    warn!("Empty translation; using original query");
                    (
                        vec![original],
                        TraceStep::fell_back("alignment", "empty translation", Value::Null),
                    )
                }
            },
            Err(e) => {
                warn!("Query alignment failed: {}; using original query", e);
                (
                    vec![original],
                    TraceStep::fell_back("alignment", e.to_string(), Value::Null),
                )
            }
        }
    }

    async fn expand(&self, query: &str, doc_language: Language) -> (Vec<String>, TraceStep) {
        let n = self.config.effective_variants();
        if n == 0 {
            return (Vec::new(), TraceStep::skipped("expansion", "disabled"));
        }

        let prompt = expansion_prompt(query, doc_language, n);
        match self.llm.complete(prompt, CompletionMode::Complex).await {
            Ok(reply) => match parse_variants(&reply, n) {
                ParseOutcome::Parsed(variants) => {
                    debug!("Expansion produced {} variants", variants.len());
                    let data = json!({"requested": n, "variants": variants});
                    (variants, TraceStep::ran("expansion", data))
                }
                ParseOutcome::ParseFailed => {
                    warn!("Expansion reply unparseable; using original query only");
                    (
                        Vec::new(),
                        TraceStep::fell_back("expansion", "unparseable reply", json!({"requested": n})),
                    )
                }
            },
            Err(e) => {
                warn!("Query expansion failed: {}; using original query only", e);
                (
                    Vec::new(),
                    TraceStep::fell_back("expansion", e.to_string(), json!({"requested": n})),
                )
            }
        }
    }

    async fn hyde(&self, query: &str, doc_language: Language) -> (Option<String>, TraceStep) {
        if !self.config.hyde_enabled {
            return (None, TraceStep::skipped("hyde", "disabled"));
        }

        let max_words = self.config.hyde_max_words;
        let prompt = hyde_prompt(query, doc_language, max_words);
        match self.llm.complete(prompt, CompletionMode::Simple).await {
            Ok(reply) => {
                let passage = cap_words(&reply, max_words);
                if passage.is_empty() {
                    warn!("HyDE reply empty; continuing without it");
                    (None, TraceStep::fell_back("hyde", "empty passage", Value::Null))
                } else {
                    let words = passage.split_whitespace().count();
                    (Some(passage), TraceStep::ran("hyde", json!({"words": words})))
                }
            }
            Err(e) => {
                warn!("HyDE generation failed: {}; continuing without it", e);
                (None, TraceStep::fell_back("hyde", e.to_string(), Value::Null))
            }
        }
    }

    /// Fill in `vector` for every variant.
    ///
    /// Text variants are embedded with the instruction hint and, optionally,
    /// raw; the two are aggregated. HyDE is embedded raw in its own call and
    /// is dropped if that call fails.
    async fn embed_variants(
        &self,
        variants: &mut Vec<QueryVariant>,
        aggregation: Aggregation,
    ) -> Result<TraceStep> {
        let texts: Vec<String> = variants
            .iter()
            .filter(|v| v.kind != VariantKind::Hyde)
            .map(|v| v.text.clone())
            .collect();
        let hyde_text = variants
            .iter()
            .find(|v| v.kind == VariantKind::Hyde)
            .map(|v| v.text.clone());
        let hint = self
            .config
            .query_instruction
            .clone()
            .filter(|h| !h.trim().is_empty());
        let use_raw = self.config.embed_raw_query || hint.is_none();

        let hinted = async {
            match &hint {
                Some(h) => self.embedder.embed(texts.clone(), Some(h.clone())).await.map(Some),
                None => Ok(None),
            }
        };
        let raw = async {
            if use_raw {
                self.embedder.embed(texts.clone(), None).await.map(Some)
            } else {
                Ok(None)
            }
        };
        let hyde = async {
            match &hyde_text {
                Some(t) => Some(self.embedder.embed(vec![t.clone()], None).await),
                None => None,
            }
        };
        let (hinted, raw, hyde) = futures::join!(hinted, raw, hyde);

        let hinted = hinted?;
        let raw = raw?;
        for batch in [&hinted, &raw].into_iter().flatten() {
            check_batch(texts.len(), batch)?;
        }

        let mut slot = 0;
        for variant in variants.iter_mut().filter(|v| v.kind != VariantKind::Hyde) {
            let inputs: Vec<Vec<f32>> = [&hinted, &raw]
                .into_iter()
                .flatten()
                .map(|batch| batch[slot].clone())
                .collect();
            variant.vector = aggregate(&inputs, aggregation).ok_or_else(|| {
                Error::Collaborator(format!("could not aggregate embeddings for '{}'", variant.text))
            })?;
            slot += 1;
        }

        let hyde_vector = match hyde {
            Some(Ok(mut vectors)) if vectors.len() == 1 && !vectors[0].is_empty() => vectors.pop(),
            Some(Ok(vectors)) => {
                warn!("HyDE embedding returned {} vectors; dropping HyDE probe", vectors.len());
                None
            }
            Some(Err(e)) => {
                warn!("HyDE embedding failed: {}; dropping HyDE probe", e);
                None
            }
            None => None,
        };
        match hyde_vector {
            Some(vector) => {
                if let Some(v) = variants.iter_mut().find(|v| v.kind == VariantKind::Hyde) {
                    v.vector = vector;
                }
            }
            None => variants.retain(|v| v.kind != VariantKind::Hyde),
        }

        Ok(TraceStep::ran(
            "embedding",
            json!({
                "variants": variants.len(),
                "instruction": hint.is_some(),
                "raw": use_raw,
                "aggregation": aggregation,
            }),
        ))
    }

    fn filter_drift(&self, variants: &mut Vec<QueryVariant>) -> TraceStep {
        if !self.config.drift_filter_enabled {
            return TraceStep::skipped("drift", "disabled");
        }
        if variants.len() < 2 {
            return TraceStep::skipped("drift", "single variant");
        }

        let reference = variants[0].vector.clone();
        let decisions = judge_drift(
            variants,
            &reference,
            self.config.drift_threshold,
            self.config.hyde_drift_threshold,
        );
        let dropped = decisions.iter().filter(|d| !d.kept).count();
        if dropped > 0 {
            info!("Drift filter dropped {} of {} variants", dropped, variants.len());
        }

        let mut keep = decisions.iter().map(|d| d.kept);
        variants.retain(|_| keep.next().unwrap_or(true));
        TraceStep::ran("drift", json!({"dropped": dropped, "decisions": decisions}))
    }

    /// One hybrid search per variant. Yields to the runtime between variants
    /// so other sessions make progress during long fan-outs.
    async fn search_variants(
        &self,
        index: &HybridIndex,
        variants: &[QueryVariant],
        search_dim: usize,
    ) -> Result<(Vec<Vec<Candidate>>, TraceStep)> {
        let mut lists = Vec::with_capacity(variants.len());
        let mut sizes = Vec::with_capacity(variants.len());
        for (i, variant) in variants.iter().enumerate() {
            let mut candidates = index.search(
                &variant.vector,
                variant.lexical_text(),
                self.config.per_query_top_n,
                search_dim,
            )?;
            for c in &mut candidates {
                c.source_variant = Some(i);
            }
            let lexical_hits: Vec<&str> = candidates
                .iter()
                .filter(|c| c.lexical_score_raw > 0.0)
                .map(|c| c.chunk_id.as_str())
                .collect();
            sizes.push(json!({
                "kind": variant.kind,
                "candidates": candidates.len(),
                "lexical_hits": lexical_hits,
            }));
            lists.push(candidates);
            tokio::task::yield_now().await;
        }

        let step = TraceStep::ran(
            "search",
            json!({
                "search_dim": search_dim,
                "per_query_top_n": self.config.per_query_top_n,
                "lists": sizes,
            }),
        );
        Ok((lists, step))
    }

    /// RRF over the variant lists, topped up by a direct search with the
    /// primary variant when fusion yields fewer than `top_k` chunks.
    fn fuse(
        &self,
        index: &HybridIndex,
        lists: &[Vec<Candidate>],
        primary: &QueryVariant,
        top_k: usize,
        search_dim: usize,
        trace: &mut RetrievalTrace,
    ) -> Result<Vec<FusedCandidate>> {
        let mut fused = rrf_fuse(lists, self.config.rrf_k, self.config.fusion_max_candidates);
        trace.push(TraceStep::ran(
            "fusion",
            json!({
                "lists": lists.len(),
                "candidates": fused.len(),
                "rrf_k": self.config.rrf_k,
            }),
        ));

        let wanted = top_k.min(index.len());
        if fused.len() >= wanted {
            return Ok(fused);
        }

        let reason = if fused.is_empty() {
            "fusion produced no candidates"
        } else {
            "fewer fused candidates than requested"
        };
        let direct = index.search(&primary.vector, primary.lexical_text(), wanted, search_dim)?;
        let mut seen: HashSet<String> = fused.iter().map(|c| c.chunk_id.clone()).collect();
        let before = fused.len();
        for (pos, c) in direct.into_iter().enumerate() {
            if seen.insert(c.chunk_id.clone()) {
                fused.push(FusedCandidate {
                    chunk_id: c.chunk_id,
                    chunk_index: c.chunk_index,
                    rrf_score: 0.0,
                    best_rank: pos + 1,
                    hits: 0,
                });
            }
        }
        warn!("{}; added {} chunks from a direct search", reason, fused.len() - before);
        trace.push(TraceStep::fell_back(
            "top_up",
            reason,
            json!({"added": fused.len() - before}),
        ));
        Ok(fused)
    }

    async fn rerank(
        &self,
        index: &HybridIndex,
        query: &str,
        mut fused: Vec<FusedCandidate>,
    ) -> (Vec<FusedCandidate>, TraceStep) {
        if !self.config.rerank_enabled {
            return (fused, TraceStep::skipped("rerank", "disabled"));
        }
        let pool = self.config.rerank_pool.min(fused.len());
        if pool == 0 {
            return (fused, TraceStep::skipped("rerank", "empty pool"));
        }

        let rest = fused.split_off(pool);
        let passages: Vec<&str> = fused
            .iter()
            .map(|c| index.chunk(&c.chunk_id).map_or("", |chunk| chunk.text.as_str()))
            .collect();
        let verdicts = judge_all(
            self.llm.as_ref(),
            query,
            &passages,
            self.config.rerank_max_chars,
            self.config.rerank_concurrency,
        )
        .await;

        let count = |v: Verdict| verdicts.iter().filter(|&&x| x == v).count();
        let data = json!({
            "pool": pool,
            "yes": count(Verdict::Yes),
            "no": count(Verdict::No),
            "defaulted": count(Verdict::DefaultedYes),
        });
        debug!("Rerank verdicts: {}", data);

        let mut ordered = stable_partition(fused, &verdicts);
        ordered.extend(rest);
        (ordered, TraceStep::ran("rerank", data))
    }
}
