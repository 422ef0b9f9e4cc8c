//! Docent Resolve: the multi-stage query pipeline.
//!
//! [`QueryPipeline::retrieve`] turns one user question into an ordered
//! evidence set over a single document's [`docent_index::HybridIndex`].
//! The stages live in their own modules so each can be exercised alone.

pub mod drift;
pub mod embedding;
pub mod expansion;
pub mod fusion;
pub mod packing;
pub mod pipeline;
pub mod rerank;
pub mod trace;
pub mod types;

pub use expansion::ParseOutcome;
pub use fusion::rrf_fuse;
pub use packing::pack;
pub use pipeline::QueryPipeline;
pub use rerank::Verdict;
pub use trace::{ChunkPreview, RetrievalTrace, TraceStep};
pub use types::*;
