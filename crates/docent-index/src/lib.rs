//! Docent Index: per-document hybrid search.
//!
//! A [`HybridIndex`] is built once per uploaded document from its chunks and
//! their embeddings. It answers one query variant at a time with a fused
//! dense + BM25 candidate list; multi-query fusion happens in `docent-resolve`.

pub mod dense;
pub mod hybrid;
pub mod language;
pub mod lexical;
pub mod types;

pub use dense::{cosine, DenseIndex};
pub use hybrid::HybridIndex;
pub use language::{detect_language, tokenize, Language, DOCUMENT_MIN_CJK, QUERY_MIN_CJK};
pub use lexical::{Bm25Index, Bm25Params};
pub use types::{Candidate, IndexOptions};
