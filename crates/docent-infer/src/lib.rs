//! Docent Infer: model collaborators.
//!
//! The retrieval pipeline talks to two remote capabilities through object-safe
//! traits: [`Embedder`] for dense vectors and [`LanguageModel`] for text
//! completion. [`OpenAiCompatClient`] implements both over HTTP; every call
//! goes through [`with_retry`]. [`CachedEmbedder`] wraps any embedder with an
//! LRU query cache. [`KeywordEmbedder`] and [`ScriptedModel`] are
//! deterministic stand-ins for offline runs and tests.

pub mod cache;
pub mod embedder;
pub mod llm;
pub mod offline;
pub mod openai_compat;
pub mod retry;

pub use cache::{CachedEmbedder, QueryEmbeddingCache};
pub use embedder::{check_batch, render_instruction, Embedder};
pub use llm::{CompletionMode, LanguageModel};
pub use offline::{KeywordEmbedder, ScriptedModel};
pub use openai_compat::OpenAiCompatClient;
pub use retry::with_retry;
