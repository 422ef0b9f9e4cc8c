//! Language-model collaborator contract.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use docent_core::Result;

/// Which model tier a completion should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionMode {
    /// Short single-purpose prompts: translation, HyDE, yes/no judging.
    Simple,
    /// Multi-query expansion and other prompts that need more reasoning.
    Complex,
}

impl std::fmt::Display for CompletionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simple => write!(f, "simple"),
            Self::Complex => write!(f, "complex"),
        }
    }
}

/// Text completion. Output is untrusted and must be parsed defensively.
pub trait LanguageModel: Send + Sync {
    fn complete(&self, prompt: String, mode: CompletionMode) -> BoxFuture<'_, Result<String>>;
}
