//! Error types for docent.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Index build error: {0}")]
    IndexBuild(String),

    #[error("Collaborator timeout: {operation} exceeded {timeout_ms}ms")]
    CollaboratorTimeout { operation: String, timeout_ms: u64 },

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// The session exists but has no usable document yet (or its ingestion failed).
    #[error("No active document (status: {status}). Upload a document and wait until it is ready.")]
    SessionNotReady { status: String },

    /// Unknown or expired session. Expiry is deliberately indistinguishable.
    #[error("Unknown session: {0}")]
    SessionNotFound(String),

    #[error("Unknown chunk: {0}")]
    UnknownChunk(String),

    /// The document was replaced while a turn was in flight.
    #[error("Document was replaced (expected generation {expected}, current {current})")]
    StaleDocument { expected: u64, current: u64 },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::CollaboratorTimeout { .. } | Self::Collaborator(_) | Self::Http(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
