//! Per-session state. Only ever touched under the session's lock.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use docent_core::Chunk;
use docent_index::{HybridIndex, Language};

use crate::registry::ReferenceRegistry;

/// Ingestion lifecycle of the session's current document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    #[default]
    Idle,
    Processing,
    Ready,
    Error,
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for IngestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One chat message. Assistant turns keep the evidence they were answered from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
    #[serde(default)]
    pub citations: Vec<Chunk>,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            citations: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>, citations: Vec<Chunk>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            citations,
        }
    }
}

/// Read-only view of a session for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub status: IngestStatus,
    pub generation: u64,
    pub filename: Option<String>,
    pub doc_language: Option<Language>,
    pub ingest_error: Option<String>,
    pub chunk_count: usize,
    pub turn_count: usize,
    pub reference_count: usize,
}

pub(crate) struct SessionState {
    pub(crate) session_id: String,
    pub(crate) last_active: Duration,
    /// Bumped by every upload. Work started under an older value is stale.
    pub(crate) generation: u64,
    pub(crate) status: IngestStatus,
    pub(crate) filename: Option<String>,
    pub(crate) doc_language: Option<Language>,
    pub(crate) ingest_error: Option<String>,
    pub(crate) index: Option<Arc<HybridIndex>>,
    pub(crate) history: Vec<ChatTurn>,
    pub(crate) references: ReferenceRegistry,
    /// Set once the session has been dropped from the store.
    pub(crate) evicted: bool,
}

impl SessionState {
    pub(crate) fn new(session_id: &str, now: Duration) -> Self {
        Self {
            session_id: session_id.to_string(),
            last_active: now,
            generation: 0,
            status: IngestStatus::Idle,
            filename: None,
            doc_language: None,
            ingest_error: None,
            index: None,
            history: Vec::new(),
            references: ReferenceRegistry::new(),
            evicted: false,
        }
    }

    pub(crate) fn touch(&mut self, now: Duration) {
        self.last_active = now;
    }

    /// Inactive for at least `ttl`.
    pub(crate) fn is_expired(&self, now: Duration, ttl: Duration) -> bool {
        now.saturating_sub(self.last_active) >= ttl
    }

    /// Start a new document version: everything tied to the old one goes.
    pub(crate) fn begin_upload(&mut self, filename: Option<String>) -> u64 {
        self.generation += 1;
        self.status = IngestStatus::Processing;
        self.filename = filename;
        self.doc_language = None;
        self.ingest_error = None;
        self.index = None;
        self.history.clear();
        self.references.clear();
        self.generation
    }

    pub(crate) fn release(&mut self) {
        self.evicted = true;
        self.index = None;
        self.history = Vec::new();
        self.references = ReferenceRegistry::new();
    }

    /// The ready index, or the reason there is none.
    pub(crate) fn ready_index(&self) -> docent_core::Result<Arc<HybridIndex>> {
        match (&self.index, self.status) {
            (Some(index), IngestStatus::Ready) => Ok(index.clone()),
            _ => Err(docent_core::Error::SessionNotReady {
                status: self.status.to_string(),
            }),
        }
    }

    pub(crate) fn snapshot(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.session_id.clone(),
            status: self.status,
            generation: self.generation,
            filename: self.filename.clone(),
            doc_language: self.doc_language,
            ingest_error: self.ingest_error.clone(),
            chunk_count: self.index.as_ref().map(|i| i.len()).unwrap_or(0),
            turn_count: self.history.len(),
            reference_count: self.references.len(),
        }
    }
}
