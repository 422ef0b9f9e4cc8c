//! SessionManager: keyed session store with per-session exclusive access.
//!
//! Each session lives behind its own `tokio::sync::Mutex`; the `DashMap` only
//! maps ids to those handles, so independent sessions never contend. Every
//! mutation (upload, index commit, turn commit, eviction) holds the session
//! lock. Retrieval clones the immutable index out under the lock and searches
//! without it.
//!
//! Expiry is enforced twice: lookups expire a session lazily the moment its
//! TTL has elapsed, and a periodic sweep releases sessions nobody asks for.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use docent_core::{Chunk, Error, Result, SessionConfig};
use docent_index::{HybridIndex, IndexOptions};
use docent_resolve::{QueryPipeline, Retrieval, RetrievalMode};

use crate::clock::{Clock, SystemClock};
use crate::session::{ChatTurn, IngestStatus, SessionState, SessionStatus};

type SharedSession = Arc<Mutex<SessionState>>;

/// Message stored for the user when an index build fails.
const INGEST_FAILED: &str =
    "The document could not be indexed. Please upload it again or try a different file.";

/// Evidence for one chat turn, tied to the document version it came from.
#[derive(Debug, Clone)]
pub struct TurnRetrieval {
    pub generation: u64,
    pub retrieval: Retrieval,
    /// Retrieved chunks in delivery order.
    pub evidence: Vec<Chunk>,
}

pub struct SessionManager {
    sessions: DashMap<String, SharedSession>,
    pipeline: Arc<QueryPipeline>,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
}

impl SessionManager {
    pub fn new(pipeline: Arc<QueryPipeline>, config: SessionConfig) -> Self {
        Self::with_clock(pipeline, config, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(
        pipeline: Arc<QueryPipeline>,
        config: SessionConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            pipeline,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Number of sessions held, including expired ones not yet swept.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|r| r.key().clone()).collect()
    }

    /// Create an idle session under a fresh id.
    pub async fn create_session(&self) -> String {
        let session_id = uuid::Uuid::new_v4().to_string();
        drop(self.get_or_create(&session_id).await);
        info!("Created session {}", session_id);
        session_id
    }

    /// Start a new document version. Discards the previous index, chat
    /// history and references, and moves the session to `processing`.
    /// Returns the generation that `finalize_document` must present.
    pub async fn begin_upload(&self, session_id: &str, filename: Option<String>) -> u64 {
        let mut state = self.get_or_create(session_id).await;
        let generation = state.begin_upload(filename);
        info!(
            "Session {}: upload started (generation {}, file={:?})",
            session_id, generation, state.filename
        );
        generation
    }

    /// Build the hybrid index for `generation` and commit it.
    ///
    /// The build runs on the blocking pool without the session lock. The
    /// result is committed only while `generation` is the current upload and
    /// is still processing; otherwise it is dropped with `StaleDocument`. A failed build moves the
    /// session to `error` and returns the build error.
    pub async fn finalize_document(
        &self,
        session_id: &str,
        generation: u64,
        chunks: Vec<Chunk>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<IngestStatus> {
        self.lock_pending(session_id, generation).await.map(drop)?;

        let options = self.index_options();
        let built = tokio::task::spawn_blocking(move || {
            HybridIndex::build_with(chunks, embeddings, &options)
        })
        .await
        .unwrap_or_else(|e| Err(Error::IndexBuild(format!("index build task failed: {}", e))));

        let mut state = match self.lock_pending(session_id, generation).await {
            Ok(state) => state,
            Err(e) => {
                debug!(
                    "Session {}: dropping index for generation {}: {}",
                    session_id, generation, e
                );
                return Err(e);
            }
        };

        match built {
            Ok(index) => {
                state.doc_language = Some(index.language());
                state.index = Some(Arc::new(index));
                state.status = IngestStatus::Ready;
                state.ingest_error = None;
                state.touch(self.clock.now());
                info!(
                    "Session {}: document ready (generation {}, {} chunks)",
                    session_id,
                    generation,
                    state.index.as_ref().map(|i| i.len()).unwrap_or(0)
                );
                Ok(IngestStatus::Ready)
            }
            Err(e) => {
                warn!("Session {}: index build failed: {}", session_id, e);
                state.index = None;
                state.status = IngestStatus::Error;
                state.ingest_error = Some(INGEST_FAILED.to_string());
                Err(e)
            }
        }
    }

    /// Run `finalize_document` as a background task.
    pub fn spawn_finalize(
        self: &Arc<Self>,
        session_id: String,
        generation: u64,
        chunks: Vec<Chunk>,
        embeddings: Vec<Vec<f32>>,
    ) -> JoinHandle<Result<IngestStatus>> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager
                .finalize_document(&session_id, generation, chunks, embeddings)
                .await
        })
    }

    /// Record an ingestion failure that happened before indexing (parsing,
    /// chunking, embedding). Rejected unless `generation` is still processing.
    pub async fn fail_ingest(&self, session_id: &str, generation: u64, reason: &str) -> Result<()> {
        let mut state = self.lock_pending(session_id, generation).await?;
        warn!("Session {}: ingestion failed: {}", session_id, reason);
        state.index = None;
        state.status = IngestStatus::Error;
        state.ingest_error = Some(INGEST_FAILED.to_string());
        Ok(())
    }

    /// Retrieve evidence for one chat turn.
    ///
    /// An unknown or expired id yields a fresh idle session, so the call fails
    /// with `SessionNotReady` just as it does while a document is processing.
    pub async fn retrieve(
        &self,
        session_id: &str,
        query: &str,
        top_k: usize,
        mode: RetrievalMode,
    ) -> Result<TurnRetrieval> {
        let (index, generation) = {
            let mut state = self.lookup_or_create(session_id).await;
            let index = state.ready_index()?;
            state.touch(self.clock.now());
            (index, state.generation)
        };

        let retrieval = self.pipeline.retrieve(&index, query, top_k, mode).await?;
        let evidence = index
            .retain_known(retrieval.chunks.iter().map(|c| c.chunk_id.as_str()))
            .into_iter()
            .cloned()
            .collect();
        Ok(TurnRetrieval {
            generation,
            retrieval,
            evidence,
        })
    }

    /// Commit a finished turn: append it to the chat history and register the
    /// chunks the answer cited. Returns the reference number of each cited
    /// chunk. Nothing is written if any id is unknown to the current document.
    pub async fn record_turn(
        &self,
        session_id: &str,
        generation: u64,
        question: &str,
        answer: &str,
        cited_ids: &[String],
    ) -> Result<Vec<usize>> {
        let mut state = self.lock_current(session_id, generation).await?;
        let cited = resolve_chunks(&*state.ready_index()?, cited_ids)?;

        let numbers = state.references.register(&cited);
        state.history.push(ChatTurn::user(question));
        state.history.push(ChatTurn::assistant(answer, cited));
        state.touch(self.clock.now());
        debug!(
            "Session {}: turn recorded, {} references total",
            session_id,
            state.references.len()
        );
        Ok(numbers)
    }

    /// Register cited chunks without recording a turn.
    pub async fn register_references(
        &self,
        session_id: &str,
        generation: u64,
        cited_ids: &[String],
    ) -> Result<Vec<usize>> {
        let mut state = self.lock_current(session_id, generation).await?;
        let cited = resolve_chunks(&*state.ready_index()?, cited_ids)?;
        let numbers = state.references.register(&cited);
        state.touch(self.clock.now());
        Ok(numbers)
    }

    /// Registered references in number order; reference `n` is at index `n - 1`.
    pub async fn references(&self, session_id: &str) -> Result<Vec<Chunk>> {
        let state = self.lock_existing(session_id).await?;
        Ok(state.references.references().to_vec())
    }

    pub async fn history(&self, session_id: &str) -> Result<Vec<ChatTurn>> {
        let state = self.lock_existing(session_id).await?;
        Ok(state.history.clone())
    }

    pub async fn status(&self, session_id: &str) -> Result<SessionStatus> {
        let state = self.lock_existing(session_id).await?;
        Ok(state.snapshot())
    }

    /// The current document's index, if one is ready.
    pub async fn current_index(&self, session_id: &str) -> Result<Option<Arc<HybridIndex>>> {
        let state = self.lock_existing(session_id).await?;
        Ok(state.ready_index().ok())
    }

    /// Drop a session immediately. Returns whether it existed.
    pub async fn remove(&self, session_id: &str) -> bool {
        let Some(shared) = self.handle(session_id) else {
            return false;
        };
        let mut state = shared.clone().lock_owned().await;
        if state.evicted {
            return false;
        }
        self.evict(session_id, &shared, &mut state);
        info!("Session {} removed", session_id);
        true
    }

    /// Evict every session whose TTL has elapsed. Returns how many went.
    pub async fn sweep_expired(&self) -> usize {
        let snapshot: Vec<(String, SharedSession)> = self
            .sessions
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();

        let mut evicted = 0;
        for (session_id, shared) in snapshot {
            let mut state = shared.clone().lock_owned().await;
            if !state.evicted && state.is_expired(self.clock.now(), self.config.ttl) {
                self.evict(&session_id, &shared, &mut state);
                evicted += 1;
            }
        }
        if evicted > 0 {
            info!(
                "Swept {} expired sessions, {} remain",
                evicted,
                self.sessions.len()
            );
        }
        evicted
    }

    /// Run `sweep_expired` every `sweep_interval` until `shutdown` turns true
    /// or its sender is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let period = manager.config.sweep_interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            info!("Session sweeper started (every {:?})", period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        manager.sweep_expired().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Session sweeper stopped");
        })
    }

    fn index_options(&self) -> IndexOptions {
        let retrieval = self.pipeline.config();
        IndexOptions {
            dense_weight: retrieval.dense_weight,
            lexical_weight: retrieval.lexical_weight,
            language: None,
            language_sample_chunks: self.config.language_sample_chunks,
        }
    }

    fn handle(&self, session_id: &str) -> Option<SharedSession> {
        self.sessions.get(session_id).map(|r| r.value().clone())
    }

    /// Lock a session that is present and not expired. An expired session is
    /// evicted on the spot and reported as absent.
    async fn lock_live(&self, session_id: &str) -> Option<OwnedMutexGuard<SessionState>> {
        let shared = self.handle(session_id)?;
        let mut state = shared.clone().lock_owned().await;
        if state.evicted {
            return None;
        }
        if state.is_expired(self.clock.now(), self.config.ttl) {
            self.evict(session_id, &shared, &mut state);
            debug!("Session {} expired on lookup", session_id);
            return None;
        }
        Some(state)
    }

    async fn lock_existing(&self, session_id: &str) -> Result<OwnedMutexGuard<SessionState>> {
        self.lock_live(session_id)
            .await
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    /// Lock a live session whose document is still at `generation`.
    async fn lock_current(
        &self,
        session_id: &str,
        generation: u64,
    ) -> Result<OwnedMutexGuard<SessionState>> {
        let state = self.lock_existing(session_id).await?;
        if state.generation != generation {
            return Err(Error::StaleDocument {
                expected: generation,
                current: state.generation,
            });
        }
        Ok(state)
    }

    /// Lock the session whose upload `generation` has not been settled yet.
    async fn lock_pending(
        &self,
        session_id: &str,
        generation: u64,
    ) -> Result<OwnedMutexGuard<SessionState>> {
        let state = self.lock_current(session_id, generation).await?;
        if state.status != IngestStatus::Processing {
            return Err(Error::StaleDocument {
                expected: generation,
                current: state.generation,
            });
        }
        Ok(state)
    }

    /// Lock a live session, creating it if absent, and refresh its activity.
    async fn get_or_create(&self, session_id: &str) -> OwnedMutexGuard<SessionState> {
        let mut state = self.lookup_or_create(session_id).await;
        state.touch(self.clock.now());
        state
    }

    /// Lock a live session, creating it if absent. Existing sessions keep
    /// their activity time.
    async fn lookup_or_create(&self, session_id: &str) -> OwnedMutexGuard<SessionState> {
        if let Some(state) = self.lock_live(session_id).await {
            return state;
        }
        loop {
            let shared = self
                .sessions
                .entry(session_id.to_string())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(SessionState::new(session_id, self.clock.now())))
                })
                .value()
                .clone();
            let state = shared.lock_owned().await;
            // Evicted entries are removed from the map before their lock is released.
            if state.evicted {
                continue;
            }
            return state;
        }
    }

    /// Release a session's memory and drop it from the map. Caller holds its lock.
    fn evict(&self, session_id: &str, shared: &SharedSession, state: &mut SessionState) {
        state.release();
        self.sessions
            .remove_if(session_id, |_, current| Arc::ptr_eq(current, shared));
    }
}

/// Resolve chunk ids against the current index. Any unknown id fails the lot.
fn resolve_chunks(index: &HybridIndex, ids: &[String]) -> Result<Vec<Chunk>> {
    ids.iter()
        .map(|id| {
            index
                .chunk(id)
                .cloned()
                .ok_or_else(|| Error::UnknownChunk(id.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use docent_core::RetrievalConfig;
    use docent_infer::{KeywordEmbedder, ScriptedModel};

    const VOCAB: [&str; 4] = ["zeppelin", "rain", "press", "stew"];

    fn manager(ttl: Duration) -> (Arc<SessionManager>, Arc<ManualClock>, Arc<KeywordEmbedder>) {
        let embedder = Arc::new(KeywordEmbedder::new(VOCAB));
        let model = Arc::new(ScriptedModel::new());
        let pipeline = QueryPipeline::new(embedder.clone(), model, RetrievalConfig::default()).unwrap();
        let clock = Arc::new(ManualClock::new());
        let config = SessionConfig {
            ttl,
            ..Default::default()
        };
        let manager = SessionManager::with_clock(Arc::new(pipeline), config, clock.clone());
        (Arc::new(manager), clock, embedder)
    }

    fn document(prefix: &str, embedder: &KeywordEmbedder) -> (Vec<Chunk>, Vec<Vec<f32>>) {
        let chunks: Vec<Chunk> = [
            "Rain fell on the coast all winter.",
            "The printing press changed Europe.",
            "A zeppelin moored at the mast.",
        ]
        .iter()
        .enumerate()
        .map(|(i, t)| Chunk::new(format!("{}-{}", prefix, i + 1), *t))
        .collect();
        let embeddings = chunks.iter().map(|c| embedder.vector(&c.text)).collect();
        (chunks, embeddings)
    }

    #[tokio::test]
    async fn test_upload_then_fast_retrieve() {
        let (manager, _clock, embedder) = manager(Duration::from_secs(60));
        let generation = manager.begin_upload("s1", Some("notes.txt".into())).await;
        let (chunks, embeddings) = document("a", &embedder);
        let status = manager
            .finalize_document("s1", generation, chunks, embeddings)
            .await
            .unwrap();
        assert_eq!(status, IngestStatus::Ready);

        let turn = manager
            .retrieve("s1", "zeppelin", 2, RetrievalMode::Fast)
            .await
            .unwrap();
        assert_eq!(turn.generation, generation);
        assert_eq!(turn.evidence.len(), 2);
        assert_eq!(turn.evidence[0].id, "a-3");

        let status = manager.status("s1").await.unwrap();
        assert_eq!(status.filename.as_deref(), Some("notes.txt"));
        assert_eq!(status.chunk_count, 3);
    }

    #[tokio::test]
    async fn test_failed_build_moves_to_error() {
        let (manager, _clock, _) = manager(Duration::from_secs(60));
        let generation = manager.begin_upload("s1", None).await;
        let result = manager
            .finalize_document("s1", generation, vec![Chunk::new("x", "text")], vec![])
            .await;
        assert!(matches!(result, Err(Error::IndexBuild(_))));

        let status = manager.status("s1").await.unwrap();
        assert_eq!(status.status, IngestStatus::Error);
        assert_eq!(status.ingest_error.as_deref(), Some(INGEST_FAILED));
        assert!(matches!(
            manager.retrieve("s1", "rain", 1, RetrievalMode::Fast).await,
            Err(Error::SessionNotReady { status }) if status == "error"
        ));
    }

    #[tokio::test]
    async fn test_fail_ingest_respects_generation() {
        let (manager, _clock, _) = manager(Duration::from_secs(60));
        let first = manager.begin_upload("s1", None).await;
        let second = manager.begin_upload("s1", None).await;
        assert!(matches!(
            manager.fail_ingest("s1", first, "parse error").await,
            Err(Error::StaleDocument { .. })
        ));
        manager.fail_ingest("s1", second, "parse error").await.unwrap();
        assert_eq!(manager.status("s1").await.unwrap().status, IngestStatus::Error);
    }

    #[tokio::test]
    async fn test_remove() {
        let (manager, _clock, _) = manager(Duration::from_secs(60));
        let id = manager.create_session().await;
        assert_eq!(manager.session_count(), 1);
        assert!(manager.remove(&id).await);
        assert!(!manager.remove(&id).await);
        assert!(matches!(manager.status(&id).await, Err(Error::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_lookup_expires_without_sweep() {
        let (manager, clock, _) = manager(Duration::from_secs(5));
        manager.begin_upload("s1", None).await;
        clock.advance(Duration::from_secs(5));
        assert!(matches!(manager.status("s1").await, Err(Error::SessionNotFound(_))));
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let (manager, _clock, embedder) = manager(Duration::from_secs(60));
        let g1 = manager.begin_upload("s1", None).await;
        let g2 = manager.begin_upload("s2", None).await;
        let (c1, e1) = document("one", &embedder);
        let (c2, e2) = document("two", &embedder);
        manager.finalize_document("s1", g1, c1, e1).await.unwrap();
        manager.finalize_document("s2", g2, c2, e2).await.unwrap();

        let (r1, r2) = tokio::join!(
            manager.retrieve("s1", "press", 1, RetrievalMode::Fast),
            manager.retrieve("s2", "press", 1, RetrievalMode::Fast),
        );
        assert_eq!(r1.unwrap().evidence[0].id, "one-2");
        assert_eq!(r2.unwrap().evidence[0].id, "two-2");
        assert!(matches!(
            manager.register_references("s1", g1, &["two-2".to_string()]).await,
            Err(Error::UnknownChunk(_))
        ));
    }
}
