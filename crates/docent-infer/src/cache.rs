//! LRU query-embedding cache.
//!
//! Keyed by (instruction hint, text) so the same question asked again in a
//! session skips the embedding round-trip. Default: 1000 entries, 1-hour TTL.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::debug;

use docent_core::Result;

use crate::embedder::{check_batch, Embedder};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    hint: Option<String>,
    text: String,
}

struct CacheEntry {
    embedding: Vec<f32>,
    inserted_at: Instant,
}

/// Thread-safe LRU cache of query embeddings.
pub struct QueryEmbeddingCache {
    inner: Mutex<CacheInner>,
}

struct CacheInner {
    entries: HashMap<CacheKey, CacheEntry>,
    order: VecDeque<CacheKey>,
    max_size: usize,
    ttl: Duration,
}

impl CacheInner {
    fn touch(&mut self, key: &CacheKey) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }

    fn evict(&mut self, key: &CacheKey) {
        self.entries.remove(key);
        self.order.retain(|k| k != key);
    }
}

impl QueryEmbeddingCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::with_capacity(max_size),
                order: VecDeque::with_capacity(max_size),
                max_size: max_size.max(1),
                ttl,
            }),
        }
    }

    pub fn get(&self, hint: Option<&str>, text: &str) -> Option<Vec<f32>> {
        let key = CacheKey {
            hint: hint.map(String::from),
            text: text.to_string(),
        };
        let mut inner = self.inner.lock();

        let (fresh, embedding) = match inner.entries.get(&key) {
            Some(entry) => (
                entry.inserted_at.elapsed() < inner.ttl,
                entry.embedding.clone(),
            ),
            None => return None,
        };
        if fresh {
            inner.touch(&key);
            Some(embedding)
        } else {
            inner.evict(&key);
            None
        }
    }

    pub fn put(&self, hint: Option<&str>, text: &str, embedding: Vec<f32>) {
        let key = CacheKey {
            hint: hint.map(String::from),
            text: text.to_string(),
        };
        let mut inner = self.inner.lock();

        if inner.entries.contains_key(&key) {
            inner.touch(&key);
        } else {
            while inner.entries.len() >= inner.max_size {
                let Some(oldest) = inner.order.pop_front() else {
                    break;
                };
                inner.entries.remove(&oldest);
            }
            inner.order.push_back(key.clone());
        }
        inner.entries.insert(
            key,
            CacheEntry {
                embedding,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }
}

impl Default for QueryEmbeddingCache {
    fn default() -> Self {
        Self::new(1000, Duration::from_secs(3600))
    }
}

/// An [`Embedder`] that serves repeated inputs from a [`QueryEmbeddingCache`]
/// and forwards only the misses, in one batch, to the wrapped embedder.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: QueryEmbeddingCache,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, cache: QueryEmbeddingCache) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &QueryEmbeddingCache {
        &self.cache
    }

    async fn embed_cached(
        &self,
        texts: Vec<String>,
        hint: Option<String>,
    ) -> Result<Vec<Vec<f32>>> {
        let mut out: Vec<Option<Vec<f32>>> = texts
            .iter()
            .map(|t| self.cache.get(hint.as_deref(), t))
            .collect();

        let misses: Vec<usize> = (0..texts.len()).filter(|&i| out[i].is_none()).collect();
        debug!(
            "Query embedding cache: {} hits, {} misses",
            texts.len() - misses.len(),
            misses.len()
        );

        if !misses.is_empty() {
            let batch: Vec<String> = misses.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self.inner.embed(batch, hint.clone()).await?;
            check_batch(misses.len(), &vectors)?;
            for (&i, vector) in misses.iter().zip(vectors) {
                self.cache.put(hint.as_deref(), &texts[i], vector.clone());
                out[i] = Some(vector);
            }
        }

        Ok(out.into_iter().flatten().collect())
    }
}

impl Embedder for CachedEmbedder {
    fn embed(
        &self,
        texts: Vec<String>,
        instruction_hint: Option<String>,
    ) -> BoxFuture<'_, Result<Vec<Vec<f32>>>> {
        Box::pin(self.embed_cached(texts, instruction_hint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_cache_hit_and_miss() {
        let cache = QueryEmbeddingCache::new(10, Duration::from_secs(3600));
        assert!(cache.get(None, "hello").is_none());

        cache.put(None, "hello", vec![1.0, 2.0, 3.0]);
        assert_eq!(cache.get(None, "hello"), Some(vec![1.0, 2.0, 3.0]));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_hint_is_part_of_key() {
        let cache = QueryEmbeddingCache::new(10, Duration::from_secs(3600));
        cache.put(Some("task"), "hello", vec![1.0]);
        assert!(cache.get(None, "hello").is_none());
        assert!(cache.get(Some("other"), "hello").is_none());
        assert!(cache.get(Some("task"), "hello").is_some());
    }

    #[test]
    fn test_cache_eviction_is_lru() {
        let cache = QueryEmbeddingCache::new(2, Duration::from_secs(3600));
        cache.put(None, "a", vec![1.0]);
        cache.put(None, "b", vec![2.0]);
        // Touch "a" so "b" becomes the oldest.
        assert!(cache.get(None, "a").is_some());

        cache.put(None, "c", vec![3.0]);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(None, "b").is_none());
        assert!(cache.get(None, "a").is_some());
        assert!(cache.get(None, "c").is_some());
    }

    #[test]
    fn test_cache_ttl_expiry() {
        let cache = QueryEmbeddingCache::new(10, Duration::from_millis(1));
        cache.put(None, "ephemeral", vec![1.0]);

        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(None, "ephemeral").is_none());
        assert!(cache.is_empty());
    }

    struct CountingEmbedder {
        calls: AtomicUsize,
        inputs: AtomicUsize,
    }

    impl Embedder for CountingEmbedder {
        fn embed(
            &self,
            texts: Vec<String>,
            _hint: Option<String>,
        ) -> BoxFuture<'_, Result<Vec<Vec<f32>>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inputs.fetch_add(texts.len(), Ordering::SeqCst);
            let out = texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect();
            Box::pin(async move { Ok(out) })
        }
    }

    #[tokio::test]
    async fn test_cached_embedder_forwards_only_misses() {
        let backend = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
            inputs: AtomicUsize::new(0),
        });
        let embedder = CachedEmbedder::new(backend.clone(), QueryEmbeddingCache::default());

        let first = embedder
            .embed(vec!["ab".into(), "abcd".into()], None)
            .await
            .unwrap();
        assert_eq!(first, vec![vec![2.0, 1.0], vec![4.0, 1.0]]);

        let second = embedder
            .embed(vec!["abcd".into(), "x".into(), "ab".into()], None)
            .await
            .unwrap();
        assert_eq!(second, vec![vec![4.0, 1.0], vec![1.0, 1.0], vec![2.0, 1.0]]);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert_eq!(backend.inputs.load(Ordering::SeqCst), 3);

        embedder.embed(vec!["x".into()], None).await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }
}
