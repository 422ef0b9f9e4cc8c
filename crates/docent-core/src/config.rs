//! Configuration value objects.
//!
//! Every tunable used by retrieval and session handling lives here so tests
//! and hosts can vary them without touching module constants.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_SIMPLE_MODEL: &str = "google/gemini-2.5-flash";
pub const DEFAULT_COMPLEX_MODEL: &str = "google/gemini-2.5-flash";
pub const DEFAULT_EMBEDDING_MODEL: &str = "qwen/qwen3-embedding-8b";
pub const DEFAULT_QUERY_INSTRUCTION: &str =
    "Given a question about a document, retrieve passages of the document that answer it";

/// Delivery order of the final evidence set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackingStrategy {
    /// Best candidate last, closest to the question in the prompt.
    #[default]
    Reverse,
    /// Best candidate first.
    Forward,
    /// Keep fusion order untouched.
    None,
}

impl PackingStrategy {
    /// Lenient parse: unknown or empty values fall back to `Reverse`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "forward" => Self::Forward,
            "none" | "off" | "disabled" | "disable" => Self::None,
            _ => Self::Reverse,
        }
    }
}

impl std::fmt::Display for PackingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reverse => write!(f, "reverse"),
            Self::Forward => write!(f, "forward"),
            Self::None => write!(f, "none"),
        }
    }
}

/// How several embeddings of the same query variant are combined.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "factor")]
pub enum Aggregation {
    /// Arithmetic mean.
    #[default]
    Uniform,
    /// Weight `factor^i` for the i-th input, normalised to sum to one.
    Decay(f32),
}

/// Tunables for the hybrid index and the query pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub dense_weight: f64,
    pub lexical_weight: f64,
    /// Candidates fetched per side, per query variant.
    pub per_query_top_n: usize,
    pub rrf_k: usize,
    pub fusion_max_candidates: usize,
    pub query_variants: usize,
    pub query_variants_hard_cap: usize,
    pub hyde_enabled: bool,
    pub hyde_max_words: usize,
    pub drift_filter_enabled: bool,
    pub drift_threshold: f32,
    pub hyde_drift_threshold: f32,
    pub rerank_enabled: bool,
    pub rerank_pool: usize,
    pub rerank_max_chars: usize,
    pub rerank_concurrency: usize,
    pub packing: PackingStrategy,
    /// Dense dimension used in fast mode. 0 or >= full dim means full resolution.
    pub fast_search_dim: usize,
    pub query_instruction: Option<String>,
    /// Also embed the un-hinted query text and aggregate it with the hinted one.
    pub embed_raw_query: bool,
    pub aggregation: Aggregation,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            dense_weight: 0.8,
            lexical_weight: 0.2,
            per_query_top_n: 50,
            rrf_k: 60,
            fusion_max_candidates: 120,
            query_variants: 6,
            query_variants_hard_cap: 8,
            hyde_enabled: true,
            hyde_max_words: 120,
            drift_filter_enabled: true,
            drift_threshold: 0.55,
            hyde_drift_threshold: 0.35,
            rerank_enabled: true,
            rerank_pool: 30,
            rerank_max_chars: 1200,
            rerank_concurrency: 8,
            packing: PackingStrategy::Reverse,
            fast_search_dim: 512,
            query_instruction: Some(DEFAULT_QUERY_INSTRUCTION.to_string()),
            embed_raw_query: true,
            aggregation: Aggregation::Uniform,
        }
    }
}

impl RetrievalConfig {
    /// Reject configurations the pipeline cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.dense_weight < 0.0 || self.lexical_weight < 0.0 {
            return Err(Error::Config("fusion weights must be non-negative".into()));
        }
        if ((self.dense_weight + self.lexical_weight) - 1.0).abs() > 1e-6 {
            return Err(Error::Config(format!(
                "dense_weight + lexical_weight must sum to 1.0 (got {} + {})",
                self.dense_weight, self.lexical_weight
            )));
        }
        if self.rrf_k < 1 {
            return Err(Error::Config("rrf_k must be >= 1".into()));
        }
        if self.per_query_top_n < 1 {
            return Err(Error::Config("per_query_top_n must be >= 1".into()));
        }
        if self.fusion_max_candidates < 1 {
            return Err(Error::Config("fusion_max_candidates must be >= 1".into()));
        }
        if let Aggregation::Decay(f) = self.aggregation {
            if !(f > 0.0 && f <= 1.0) {
                return Err(Error::Config(format!("decay factor must be in (0, 1], got {}", f)));
            }
        }
        Ok(())
    }

    /// Number of expansion variants actually requested.
    pub fn effective_variants(&self) -> usize {
        self.query_variants.min(self.query_variants_hard_cap)
    }
}

/// Session lifecycle tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sliding inactivity TTL.
    pub ttl: Duration,
    pub sweep_interval: Duration,
    /// Number of leading chunks sampled to detect the document language.
    pub language_sample_chunks: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(30),
            language_sample_chunks: 8,
        }
    }
}

impl SessionConfig {
    /// Read overrides from the environment, keeping defaults for missing or bad values.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ttl: env_secs("DOCENT_SESSION_TTL_SECONDS").unwrap_or(defaults.ttl),
            sweep_interval: env_secs("DOCENT_SESSION_SWEEP_SECONDS")
                .unwrap_or(defaults.sweep_interval),
            language_sample_chunks: defaults.language_sample_chunks,
        }
    }
}

/// Retry and timeout policy for a single collaborator call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Upper bound of the random delay added on top of each backoff.
    pub jitter: Duration,
    /// Hard limit per attempt.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(4),
            jitter: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Backoff to wait after the given (1-based) failed attempt.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.initial_backoff.saturating_mul(1u32 << exp);
        delay.min(self.max_backoff)
    }

    /// `backoff_after` plus a uniform random share of `jitter`, still capped
    /// at `max_backoff`.
    pub fn jittered_backoff(&self, attempt: u32) -> Duration {
        let spread = self.jitter.as_millis() as u64;
        let extra = if spread == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=spread)
        };
        (self.backoff_after(attempt) + Duration::from_millis(extra)).min(self.max_backoff)
    }
}

/// Remote model provider settings (OpenAI-compatible API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(skip_serializing)]
    pub api_key: String,
    pub base_url: String,
    pub simple_model: String,
    pub complex_model: String,
    pub embedding_model: String,
    pub http_referer: Option<String>,
    pub app_title: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.into(),
            simple_model: DEFAULT_SIMPLE_MODEL.into(),
            complex_model: DEFAULT_COMPLEX_MODEL.into(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.into(),
            http_referer: None,
            app_title: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl ProviderConfig {
    /// Create configuration from environment and defaults.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::Config("OPENROUTER_API_KEY is not set".into()))?;

        let defaults = Self::default();
        Ok(Self {
            api_key,
            base_url: env_string("OPENROUTER_BASE_URL").unwrap_or(defaults.base_url),
            simple_model: env_string("DOCENT_SIMPLE_MODEL").unwrap_or(defaults.simple_model),
            complex_model: env_string("DOCENT_COMPLEX_MODEL").unwrap_or(defaults.complex_model),
            embedding_model: env_string("OPENROUTER_EMBEDDING_MODEL")
                .unwrap_or(defaults.embedding_model),
            http_referer: env_string("OPENROUTER_HTTP_REFERER"),
            app_title: env_string("OPENROUTER_X_TITLE"),
            retry: defaults.retry,
        })
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_secs(name: &str) -> Option<Duration> {
    env_string(name)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RetrievalConfig::default().validate().is_ok());
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let config = RetrievalConfig {
            dense_weight: 0.7,
            lexical_weight: 0.2,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_effective_variants_respects_hard_cap() {
        let config = RetrievalConfig {
            query_variants: 20,
            ..Default::default()
        };
        assert_eq!(config.effective_variants(), 8);
    }

    #[test]
    fn test_packing_parse_lenient() {
        assert_eq!(PackingStrategy::parse_lenient("forward"), PackingStrategy::Forward);
        assert_eq!(PackingStrategy::parse_lenient(" OFF "), PackingStrategy::None);
        assert_eq!(PackingStrategy::parse_lenient("???"), PackingStrategy::Reverse);
        assert_eq!(PackingStrategy::parse_lenient(""), PackingStrategy::Reverse);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_after(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_after(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff_after(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff_after(10), Duration::from_secs(4));
    }

    #[test]
    fn test_jittered_backoff_stays_in_window() {
        let policy = RetryPolicy::default();
        for attempt in 1..=4 {
            let base = policy.backoff_after(attempt);
            let ceiling = (base + policy.jitter).min(policy.max_backoff);
            for _ in 0..50 {
                let delay = policy.jittered_backoff(attempt);
                assert!(delay >= base && delay <= ceiling, "{:?} outside {:?}..={:?}", delay, base, ceiling);
            }
        }

        let fixed = RetryPolicy {
            jitter: Duration::ZERO,
            ..RetryPolicy::default()
        };
        assert_eq!(fixed.jittered_backoff(2), Duration::from_millis(1000));
    }

    #[test]
    fn test_aggregation_serde() {
        let json = serde_json::to_value(Aggregation::Decay(0.5)).unwrap();
        assert_eq!(json["kind"], "decay");
        let back: Aggregation = serde_json::from_value(json).unwrap();
        assert_eq!(back, Aggregation::Decay(0.5));
    }
}
