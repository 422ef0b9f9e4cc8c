//! Docent Core: chunk record, error taxonomy, configuration.

pub mod chunk;
pub mod config;
pub mod error;
pub mod telemetry;

pub use chunk::Chunk;
pub use config::{
    Aggregation, PackingStrategy, ProviderConfig, RetrievalConfig, RetryPolicy, SessionConfig,
};
pub use error::{Error, Result};
