//! Embedding providers for semantic search.
//!
//! Embedding a query is a separate operation from embedding a passage: some
//! models (E5, BGE) encode the two asymmetrically and expect a role prefix on
//! the input. The [`Embedder`] trait exposes both so callers never have to
//! know which scheme the configured model uses.
//!
//! # Implementations
//!
//! - [`MockEmbedder`]: deterministic bag-of-words vectors for tests and offline use
//! - [`OpenAiEmbedder`]: any OpenAI-compatible `/embeddings` endpoint

mod error;
mod mock;
mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use quire_config::{EmbeddingConfig, EmbeddingProvider};

pub use error::{EmbedError, Result};
pub use mock::MockEmbedder;
pub use openai::{OpenAiEmbedder, OpenAiEmbedderConfig};

// ─────────────────────────────────────────────────────────────────────────────
// Embedder Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Turns text into fixed-length vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a stored document.
    async fn embed_passage(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a search query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Dimensionality of produced vectors.
    fn dimensions(&self) -> usize;

    /// Provider name, for logs.
    fn name(&self) -> &str;
}

/// A shared embedder that can be used across threads.
pub type SharedEmbedder = Arc<dyn Embedder>;

/// Build the embedder described by `config`.
///
/// Returns `Ok(None)` for [`EmbeddingProvider::None`].
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Option<SharedEmbedder>> {
    let embedder: SharedEmbedder = match config.provider {
        EmbeddingProvider::None => return Ok(None),
        EmbeddingProvider::Mock => Arc::new(MockEmbedder::new(config.effective_dimensions())),
        EmbeddingProvider::OpenAi => {
            let api_key = std::env::var(&config.api_key_env).map_err(|_| {
                EmbedError::Config(format!(
                    "{} environment variable not set",
                    config.api_key_env
                ))
            })?;
            let openai = OpenAiEmbedderConfig::new(api_key)
                .with_base_url(&config.base_url)
                .with_model(&config.model)
                .with_dimensions(config.effective_dimensions())
                .with_prefixes(config.query_prefix.clone(), config.passage_prefix.clone())
                .with_timeout(std::time::Duration::from_millis(config.timeout_ms));
            Arc::new(OpenAiEmbedder::new(openai)?)
        }
    };
    tracing::info!(
        provider = embedder.name(),
        dimensions = embedder.dimensions(),
        "Embedding provider ready"
    );
    Ok(Some(embedder))
}

/// Cosine similarity of two vectors; 0.0 when either is zero or sizes differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
