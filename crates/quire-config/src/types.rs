//! Configuration types mapping to the TOML schema.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuireConfig {
    pub database: DatabaseConfig,
    pub retry: RetryConfig,
    pub propagation: PropagationConfig,
    pub search: SearchConfig,
    pub embedding: EmbeddingConfig,
    pub oracle: OracleConfig,
    pub logging: LoggingConfig,
}

impl QuireConfig {
    /// Parse and validate a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_retries == 0 {
            return Err(invalid("retry.max_retries", "must be at least 1"));
        }
        if self.propagation.batch_size == 0 {
            return Err(invalid("propagation.batch_size", "must be at least 1"));
        }
        if self.propagation.max_attempts == 0 {
            return Err(invalid("propagation.max_attempts", "must be at least 1"));
        }
        if self.search.recency_half_life_days <= 0.0 {
            return Err(invalid("search.recency_half_life_days", "must be positive"));
        }
        for (field, weight) in [
            ("search.relevance_weight", self.search.relevance_weight),
            ("search.recency_weight", self.search.recency_weight),
            ("search.importance_weight", self.search.importance_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(invalid(field, "must be a non-negative number"));
            }
        }
        if self.search.default_limit == 0 || self.search.default_limit > self.search.max_limit {
            return Err(invalid(
                "search.default_limit",
                "must be between 1 and search.max_limit",
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Database
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite storage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file. `None` resolves to `<data_dir>/quire.db`.
    pub path: Option<PathBuf>,
    /// How long SQLite waits on a lock before reporting busy. Zero hands every
    /// conflict straight to the retry wrapper.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: 0,
        }
    }
}

impl DatabaseConfig {
    /// Resolved database path.
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            crate::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("quire.db")
        })
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Retry
// ─────────────────────────────────────────────────────────────────────────────

/// Serialization-conflict retry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts before giving up with a conflict-exhausted error.
    pub max_retries: u32,
    /// Upper bound of the jittered delay; the floor is half of it.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 50,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Propagation
// ─────────────────────────────────────────────────────────────────────────────

/// How settlement of freshly committed outbox jobs is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropagationMode {
    /// Await settlement (bounded by the timeout) before returning.
    #[default]
    Inline,
    /// Spawn settlement and return immediately. Revocations stay inline.
    Background,
}

/// Outbox settlement and dispatcher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationConfig {
    pub mode: PropagationMode,
    /// Budget for one settlement call against the oracle.
    pub timeout_ms: u64,
    /// How often the dispatcher looks for due jobs.
    pub poll_interval_ms: u64,
    /// Jobs claimed per dispatcher pass.
    pub batch_size: usize,
    /// Attempts before a job is parked as failed.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// How long applied jobs stay in the outbox before the dispatcher
    /// deletes them.
    pub done_retention_secs: u64,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            mode: PropagationMode::Inline,
            timeout_ms: 5_000,
            poll_interval_ms: 1_000,
            batch_size: 50,
            max_attempts: 12,
            initial_backoff_ms: 500,
            max_backoff_ms: 300_000,
            done_retention_secs: 86_400,
        }
    }
}

impl PropagationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn done_retention(&self) -> Duration {
        Duration::from_secs(self.done_retention_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Search
// ─────────────────────────────────────────────────────────────────────────────

/// Default ranking weights and paging limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub relevance_weight: f32,
    pub recency_weight: f32,
    pub importance_weight: f32,
    /// Age at which the recency term halves.
    pub recency_half_life_days: f32,
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            relevance_weight: 1.0,
            recency_weight: 0.1,
            importance_weight: 0.1,
            recency_half_life_days: 30.0,
            default_limit: 10,
            max_limit: 100,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedding
// ─────────────────────────────────────────────────────────────────────────────

/// Which embedding backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Deterministic hash-based vectors (tests, offline use).
    Mock,
    /// OpenAI-compatible `/embeddings` endpoint.
    #[default]
    OpenAi,
    /// No embeddings; search is lexical only.
    None,
}

/// Embedding provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub dimensions: Option<usize>,
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Prefixes for asymmetric models (e.g. E5's "query: " / "passage: ").
    pub query_prefix: Option<String>,
    pub passage_prefix: Option<String>,
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::OpenAi,
            model: "text-embedding-3-small".to_string(),
            dimensions: None,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            query_prefix: None,
            passage_prefix: None,
            timeout_ms: 30_000,
        }
    }
}

impl EmbeddingConfig {
    /// Effective dimensions for the configured provider.
    pub fn effective_dimensions(&self) -> usize {
        if let Some(d) = self.dimensions {
            return d;
        }
        match self.provider {
            EmbeddingProvider::Mock => 384,
            EmbeddingProvider::OpenAi => match self.model.as_str() {
                "text-embedding-3-large" => 3072,
                _ => 1536,
            },
            EmbeddingProvider::None => 0,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Oracle
// ─────────────────────────────────────────────────────────────────────────────

/// Which permission oracle to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleProvider {
    /// In-process relation graph.
    #[default]
    Memory,
    /// Remote relation-tuple service over HTTP.
    Http,
}

/// Permission oracle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub provider: OracleProvider,
    /// Base URL of the check API.
    pub read_url: String,
    /// Base URL of the tuple write API.
    pub write_url: String,
    pub timeout_ms: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            provider: OracleProvider::Memory,
            read_url: "http://localhost:4466".to_string(),
            write_url: "http://localhost:4467".to_string(),
            timeout_ms: 3_000,
        }
    }
}

impl OracleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

/// Tracing output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive for the console layer.
    pub filter: String,
    /// Directory for daily-rolling JSON logs. `None` disables the file layer.
    pub json_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "quire_diary=info,quire_store=info,quire_authz=info,warn".to_string(),
            json_dir: None,
        }
    }
}
