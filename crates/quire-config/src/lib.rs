//! Configuration for the Quire diary store.
//!
//! Configuration lives in a single TOML file. Every section is optional and
//! falls back to defaults, so an empty file is a valid configuration:
//!
//! ```toml
//! [database]
//! path = "/var/lib/quire/quire.db"
//!
//! [retry]
//! max_retries = 5
//! base_delay_ms = 50
//!
//! [propagation]
//! mode = "inline"
//! timeout_ms = 5000
//!
//! [search]
//! relevance_weight = 1.0
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//!
//! [oracle]
//! provider = "http"
//! read_url = "http://localhost:4466"
//! write_url = "http://localhost:4467"
//! ```

mod error;
mod types;

use std::path::{Path, PathBuf};

pub use error::{ConfigError, Result};
pub use types::{
    DatabaseConfig, EmbeddingConfig, EmbeddingProvider, LoggingConfig, OracleConfig,
    OracleProvider, PropagationConfig, PropagationMode, QuireConfig, RetryConfig, SearchConfig,
};

/// Name of the config file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "quire.toml";

/// Platform config directory for Quire (e.g. `~/.config/quire`).
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("quire"))
}

/// Platform data directory for Quire (e.g. `~/.local/share/quire`).
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("quire"))
}

/// Default location of the config file.
pub fn default_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join(CONFIG_FILE_NAME))
}

/// Load configuration from `path`.
pub fn load(path: impl AsRef<Path>) -> Result<QuireConfig> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.display().to_string(),
        source,
    })?;
    QuireConfig::from_toml(&raw)
}

/// Load from the default path, or return defaults when no file exists there.
pub fn load_or_default() -> Result<QuireConfig> {
    match default_path() {
        Some(path) if path.exists() => load(path),
        _ => Ok(QuireConfig::default()),
    }
}
