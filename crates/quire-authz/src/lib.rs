//! Authorization for Quire.
//!
//! Access decisions are delegated to a relationship-based permission oracle.
//! This crate defines the two seams the diary service talks to:
//!
//! - [`PermissionOracle`] answers "may agent X do Y to object Z?"
//! - [`RelationshipWriter`] records and removes the tuples those answers
//!   are computed from
//!
//! [`InMemoryOracle`] implements both in-process; [`HttpOracle`] talks to a
//! Keto-compatible server.

mod error;
mod http;
mod memory;
mod oracle;
mod tuple;

use std::sync::Arc;

use quire_config::{OracleConfig, OracleProvider};

pub use error::{AuthzError, Result};
pub use http::{HttpOracle, HttpOracleConfig};
pub use memory::InMemoryOracle;
pub use oracle::{
    Permission, PermissionOracle, PermissionOracleExt, RelationshipWriter, SharedOracle,
    SharedWriter,
};
pub use tuple::{Namespace, Relation, RelationTuple, Subject, TupleQuery};

/// Build the oracle described by `config`.
///
/// Returns the same backend behind both seams.
pub fn build_oracle(config: &OracleConfig) -> Result<(SharedOracle, SharedWriter)> {
    match config.provider {
        OracleProvider::Memory => {
            let oracle = Arc::new(InMemoryOracle::new());
            tracing::info!(provider = "memory", "Permission oracle ready");
            Ok((oracle.clone(), oracle))
        }
        OracleProvider::Http => {
            let http = HttpOracleConfig::new(&config.read_url, &config.write_url)
                .with_timeout(config.timeout());
            let oracle = Arc::new(HttpOracle::new(http)?);
            tracing::info!(
                provider = "http",
                read_url = %config.read_url,
                write_url = %config.write_url,
                "Permission oracle ready"
            );
            Ok((oracle.clone(), oracle))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_memory_oracle() {
        let config = OracleConfig::default();
        assert!(build_oracle(&config).is_ok());
    }

    #[test]
    fn test_build_http_oracle() {
        let config = OracleConfig {
            provider: OracleProvider::Http,
            ..OracleConfig::default()
        };
        assert!(build_oracle(&config).is_ok());
    }
}
