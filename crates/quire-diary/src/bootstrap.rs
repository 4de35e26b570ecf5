//! Wiring a service and dispatcher from configuration.

use std::sync::Arc;

use tracing::info;

use quire_config::QuireConfig;
use quire_store::{RetryPolicy, SqliteStore};

use crate::dispatcher::Dispatcher;
use crate::error::{DiaryError, Result};
use crate::propagation::RelationshipPropagator;
use crate::service::DiaryService;

/// A ready-to-use service and the dispatcher draining its outbox.
pub struct DiaryRuntime {
    pub service: DiaryService,
    pub dispatcher: Dispatcher,
}

impl DiaryRuntime {
    /// Open the database and build the embedder and oracle described by
    /// `config`.
    pub fn from_config(config: &QuireConfig) -> Result<Self> {
        let store = Arc::new(SqliteStore::from_config(&config.database)?);
        let embedder = quire_embed::build_embedder(&config.embedding)
            .map_err(|e| DiaryError::Internal(format!("embedding provider: {e}")))?;
        let (oracle, writer) = quire_authz::build_oracle(&config.oracle)?;

        let propagator =
            RelationshipPropagator::new(store.clone(), writer, config.propagation.clone());
        let service = DiaryService::new(store, oracle, propagator.clone())
            .with_embedder(embedder)
            .with_retry_policy(RetryPolicy::from(&config.retry))
            .with_search_config(config.search.clone());
        let dispatcher = Dispatcher::new(propagator);

        info!(
            database = %config.database.resolved_path().display(),
            semantic_search = service.has_embedder(),
            mode = ?config.propagation.mode,
            "Diary service ready"
        );
        Ok(Self {
            service,
            dispatcher,
        })
    }
}
