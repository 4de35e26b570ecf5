//! The diary service.
//!
//! [`DiaryService`] composes the store, the permission oracle, the
//! embedding provider and the relationship propagator. Every operation
//! follows the same shape:
//!
//! 1. authenticate the requester and check access (owner and visibility
//!    shortcuts first, then the oracle)
//! 2. do slow external work (embeddings) with no transaction open
//! 3. write locally and enqueue relationship changes in one serializable
//!    transaction, retried on conflict
//! 4. settle the enqueued changes against the oracle after commit

mod catalog;
mod entries;
mod sharing;

use std::sync::Arc;

use rusqlite::Transaction;
use tracing::{debug, warn};

use quire_authz::{PermissionOracleExt, SharedOracle};
use quire_config::SearchConfig;
use quire_embed::SharedEmbedder;
use quire_store::{
    AccessContext, RankWeights, Repositories, RetryPolicy, SqliteStore, with_conflict_retry,
};
use quire_types::{AgentId, Diary, DiaryId, EntryId};

use crate::error::{DiaryError, Result};
use crate::propagation::RelationshipPropagator;

/// Permission-checked access to diaries, entries and invitations.
#[derive(Clone)]
pub struct DiaryService {
    store: Arc<SqliteStore>,
    oracle: SharedOracle,
    propagator: RelationshipPropagator,
    embedder: Option<SharedEmbedder>,
    retry: RetryPolicy,
    search: SearchConfig,
}

impl DiaryService {
    /// Create a service with no embedder, default retry policy and default
    /// search settings.
    pub fn new(
        store: Arc<SqliteStore>,
        oracle: SharedOracle,
        propagator: RelationshipPropagator,
    ) -> Self {
        Self {
            store,
            oracle,
            propagator,
            embedder: None,
            retry: RetryPolicy::default(),
            search: SearchConfig::default(),
        }
    }

    pub fn with_embedder(mut self, embedder: Option<SharedEmbedder>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_search_config(mut self, search: SearchConfig) -> Self {
        self.search = search;
        self
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    pub fn propagator(&self) -> &RelationshipPropagator {
        &self.propagator
    }

    /// Whether semantic search is available.
    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Plumbing
    // ─────────────────────────────────────────────────────────────────────

    /// Run `f` in a serializable transaction, retrying conflicts.
    ///
    /// `f` may run several times and must not have side effects outside
    /// the transaction.
    async fn transact<T, F>(&self, name: &str, mut f: F) -> Result<T>
    where
        F: FnMut(&Transaction<'_>) -> Result<T>,
    {
        let store = &self.store;
        with_conflict_retry(&self.retry, name, None, || {
            std::future::ready(store.run_in_transaction(name, &mut f))
        })
        .await
    }

    fn authenticate(&self, requester: &AgentId) -> Result<()> {
        if self.store.read(|c| c.agents().exists(*requester))? {
            Ok(())
        } else {
            debug!(agent_id = %requester, "Unknown requester");
            Err(DiaryError::Unauthorized)
        }
    }

    fn require_agent(&self, agent: &AgentId) -> Result<()> {
        if self.store.read(|c| c.agents().exists(*agent))? {
            Ok(())
        } else {
            Err(DiaryError::not_found(format!("agent {agent}")))
        }
    }

    fn find_diary(&self, id: DiaryId) -> Result<Diary> {
        self.store
            .read(|c| c.diaries().find_by_id(id))?
            .ok_or_else(|| DiaryError::not_found(format!("diary {id}")))
    }

    fn access_context(&self, id: EntryId) -> Result<Option<AccessContext>> {
        Ok(self.store.read(|c| c.entries().access_context(id))?)
    }

    async fn can_read(&self, diary: &Diary, requester: &AgentId) -> Result<bool> {
        if diary.is_owned_by(requester) || !diary.visibility.requires_permission_check() {
            return Ok(true);
        }
        Ok(self.oracle.can_read_diary(diary.id, requester).await?)
    }

    /// The diary, if the requester may read it. Otherwise NotFound, so the
    /// diary's existence is not revealed.
    async fn require_diary_read(&self, id: DiaryId, requester: &AgentId) -> Result<Diary> {
        let diary = self.find_diary(id)?;
        if self.can_read(&diary, requester).await? {
            Ok(diary)
        } else {
            Err(DiaryError::not_found(format!("diary {id}")))
        }
    }

    async fn require_diary_write(&self, id: DiaryId, requester: &AgentId) -> Result<Diary> {
        let diary = self.find_diary(id)?;
        if diary.is_owned_by(requester) || self.oracle.can_write_diary(id, requester).await? {
            return Ok(diary);
        }
        Err(self.denied(&diary, requester, "write to").await?)
    }

    async fn require_diary_manage(&self, id: DiaryId, requester: &AgentId) -> Result<Diary> {
        let diary = self.find_diary(id)?;
        if diary.is_owned_by(requester) || self.oracle.can_manage_diary(id, requester).await? {
            return Ok(diary);
        }
        Err(self.denied(&diary, requester, "manage").await?)
    }

    /// Forbidden for callers who can see the diary, NotFound for the rest.
    async fn denied(&self, diary: &Diary, requester: &AgentId, action: &str) -> Result<DiaryError> {
        if self.can_read(diary, requester).await? {
            Ok(DiaryError::forbidden(format!("may not {action} diary {}", diary.id)))
        } else {
            Ok(DiaryError::not_found(format!("diary {}", diary.id)))
        }
    }

    async fn can_view_entry(&self, ctx: &AccessContext, requester: &AgentId) -> Result<bool> {
        if ctx.owner_id == *requester || !ctx.visibility.requires_permission_check() {
            return Ok(true);
        }
        Ok(self.oracle.can_view_entry(ctx.entry_id, requester).await?)
    }

    async fn can_edit_entry(&self, ctx: &AccessContext, requester: &AgentId) -> Result<bool> {
        if ctx.owner_id == *requester {
            return Ok(true);
        }
        Ok(self.oracle.can_edit_entry(ctx.entry_id, requester).await?)
    }

    async fn can_delete_entry(&self, ctx: &AccessContext, requester: &AgentId) -> Result<bool> {
        if ctx.owner_id == *requester {
            return Ok(true);
        }
        Ok(self.oracle.can_delete_entry(ctx.entry_id, requester).await?)
    }

    async fn can_share_entry(&self, ctx: &AccessContext, requester: &AgentId) -> Result<bool> {
        if ctx.owner_id == *requester {
            return Ok(true);
        }
        Ok(self.oracle.can_share_entry(ctx.entry_id, requester).await?)
    }

    async fn embed_passage(&self, text: &str, entry_id: EntryId) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embedder.embed_passage(text).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                warn!(
                    entry_id = %entry_id,
                    error = %e,
                    "Passage embedding failed, storing without vector"
                );
                None
            }
        }
    }

    async fn embed_query(&self, query: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embedder.embed_query(query).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                warn!(error = %e, "Query embedding failed, falling back to lexical ranking");
                None
            }
        }
    }

    fn default_weights(&self) -> RankWeights {
        RankWeights {
            relevance: f64::from(self.search.relevance_weight),
            recency: f64::from(self.search.recency_weight),
            importance: f64::from(self.search.importance_weight),
        }
    }

    fn page_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.search.default_limit)
            .clamp(1, self.search.max_limit.max(1))
    }
}
