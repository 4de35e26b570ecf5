//! Entry operations: create, read, update, delete, share, list, search,
//! reflect.

use tracing::{debug, info, warn};

use quire_store::{Repositories, ScoredEntry, SearchParams};
use quire_types::entry::DEFAULT_IMPORTANCE;
use quire_types::{
    AgentId, Digest, Entry, EntryGrant, EntryId, build_embedding_text, detect_injection_risk,
};

use super::DiaryService;
use crate::error::{DiaryError, Result};
use crate::requests::{
    EntryPatch, ListRequest, MAX_REFLECT_DAYS, NewEntry, ReflectRequest, SearchRequest,
};
use crate::validation::{validate_content, validate_importance, validate_tags, validate_title};

impl DiaryService {
    /// Create an entry in a diary the requester may write to.
    ///
    /// The embedding is computed before the transaction opens; if the
    /// provider fails the entry is stored without one. Ownership and parent
    /// relations are enqueued in the same transaction and settled after
    /// commit.
    pub async fn create(&self, requester: &AgentId, input: NewEntry) -> Result<Entry> {
        self.authenticate(requester)?;
        let content = validate_content(&input.content)?;
        let title = validate_title(input.title.as_deref())?;
        let tags = validate_tags(&input.tags)?;
        let importance = validate_importance(input.importance.unwrap_or(DEFAULT_IMPORTANCE))?;

        self.require_diary_write(input.diary_id, requester).await?;

        let mut entry = Entry::new(input.diary_id, content)
            .with_tags(tags)
            .with_importance(importance)
            .with_entry_type(input.entry_type.unwrap_or_default());
        entry.title = title;
        entry.injection_risk = detect_injection_risk(&entry.content, entry.title.as_deref());
        if entry.injection_risk {
            warn!(entry_id = %entry.id, "Entry content flagged for injection risk");
        }
        entry.embedding = self.embed_passage(&entry.embedding_text(), entry.id).await;

        let pending = self
            .transact("create_entry", |tx| {
                tx.entries().create(&entry)?;
                let owner = self.propagator.grant_ownership(tx, entry.id, *requester)?;
                let parent = self.propagator.link_entry(tx, entry.id, entry.diary_id)?;
                Ok(owner.merge(parent))
            })
            .await?;
        self.propagator.settle(pending).await;

        info!(
            entry_id = %entry.id,
            embedded = entry.embedding.is_some(),
            "Entry created"
        );
        Ok(entry)
    }

    /// Fetch an entry. `None` when it is missing or the requester may not
    /// view it.
    pub async fn get_by_id(&self, id: EntryId, requester: &AgentId) -> Result<Option<Entry>> {
        self.authenticate(requester)?;
        let Some(ctx) = self.access_context(id)? else {
            return Ok(None);
        };
        if !self.can_view_entry(&ctx, requester).await? {
            debug!(entry_id = %id, "View denied");
            return Ok(None);
        }

        let now = quire_types::now();
        if let Err(e) = self
            .store
            .run_in_transaction("record_access", |tx| tx.entries().record_access(id, now))
        {
            warn!(entry_id = %id, error = %e, "Failed to record entry access");
        }
        Ok(self.store.read(|c| c.entries().find_by_id(id))?)
    }

    /// Apply a patch. `None` when the entry is missing or the requester may
    /// not edit it.
    ///
    /// The embedding is regenerated only when the text it is built from
    /// changes. A failed regeneration clears the stored vector rather than
    /// leaving a stale one.
    pub async fn update(
        &self,
        id: EntryId,
        requester: &AgentId,
        patch: EntryPatch,
    ) -> Result<Option<Entry>> {
        self.authenticate(requester)?;
        let Some(ctx) = self.access_context(id)? else {
            return Ok(None);
        };
        if !self.can_edit_entry(&ctx, requester).await? {
            debug!(entry_id = %id, "Edit denied");
            return Ok(None);
        }

        let content = patch.content.as_deref().map(validate_content).transpose()?;
        let title = match &patch.title {
            Some(title) => Some(validate_title(title.as_deref())?),
            None => None,
        };
        let tags = patch.tags.as_deref().map(validate_tags).transpose()?;
        let importance = patch.importance.map(validate_importance).transpose()?;
        if patch.superseded_by == Some(Some(id)) {
            return Err(DiaryError::validation("an entry cannot supersede itself"));
        }

        // Outer None keeps the stored vector; Some(None) clears it.
        let mut new_embedding: Option<Option<Vec<f32>>> = None;
        if patch.touches_embedding_text() {
            let Some(prior) = self.store.read(|c| c.entries().find_by_id(id))? else {
                return Ok(None);
            };
            let text = build_embedding_text(
                content.as_deref().unwrap_or(&prior.content),
                tags.as_deref().unwrap_or(&prior.tags),
                match &title {
                    Some(title) => title.as_deref(),
                    None => prior.title.as_deref(),
                },
            );
            if text != prior.embedding_text() {
                new_embedding = Some(self.embed_passage(&text, id).await);
            }
        }

        let updated = self
            .transact("update_entry", |tx| {
                let Some(mut entry) = tx.entries().find_by_id(id)? else {
                    return Ok(None);
                };
                if let Some(Some(successor)) = patch.superseded_by {
                    let same_diary = tx
                        .entries()
                        .find_by_id(successor)?
                        .is_some_and(|s| s.diary_id == entry.diary_id);
                    if !same_diary {
                        return Err(DiaryError::validation(format!(
                            "superseding entry {successor} is not in the same diary"
                        )));
                    }
                }

                if let Some(content) = &content {
                    entry.content = content.clone();
                }
                if let Some(title) = &title {
                    entry.title = title.clone();
                }
                if let Some(tags) = &tags {
                    entry.tags = tags.clone();
                }
                if let Some(importance) = importance {
                    entry.importance = importance;
                }
                if let Some(entry_type) = patch.entry_type {
                    entry.entry_type = entry_type;
                }
                if let Some(superseded_by) = patch.superseded_by {
                    entry.superseded_by = superseded_by;
                }
                if let Some(embedding) = &new_embedding {
                    entry.embedding = embedding.clone();
                }
                entry.injection_risk =
                    detect_injection_risk(&entry.content, entry.title.as_deref());
                entry.updated_at = quire_types::now();

                tx.entries().update(&entry)?;
                Ok(Some(entry))
            })
            .await?;

        if let Some(entry) = &updated {
            info!(
                entry_id = %entry.id,
                reembedded = new_embedding.is_some(),
                "Entry updated"
            );
        }
        Ok(updated)
    }

    /// Mark `old_id` as superseded by `new_id`. Both must live in the same
    /// diary and be editable by the requester.
    pub async fn supersede(
        &self,
        old_id: EntryId,
        new_id: EntryId,
        requester: &AgentId,
    ) -> Result<Entry> {
        self.authenticate(requester)?;
        if old_id == new_id {
            return Err(DiaryError::validation("an entry cannot supersede itself"));
        }
        let (Some(old), Some(new)) = (self.access_context(old_id)?, self.access_context(new_id)?)
        else {
            return Err(DiaryError::not_found("entry"));
        };
        if !self.can_edit_entry(&old, requester).await? {
            return Err(DiaryError::not_found(format!("entry {old_id}")));
        }
        if !self.can_edit_entry(&new, requester).await? {
            return Err(DiaryError::not_found(format!("entry {new_id}")));
        }
        if old.diary_id != new.diary_id {
            return Err(DiaryError::validation("entries belong to different diaries"));
        }

        self.update(old_id, requester, EntryPatch::new().superseded_by(Some(new_id)))
            .await?
            .ok_or_else(|| DiaryError::not_found(format!("entry {old_id}")))
    }

    /// Delete an entry. Returns false when it is missing or the requester
    /// may not delete it.
    pub async fn delete(&self, id: EntryId, requester: &AgentId) -> Result<bool> {
        self.authenticate(requester)?;
        let Some(ctx) = self.access_context(id)? else {
            return Ok(false);
        };
        if !self.can_delete_entry(&ctx, requester).await? {
            debug!(entry_id = %id, "Delete denied");
            return Ok(false);
        }

        let pending = self
            .transact("delete_entry", |tx| {
                if !tx.entries().delete(id)? {
                    return Ok(None);
                }
                Ok(Some(self.propagator.remove_entry_relations(tx, id)?))
            })
            .await?;

        match pending {
            Some(pending) => {
                self.propagator.settle(pending).await;
                info!(entry_id = %id, "Entry deleted");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Give `target` view access to a single entry.
    ///
    /// Returns true when the grant is new. Sharing again is a no-op locally
    /// but re-sends the viewer grant to the oracle.
    pub async fn share(&self, id: EntryId, requester: &AgentId, target: &AgentId) -> Result<bool> {
        self.authenticate(requester)?;
        let Some(ctx) = self.access_context(id)? else {
            return Err(DiaryError::not_found(format!("entry {id}")));
        };
        if !self.can_share_entry(&ctx, requester).await? {
            return Err(if self.can_view_entry(&ctx, requester).await? {
                DiaryError::forbidden(format!("may not share entry {id}"))
            } else {
                DiaryError::not_found(format!("entry {id}"))
            });
        }
        if target == requester {
            return Err(DiaryError::validation("cannot share an entry with yourself"));
        }
        self.require_agent(target)?;

        let grant = EntryGrant {
            entry_id: id,
            shared_with: *target,
            shared_by: *requester,
            created_at: quire_types::now(),
        };
        let (created, pending) = self
            .transact("share_entry", |tx| {
                let created = tx.entry_grants().upsert(&grant)?;
                let pending = self.propagator.grant_viewer(tx, id, *target)?;
                Ok((created, pending))
            })
            .await?;
        self.propagator.settle(pending).await;

        info!(entry_id = %id, shared_with = %target, created, "Entry shared");
        Ok(created)
    }

    /// Entries in a diary, newest first.
    pub async fn list(&self, requester: &AgentId, request: ListRequest) -> Result<Vec<Entry>> {
        self.authenticate(requester)?;
        self.require_diary_read(request.diary_id, requester).await?;
        let limit = self.page_limit(request.limit);
        let filter = request.filter();
        Ok(self
            .store
            .read(|c| c.entries().list(&filter, limit, request.offset))?)
    }

    /// Ranked search over a diary.
    ///
    /// With a query and an embedder, relevance is cosine similarity. If the
    /// query cannot be embedded the search still runs on lexical relevance.
    pub async fn search(
        &self,
        requester: &AgentId,
        request: SearchRequest,
    ) -> Result<Vec<ScoredEntry>> {
        self.authenticate(requester)?;
        self.require_diary_read(request.diary_id, requester).await?;

        let mut params = SearchParams::new(request.filter())
            .with_weights(request.weights.unwrap_or_else(|| self.default_weights()))
            .with_half_life_days(f64::from(self.search.recency_half_life_days))
            .with_page(self.page_limit(request.limit), request.offset);
        if let Some(query) = request.effective_query() {
            let embedding = self.embed_query(query).await;
            params = params.with_query(query).with_query_embedding(embedding);
        }

        let results = self.store.read(|c| c.entries().search(&params))?;
        debug!(
            results = results.len(),
            semantic = params.query_embedding.is_some(),
            "Search complete"
        );
        Ok(results)
    }

    /// Digest of recent, non-superseded entries.
    pub async fn reflect(&self, requester: &AgentId, request: ReflectRequest) -> Result<Digest> {
        self.authenticate(requester)?;
        if request.days == 0 || request.days > MAX_REFLECT_DAYS {
            return Err(DiaryError::validation(format!(
                "days must be between 1 and {MAX_REFLECT_DAYS}"
            )));
        }
        self.require_diary_read(request.diary_id, requester).await?;

        let max_entries = request.max_entries.min(self.search.max_limit);
        let entries = self.store.read(|c| {
            c.entries().get_recent_for_digest(
                request.diary_id,
                request.days,
                max_entries,
                &request.entry_types,
            )
        })?;
        Ok(Digest::new(
            entries.into_iter().map(Into::into).collect(),
            request.days,
        ))
    }
}
