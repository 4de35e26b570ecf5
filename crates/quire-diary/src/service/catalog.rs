//! Agent registration and diary catalog operations.

use tracing::info;

use quire_store::{Repositories, StoreError};
use quire_types::{Agent, AgentId, Diary, DiaryId, Visibility};

use super::DiaryService;
use crate::error::{DiaryError, Result};
use crate::requests::DiaryPatch;
use crate::validation::{validate_name, validate_new_key};

impl DiaryService {
    /// Register an agent together with its `private` diary.
    pub async fn register_agent(&self, display_name: &str) -> Result<(Agent, Diary)> {
        let display_name = validate_name(display_name)?;
        let agent = Agent::new(display_name);
        let diary = Diary::private_for(agent.id);

        let pending = self
            .transact("register_agent", |tx| {
                tx.agents().create(&agent)?;
                tx.diaries().create(&diary)?;
                self.propagator.grant_diary_owner(tx, diary.id, agent.id)
            })
            .await?;
        self.propagator.settle(pending).await;

        info!(agent_id = %agent.id, diary_id = %diary.id, "Agent registered");
        Ok((agent, diary))
    }

    /// Create an additional diary. Keys are unique per owner and `private`
    /// is reserved.
    pub async fn create_diary(
        &self,
        owner: &AgentId,
        key: &str,
        name: &str,
        visibility: Visibility,
    ) -> Result<Diary> {
        self.authenticate(owner)?;
        validate_new_key(key)?;
        let name = validate_name(name)?;
        let diary = Diary::new(*owner, key, name, visibility);

        let pending = self
            .transact("create_diary", |tx| {
                tx.diaries().create(&diary).map_err(|e| match e {
                    StoreError::Duplicate(_) => {
                        DiaryError::validation(format!("diary key '{key}' already exists"))
                    }
                    other => other.into(),
                })?;
                self.propagator.grant_diary_owner(tx, diary.id, *owner)
            })
            .await?;
        self.propagator.settle(pending).await;

        info!(diary_id = %diary.id, key, visibility = %visibility, "Diary created");
        Ok(diary)
    }

    pub async fn get_diary(&self, id: DiaryId, requester: &AgentId) -> Result<Diary> {
        self.authenticate(requester)?;
        self.require_diary_read(id, requester).await
    }

    /// Diaries owned by `owner`, oldest first.
    pub async fn list_diaries(&self, owner: &AgentId) -> Result<Vec<Diary>> {
        self.authenticate(owner)?;
        Ok(self.store.read(|c| c.diaries().list_by_owner(*owner))?)
    }

    /// Rename a diary or change its visibility. The `private` diary keeps
    /// its visibility.
    pub async fn update_diary(
        &self,
        id: DiaryId,
        requester: &AgentId,
        patch: DiaryPatch,
    ) -> Result<Diary> {
        self.authenticate(requester)?;
        let diary = self.require_diary_manage(id, requester).await?;
        let name = patch.name.as_deref().map(validate_name).transpose()?;
        if diary.is_private_default()
            && patch.visibility.is_some_and(|v| v != diary.visibility)
        {
            return Err(DiaryError::validation(
                "the private diary's visibility cannot change",
            ));
        }

        let updated = self
            .transact("update_diary", |tx| {
                let mut diary = tx
                    .diaries()
                    .find_by_id(id)?
                    .ok_or_else(|| DiaryError::not_found(format!("diary {id}")))?;
                if let Some(name) = &name {
                    diary.name = name.clone();
                }
                if let Some(visibility) = patch.visibility {
                    diary.visibility = visibility;
                }
                diary.updated_at = quire_types::now();
                tx.diaries().update(&diary)?;
                Ok(diary)
            })
            .await?;

        info!(diary_id = %id, visibility = %updated.visibility, "Diary updated");
        Ok(updated)
    }

    /// Delete a diary with its entries, invitations and grants, then remove
    /// every relation the oracle holds for them.
    pub async fn delete_diary(&self, id: DiaryId, requester: &AgentId) -> Result<()> {
        self.authenticate(requester)?;
        let diary = self.require_diary_manage(id, requester).await?;
        if diary.is_private_default() {
            return Err(DiaryError::validation("the private diary cannot be deleted"));
        }

        let (pending, entries) = self
            .transact("delete_diary", |tx| {
                let entry_ids = tx.entries().ids_in_diary(id)?;
                if !tx.diaries().delete(id)? {
                    return Err(DiaryError::not_found(format!("diary {id}")));
                }
                let count = entry_ids.len();
                let pending = self.propagator.remove_diary_relations(tx, id, entry_ids)?;
                Ok((pending, count))
            })
            .await?;
        self.propagator.settle(pending).await;

        info!(diary_id = %id, entries, "Diary deleted");
        Ok(())
    }
}
