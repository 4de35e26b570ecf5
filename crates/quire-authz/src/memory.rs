//! In-process oracle.
//!
//! Evaluates the namespace rules directly against a tuple set. Used when no
//! external oracle is configured, and by tests that need to inspect what was
//! propagated.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::RwLock;

use quire_types::{AgentId, DiaryId};

use crate::error::{AuthzError, Result};
use crate::oracle::{Permission, PermissionOracle, RelationshipWriter};
use crate::tuple::{Namespace, Relation, RelationTuple, Subject, TupleQuery};

/// Tuple store with the same evaluation rules as the external oracle:
///
/// - diary `read`: owner, writer or reader
/// - diary `write`: owner or writer
/// - diary `manage`: owner
/// - entry `view`: entry owner, viewer, or anyone who can read the parent diary
/// - entry `edit`: entry owner (its author) or parent diary owner
/// - entry `delete` / `share`: parent diary owner
#[derive(Debug, Default)]
pub struct InMemoryOracle {
    tuples: RwLock<HashSet<RelationTuple>>,
}

impl InMemoryOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all stored tuples.
    pub fn tuples(&self) -> Vec<RelationTuple> {
        self.tuples.read().iter().cloned().collect()
    }

    pub fn contains(&self, tuple: &RelationTuple) -> bool {
        self.tuples.read().contains(tuple)
    }

    pub fn len(&self) -> usize {
        self.tuples.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.read().is_empty()
    }

    fn has(&self, namespace: Namespace, object: &str, relation: Relation, agent: &AgentId) -> bool {
        self.tuples.read().contains(&RelationTuple {
            namespace,
            object: object.to_string(),
            relation,
            subject: Subject::Agent(*agent),
        })
    }

    fn diary_has_any(&self, diary: &str, relations: &[Relation], agent: &AgentId) -> bool {
        relations
            .iter()
            .any(|r| self.has(Namespace::Diary, diary, *r, agent))
    }

    fn parent_diaries(&self, entry: &str) -> Result<Vec<String>> {
        let tuples = self.tuples.read();
        let mut parents = Vec::new();
        for tuple in tuples.iter() {
            if tuple.namespace == Namespace::DiaryEntry
                && tuple.object == entry
                && tuple.relation == Relation::Parent
            {
                match tuple.subject {
                    Subject::Diary(id) => parents.push(id.to_string()),
                    Subject::Agent(_) => {
                        return Err(AuthzError::InvalidTuple(tuple.to_string()));
                    }
                }
            }
        }
        Ok(parents)
    }

    fn entry_owner_or_diary(
        &self,
        entry: &str,
        agent: &AgentId,
        diary_relations: &[Relation],
    ) -> Result<bool> {
        if self.has(Namespace::DiaryEntry, entry, Relation::Owner, agent) {
            return Ok(true);
        }
        Ok(self
            .parent_diaries(entry)?
            .iter()
            .any(|d| self.diary_has_any(d, diary_relations, agent)))
    }

    fn evaluate(&self, permission: Permission, agent: &AgentId) -> Result<bool> {
        const READERS: &[Relation] = &[Relation::Owner, Relation::Writer, Relation::Reader];
        const WRITERS: &[Relation] = &[Relation::Owner, Relation::Writer];
        const OWNERS: &[Relation] = &[Relation::Owner];

        let object = permission.object();
        let allowed = match permission {
            Permission::ReadDiary(_) => self.diary_has_any(&object, READERS, agent),
            Permission::WriteDiary(_) => self.diary_has_any(&object, WRITERS, agent),
            Permission::ManageDiary(_) => self.diary_has_any(&object, OWNERS, agent),
            Permission::ViewEntry(_) => {
                self.has(Namespace::DiaryEntry, &object, Relation::Viewer, agent)
                    || self.entry_owner_or_diary(&object, agent, READERS)?
            }
            Permission::EditEntry(_) => self.entry_owner_or_diary(&object, agent, OWNERS)?,
            Permission::DeleteEntry(_) | Permission::ShareEntry(_) => self
                .parent_diaries(&object)?
                .iter()
                .any(|d| self.diary_has_any(d, OWNERS, agent)),
        };
        Ok(allowed)
    }

    /// Whether any tuple grants `agent` something on `diary`.
    pub fn has_diary_relation(&self, diary: DiaryId, agent: &AgentId) -> bool {
        let object = diary.to_string();
        [Relation::Owner, Relation::Writer, Relation::Reader]
            .iter()
            .any(|r| self.has(Namespace::Diary, &object, *r, agent))
    }
}

#[async_trait]
impl PermissionOracle for InMemoryOracle {
    async fn check(&self, permission: Permission, subject: &AgentId) -> Result<bool> {
        self.evaluate(permission, subject)
    }
}

#[async_trait]
impl RelationshipWriter for InMemoryOracle {
    async fn write(&self, tuples: &[RelationTuple]) -> Result<()> {
        let mut set = self.tuples.write();
        for tuple in tuples {
            set.insert(tuple.clone());
        }
        tracing::trace!(count = tuples.len(), "Wrote relation tuples");
        Ok(())
    }

    async fn delete(&self, query: &TupleQuery) -> Result<()> {
        let mut set = self.tuples.write();
        let before = set.len();
        set.retain(|t| !query.matches(t));
        tracing::trace!(removed = before - set.len(), "Deleted relation tuples");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::PermissionOracleExt;
    use quire_types::EntryId;

    #[tokio::test]
    async fn test_diary_roles() {
        let oracle = InMemoryOracle::new();
        let diary = DiaryId::new();
        let owner = AgentId::new();
        let writer = AgentId::new();
        let reader = AgentId::new();
        let stranger = AgentId::new();

        oracle
            .write(&[
                RelationTuple::diary(diary, Relation::Owner, owner),
                RelationTuple::diary(diary, Relation::Writer, writer),
                RelationTuple::diary(diary, Relation::Reader, reader),
            ])
            .await
            .unwrap();

        assert!(oracle.can_manage_diary(diary, &owner).await.unwrap());
        assert!(!oracle.can_manage_diary(diary, &writer).await.unwrap());
        assert!(oracle.can_write_diary(diary, &writer).await.unwrap());
        assert!(!oracle.can_write_diary(diary, &reader).await.unwrap());
        assert!(oracle.can_read_diary(diary, &reader).await.unwrap());
        assert!(!oracle.can_read_diary(diary, &stranger).await.unwrap());
    }

    #[tokio::test]
    async fn test_entry_inherits_from_parent_diary() {
        let oracle = InMemoryOracle::new();
        let diary = DiaryId::new();
        let entry = EntryId::new();
        let owner = AgentId::new();
        let reader = AgentId::new();
        let viewer = AgentId::new();

        oracle
            .write(&[
                RelationTuple::diary(diary, Relation::Owner, owner),
                RelationTuple::diary(diary, Relation::Reader, reader),
                RelationTuple::entry_parent(entry, diary),
                RelationTuple::entry(entry, Relation::Viewer, viewer),
            ])
            .await
            .unwrap();

        // Diary owner controls entries without an explicit entry tuple.
        assert!(oracle.can_edit_entry(entry, &owner).await.unwrap());
        assert!(oracle.can_share_entry(entry, &owner).await.unwrap());
        assert!(oracle.can_view_entry(entry, &reader).await.unwrap());
        assert!(!oracle.can_edit_entry(entry, &reader).await.unwrap());
        assert!(oracle.can_view_entry(entry, &viewer).await.unwrap());
        assert!(!oracle.can_delete_entry(entry, &viewer).await.unwrap());
    }

    #[tokio::test]
    async fn test_entry_author_edits_but_cannot_delete_or_share() {
        let oracle = InMemoryOracle::new();
        let diary = DiaryId::new();
        let entry = EntryId::new();
        let owner = AgentId::new();
        let author = AgentId::new();

        oracle
            .write(&[
                RelationTuple::diary(diary, Relation::Owner, owner),
                RelationTuple::diary(diary, Relation::Writer, author),
                RelationTuple::entry_parent(entry, diary),
                RelationTuple::entry(entry, Relation::Owner, author),
            ])
            .await
            .unwrap();

        assert!(oracle.can_edit_entry(entry, &author).await.unwrap());
        assert!(!oracle.can_delete_entry(entry, &author).await.unwrap());
        assert!(!oracle.can_share_entry(entry, &author).await.unwrap());
        assert!(oracle.can_delete_entry(entry, &owner).await.unwrap());
        assert!(oracle.can_share_entry(entry, &owner).await.unwrap());
    }

    #[tokio::test]
    async fn test_write_and_delete_are_idempotent() {
        let oracle = InMemoryOracle::new();
        let diary = DiaryId::new();
        let agent = AgentId::new();
        let tuple = RelationTuple::diary(diary, Relation::Reader, agent);

        oracle.write(&[tuple.clone()]).await.unwrap();
        oracle.write(&[tuple.clone()]).await.unwrap();
        assert_eq!(oracle.len(), 1);

        let query = TupleQuery::object(Namespace::Diary, diary.to_string());
        oracle.delete(&query).await.unwrap();
        oracle.delete(&query).await.unwrap();
        assert!(oracle.is_empty());
    }

    #[tokio::test]
    async fn test_delete_by_subject_leaves_others() {
        let oracle = InMemoryOracle::new();
        let diary = DiaryId::new();
        let alice = AgentId::new();
        let bob = AgentId::new();

        oracle
            .write(&[
                RelationTuple::diary(diary, Relation::Reader, alice),
                RelationTuple::diary(diary, Relation::Reader, bob),
            ])
            .await
            .unwrap();

        oracle
            .delete(
                &TupleQuery::object(Namespace::Diary, diary.to_string())
                    .with_subject(Subject::Agent(alice)),
            )
            .await
            .unwrap();

        assert!(!oracle.has_diary_relation(diary, &alice));
        assert!(oracle.has_diary_relation(diary, &bob));
    }
}
