//! Oracle traits: permission checks and relationship writes.

use std::sync::Arc;

use async_trait::async_trait;

use quire_types::{AgentId, DiaryId, EntryId};

use crate::error::Result;
use crate::tuple::{Namespace, RelationTuple, TupleQuery};

/// A question the oracle can answer, bound to its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ViewEntry(EntryId),
    EditEntry(EntryId),
    DeleteEntry(EntryId),
    ShareEntry(EntryId),
    ReadDiary(DiaryId),
    WriteDiary(DiaryId),
    ManageDiary(DiaryId),
}

impl Permission {
    pub fn namespace(&self) -> Namespace {
        match self {
            Self::ViewEntry(_)
            | Self::EditEntry(_)
            | Self::DeleteEntry(_)
            | Self::ShareEntry(_) => Namespace::DiaryEntry,
            Self::ReadDiary(_) | Self::WriteDiary(_) | Self::ManageDiary(_) => Namespace::Diary,
        }
    }

    /// Object id as the oracle stores it.
    pub fn object(&self) -> String {
        match self {
            Self::ViewEntry(id)
            | Self::EditEntry(id)
            | Self::DeleteEntry(id)
            | Self::ShareEntry(id) => id.to_string(),
            Self::ReadDiary(id) | Self::WriteDiary(id) | Self::ManageDiary(id) => id.to_string(),
        }
    }

    /// Permission name in the oracle's namespace configuration.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ViewEntry(_) => "view",
            Self::EditEntry(_) => "edit",
            Self::DeleteEntry(_) => "delete",
            Self::ShareEntry(_) => "share",
            Self::ReadDiary(_) => "read",
            Self::WriteDiary(_) => "write",
            Self::ManageDiary(_) => "manage",
        }
    }
}

/// Answers access questions. Holds the ground truth of who may do what.
#[async_trait]
pub trait PermissionOracle: Send + Sync {
    async fn check(&self, permission: Permission, subject: &AgentId) -> Result<bool>;
}

/// Named checks on top of [`PermissionOracle::check`].
#[async_trait]
pub trait PermissionOracleExt: PermissionOracle {
    async fn can_view_entry(&self, entry: EntryId, agent: &AgentId) -> Result<bool> {
        self.check(Permission::ViewEntry(entry), agent).await
    }

    async fn can_edit_entry(&self, entry: EntryId, agent: &AgentId) -> Result<bool> {
        self.check(Permission::EditEntry(entry), agent).await
    }

    async fn can_delete_entry(&self, entry: EntryId, agent: &AgentId) -> Result<bool> {
        self.check(Permission::DeleteEntry(entry), agent).await
    }

    async fn can_share_entry(&self, entry: EntryId, agent: &AgentId) -> Result<bool> {
        self.check(Permission::ShareEntry(entry), agent).await
    }

    async fn can_read_diary(&self, diary: DiaryId, agent: &AgentId) -> Result<bool> {
        self.check(Permission::ReadDiary(diary), agent).await
    }

    async fn can_write_diary(&self, diary: DiaryId, agent: &AgentId) -> Result<bool> {
        self.check(Permission::WriteDiary(diary), agent).await
    }

    async fn can_manage_diary(&self, diary: DiaryId, agent: &AgentId) -> Result<bool> {
        self.check(Permission::ManageDiary(diary), agent).await
    }
}

impl<T: PermissionOracle + ?Sized> PermissionOracleExt for T {}

/// Mutates oracle state. Both operations must be idempotent: writing an
/// existing tuple or deleting a missing one succeeds without change.
#[async_trait]
pub trait RelationshipWriter: Send + Sync {
    async fn write(&self, tuples: &[RelationTuple]) -> Result<()>;

    async fn delete(&self, query: &TupleQuery) -> Result<()>;
}

pub type SharedOracle = Arc<dyn PermissionOracle>;
pub type SharedWriter = Arc<dyn RelationshipWriter>;
