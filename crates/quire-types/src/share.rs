//! Sharing and invitation types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;
use crate::{AgentId, DiaryId, EntryId, ShareId, Timestamp};

/// Access level an invitation grants once accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareRole {
    /// List and read entries.
    Reader,
    /// List, read and create entries. Never manage, delete or invite.
    Writer,
}

impl ShareRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reader => "reader",
            Self::Writer => "writer",
        }
    }
}

impl fmt::Display for ShareRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShareRole {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reader" => Ok(Self::Reader),
            "writer" => Ok(Self::Writer),
            other => Err(ParseEnumError::new("share role", other)),
        }
    }
}

/// Lifecycle state of an invitation.
///
/// ```text
/// pending ──► accepted ──► revoked
///    │
///    ├──► declined
///    └──► revoked
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareStatus {
    Pending,
    Accepted,
    Declined,
    Revoked,
}

impl ShareStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Revoked => "revoked",
        }
    }

    /// Active records block a second invitation for the same pair.
    pub fn is_active(&self) -> bool {
        match self {
            Self::Pending | Self::Accepted => true,
            Self::Declined | Self::Revoked => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Declined | Self::Revoked => true,
            Self::Pending | Self::Accepted => false,
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: ShareStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Accepted | Self::Declined | Self::Revoked) => true,
            (Self::Accepted, Self::Revoked) => true,
            (Self::Pending, Self::Pending)
            | (Self::Accepted, Self::Pending | Self::Accepted | Self::Declined)
            | (Self::Declined | Self::Revoked, _) => false,
        }
    }
}

impl fmt::Display for ShareStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShareStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "declined" => Ok(Self::Declined),
            "revoked" => Ok(Self::Revoked),
            other => Err(ParseEnumError::new("share status", other)),
        }
    }
}

/// An invitation to a diary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Share {
    pub id: ShareId,
    pub diary_id: DiaryId,
    pub shared_with: AgentId,
    pub role: ShareRole,
    pub status: ShareStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Share {
    /// A fresh pending invitation.
    pub fn pending(diary_id: DiaryId, shared_with: AgentId, role: ShareRole) -> Self {
        let now = crate::now();
        Self {
            id: ShareId::new(),
            diary_id,
            shared_with,
            role,
            status: ShareStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A direct view grant on a single entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryGrant {
    pub entry_id: EntryId,
    pub shared_with: AgentId,
    pub shared_by: AgentId,
    pub created_at: Timestamp,
}
