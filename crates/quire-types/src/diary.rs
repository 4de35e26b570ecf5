//! Diary catalog types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;
use crate::{AgentId, DiaryId, Timestamp};

/// Key of the diary every agent owns and can never delete.
pub const PRIVATE_DIARY_KEY: &str = "private";

/// Maximum length of a diary key.
pub const MAX_KEY_LEN: usize = 64;

/// Who may read a diary without an explicit grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Only the owner and agents holding a grant.
    #[default]
    Private,
    /// Any registered agent.
    Network,
    /// Anyone.
    Public,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Network => "network",
            Self::Public => "public",
        }
    }

    /// Whether reading content under this visibility needs an oracle check.
    pub fn requires_permission_check(&self) -> bool {
        match self {
            Self::Private => true,
            Self::Network | Self::Public => false,
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Self::Private),
            "network" => Ok(Self::Network),
            "public" => Ok(Self::Public),
            other => Err(ParseEnumError::new("visibility", other)),
        }
    }
}

/// A named, owned collection of entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diary {
    pub id: DiaryId,
    pub owner_id: AgentId,
    /// Slug, unique per owner.
    pub key: String,
    pub name: String,
    pub visibility: Visibility,
    pub signed: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Diary {
    /// Build a new diary owned by `owner_id`.
    pub fn new(
        owner_id: AgentId,
        key: impl Into<String>,
        name: impl Into<String>,
        visibility: Visibility,
    ) -> Self {
        let now = crate::now();
        Self {
            id: DiaryId::new(),
            owner_id,
            key: key.into(),
            name: name.into(),
            visibility,
            signed: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// The default private diary provisioned for every agent.
    pub fn private_for(owner_id: AgentId) -> Self {
        Self::new(owner_id, PRIVATE_DIARY_KEY, "Private", Visibility::Private)
    }

    pub fn is_private_default(&self) -> bool {
        self.key == PRIVATE_DIARY_KEY
    }

    pub fn is_owned_by(&self, agent: &AgentId) -> bool {
        self.owner_id == *agent
    }

    /// Check the slug format: lowercase ASCII letters, digits, `-` and `_`,
    /// starting with a letter or digit.
    pub fn is_valid_key(key: &str) -> bool {
        let mut chars = key.chars();
        let Some(first) = chars.next() else {
            return false;
        };
        key.len() <= MAX_KEY_LEN
            && (first.is_ascii_lowercase() || first.is_ascii_digit())
            && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_parse() {
        assert_eq!("network".parse::<Visibility>().unwrap(), Visibility::Network);
        let err = "friends".parse::<Visibility>().unwrap_err();
        assert_eq!(err.kind, "visibility");
    }

    #[test]
    fn test_visibility_check_shortcut() {
        assert!(Visibility::Private.requires_permission_check());
        assert!(!Visibility::Network.requires_permission_check());
        assert!(!Visibility::Public.requires_permission_check());
    }

    #[test]
    fn test_key_format() {
        assert!(Diary::is_valid_key("private"));
        assert!(Diary::is_valid_key("work-notes_2"));
        assert!(Diary::is_valid_key("9lives"));
        assert!(!Diary::is_valid_key(""));
        assert!(!Diary::is_valid_key("-leading"));
        assert!(!Diary::is_valid_key("Upper"));
        assert!(!Diary::is_valid_key("has space"));
        assert!(!Diary::is_valid_key(&"a".repeat(MAX_KEY_LEN + 1)));
    }

    #[test]
    fn test_private_default() {
        let owner = AgentId::new();
        let diary = Diary::private_for(owner);
        assert!(diary.is_private_default());
        assert!(diary.is_owned_by(&owner));
        assert_eq!(diary.visibility, Visibility::Private);
    }
}
