//! Diary entry types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;
use crate::{DiaryId, EntryId, Timestamp};

/// Lowest accepted importance score.
pub const MIN_IMPORTANCE: u8 = 1;
/// Highest accepted importance score.
pub const MAX_IMPORTANCE: u8 = 10;
/// Importance assigned when the caller gives none.
pub const DEFAULT_IMPORTANCE: u8 = 5;

/// Kind of memory an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// Facts and knowledge.
    #[default]
    Semantic,
    /// Things that happened.
    Episodic,
    /// How to do something.
    Procedural,
    /// Output of a reflection pass.
    Reflection,
    /// Statements about the agent itself.
    Identity,
    /// Core values and personality.
    Soul,
}

impl EntryType {
    pub const ALL: [EntryType; 6] = [
        Self::Semantic,
        Self::Episodic,
        Self::Procedural,
        Self::Reflection,
        Self::Identity,
        Self::Soul,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Episodic => "episodic",
            Self::Procedural => "procedural",
            Self::Reflection => "reflection",
            Self::Identity => "identity",
            Self::Soul => "soul",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("entry type", s))
    }
}

/// A single content record within a diary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub diary_id: DiaryId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: String,
    /// Passage embedding, absent when the provider was unavailable.
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub importance: u8,
    pub access_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_accessed_at: Option<Timestamp>,
    pub entry_type: EntryType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<EntryId>,
    /// Heuristic flag: content looks like a prompt-injection attempt.
    pub injection_risk: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Entry {
    /// Build a new entry with defaults for everything but the content.
    pub fn new(diary_id: DiaryId, content: impl Into<String>) -> Self {
        let now = crate::now();
        Self {
            id: EntryId::new(),
            diary_id,
            title: None,
            content: content.into(),
            embedding: None,
            tags: Vec::new(),
            importance: DEFAULT_IMPORTANCE,
            access_count: 0,
            last_accessed_at: None,
            entry_type: EntryType::default(),
            superseded_by: None,
            injection_risk: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = crate::normalize_tags(tags);
        self
    }

    pub fn with_importance(mut self, importance: u8) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_entry_type(mut self, entry_type: EntryType) -> Self {
        self.entry_type = entry_type;
        self
    }

    pub fn is_superseded(&self) -> bool {
        self.superseded_by.is_some()
    }

    /// Text the passage embedding is computed from.
    pub fn embedding_text(&self) -> String {
        crate::build_embedding_text(&self.content, &self.tags, self.title.as_deref())
    }
}

/// One entry as it appears in a digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestEntry {
    pub id: EntryId,
    pub content: String,
    pub tags: Vec<String>,
    pub importance: u8,
    pub entry_type: EntryType,
    pub created_at: Timestamp,
}

impl From<Entry> for DigestEntry {
    fn from(entry: Entry) -> Self {
        Self {
            id: entry.id,
            content: entry.content,
            tags: entry.tags,
            importance: entry.importance,
            entry_type: entry.entry_type,
            created_at: entry.created_at,
        }
    }
}

/// Time-windowed summary of recent, non-superseded entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Digest {
    pub entries: Vec<DigestEntry>,
    pub total_entries: usize,
    pub period_days: u32,
    pub generated_at: Timestamp,
}

impl Digest {
    pub fn new(entries: Vec<DigestEntry>, period_days: u32) -> Self {
        Self {
            total_entries: entries.len(),
            entries,
            period_days,
            generated_at: crate::now(),
        }
    }
}
