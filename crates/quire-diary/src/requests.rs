//! Request types for diary service operations.

use serde::{Deserialize, Serialize};

use quire_store::{EntryFilter, RankWeights};
use quire_types::{DiaryId, EntryId, EntryType, Visibility};

pub const DEFAULT_REFLECT_DAYS: u32 = 7;
pub const DEFAULT_REFLECT_MAX_ENTRIES: usize = 50;
/// Longest digest window, about a century.
pub const MAX_REFLECT_DAYS: u32 = 36_500;

/// Input for [`crate::DiaryService::create`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntry {
    pub diary_id: DiaryId,
    pub content: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub importance: Option<u8>,
    #[serde(default)]
    pub entry_type: Option<EntryType>,
}

impl NewEntry {
    pub fn new(diary_id: DiaryId, content: impl Into<String>) -> Self {
        Self {
            diary_id,
            content: content.into(),
            title: None,
            tags: Vec::new(),
            importance: None,
            entry_type: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_importance(mut self, importance: u8) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn with_entry_type(mut self, entry_type: EntryType) -> Self {
        self.entry_type = Some(entry_type);
        self
    }
}

/// Partial update of an entry. `None` leaves a field untouched; the nested
/// options on `title` and `superseded_by` allow clearing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryPatch {
    pub content: Option<String>,
    pub title: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    pub importance: Option<u8>,
    pub entry_type: Option<EntryType>,
    pub superseded_by: Option<Option<EntryId>>,
}

impl EntryPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn title(mut self, title: Option<String>) -> Self {
        self.title = Some(title);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn importance(mut self, importance: u8) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn entry_type(mut self, entry_type: EntryType) -> Self {
        self.entry_type = Some(entry_type);
        self
    }

    pub fn superseded_by(mut self, id: Option<EntryId>) -> Self {
        self.superseded_by = Some(id);
        self
    }

    /// Whether the patch touches content, title or tags.
    pub fn touches_embedding_text(&self) -> bool {
        self.content.is_some() || self.title.is_some() || self.tags.is_some()
    }

    pub fn is_empty(&self) -> bool {
        !self.touches_embedding_text()
            && self.importance.is_none()
            && self.entry_type.is_none()
            && self.superseded_by.is_none()
    }
}

/// Filters and paging for [`crate::DiaryService::list`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListRequest {
    pub diary_id: DiaryId,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub entry_types: Vec<EntryType>,
    #[serde(default)]
    pub exclude_superseded: bool,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

impl ListRequest {
    pub fn new(diary_id: DiaryId) -> Self {
        Self {
            diary_id,
            tags: Vec::new(),
            entry_types: Vec::new(),
            exclude_superseded: false,
            limit: None,
            offset: 0,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_entry_types(mut self, entry_types: Vec<EntryType>) -> Self {
        self.entry_types = entry_types;
        self
    }

    pub fn exclude_superseded(mut self) -> Self {
        self.exclude_superseded = true;
        self
    }

    pub fn with_page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }

    pub(crate) fn filter(&self) -> EntryFilter {
        EntryFilter::new(self.diary_id)
            .with_tags(self.tags.clone())
            .with_entry_types(self.entry_types.clone())
            .exclude_superseded(self.exclude_superseded)
    }
}

/// Query, filters, weights and paging for [`crate::DiaryService::search`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub diary_id: DiaryId,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub entry_types: Vec<EntryType>,
    #[serde(default)]
    pub exclude_superseded: bool,
    /// Overrides the configured weights.
    #[serde(default)]
    pub weights: Option<RankWeights>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

impl SearchRequest {
    pub fn new(diary_id: DiaryId) -> Self {
        Self {
            diary_id,
            query: None,
            tags: Vec::new(),
            entry_types: Vec::new(),
            exclude_superseded: false,
            weights: None,
            limit: None,
            offset: 0,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_entry_types(mut self, entry_types: Vec<EntryType>) -> Self {
        self.entry_types = entry_types;
        self
    }

    pub fn exclude_superseded(mut self) -> Self {
        self.exclude_superseded = true;
        self
    }

    pub fn with_weights(mut self, weights: RankWeights) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn with_page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }

    /// The query if it has any non-whitespace content.
    pub(crate) fn effective_query(&self) -> Option<&str> {
        self.query.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }

    pub(crate) fn filter(&self) -> EntryFilter {
        EntryFilter::new(self.diary_id)
            .with_tags(self.tags.clone())
            .with_entry_types(self.entry_types.clone())
            .exclude_superseded(self.exclude_superseded)
    }
}

/// Window for [`crate::DiaryService::reflect`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectRequest {
    pub diary_id: DiaryId,
    #[serde(default = "default_days")]
    pub days: u32,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default)]
    pub entry_types: Vec<EntryType>,
}

fn default_days() -> u32 {
    DEFAULT_REFLECT_DAYS
}

fn default_max_entries() -> usize {
    DEFAULT_REFLECT_MAX_ENTRIES
}

impl ReflectRequest {
    pub fn new(diary_id: DiaryId) -> Self {
        Self {
            diary_id,
            days: DEFAULT_REFLECT_DAYS,
            max_entries: DEFAULT_REFLECT_MAX_ENTRIES,
            entry_types: Vec::new(),
        }
    }

    pub fn with_days(mut self, days: u32) -> Self {
        self.days = days;
        self
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    pub fn with_entry_types(mut self, entry_types: Vec<EntryType>) -> Self {
        self.entry_types = entry_types;
        self
    }
}

/// Partial update of a diary's metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiaryPatch {
    pub name: Option<String>,
    pub visibility: Option<Visibility>,
}

impl DiaryPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }
}
