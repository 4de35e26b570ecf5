//! Input validation for diary and entry fields.

use quire_types::{Diary, MAX_IMPORTANCE, MIN_IMPORTANCE, PRIVATE_DIARY_KEY, normalize_tags};

use crate::error::DiaryError;

pub const MAX_NAME_LEN: usize = 128;
pub const MAX_TITLE_LEN: usize = 256;
pub const MAX_CONTENT_LEN: usize = 100_000;
pub const MAX_TAGS: usize = 20;
pub const MAX_TAG_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("content is empty")]
    EmptyContent,

    #[error("content is {len} characters, limit is {max}")]
    ContentTooLong { len: usize, max: usize },

    #[error("title is {len} characters, limit is {max}")]
    TitleTooLong { len: usize, max: usize },

    #[error("{count} tags given, limit is {max}")]
    TooManyTags { count: usize, max: usize },

    #[error("tag '{tag}' exceeds {max} characters")]
    TagTooLong { tag: String, max: usize },

    #[error("importance {value} is out of range [{min}, {max}]")]
    ImportanceOutOfRange { value: u8, min: u8, max: u8 },

    #[error("invalid diary key '{0}': use 1-64 lowercase letters, digits, '-' or '_'")]
    InvalidKey(String),

    #[error("diary key '{}' is reserved", PRIVATE_DIARY_KEY)]
    ReservedKey,

    #[error("name must be 1-{} characters", MAX_NAME_LEN)]
    InvalidName,
}

impl From<ValidationError> for DiaryError {
    fn from(err: ValidationError) -> Self {
        DiaryError::Validation(err.to_string())
    }
}

/// Trimmed, non-empty content within the size limit.
pub fn validate_content(content: &str) -> Result<String, ValidationError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    let len = trimmed.chars().count();
    if len > MAX_CONTENT_LEN {
        return Err(ValidationError::ContentTooLong {
            len,
            max: MAX_CONTENT_LEN,
        });
    }
    Ok(trimmed.to_string())
}

/// Trimmed title; blank titles become `None`.
pub fn validate_title(title: Option<&str>) -> Result<Option<String>, ValidationError> {
    let Some(title) = title.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(None);
    };
    let len = title.chars().count();
    if len > MAX_TITLE_LEN {
        return Err(ValidationError::TitleTooLong {
            len,
            max: MAX_TITLE_LEN,
        });
    }
    Ok(Some(title.to_string()))
}

/// Normalized tags (trimmed, de-duplicated in first-seen order).
pub fn validate_tags(tags: &[String]) -> Result<Vec<String>, ValidationError> {
    let tags = normalize_tags(tags);
    if tags.len() > MAX_TAGS {
        return Err(ValidationError::TooManyTags {
            count: tags.len(),
            max: MAX_TAGS,
        });
    }
    if let Some(long) = tags.iter().find(|t| t.chars().count() > MAX_TAG_LEN) {
        return Err(ValidationError::TagTooLong {
            tag: long.clone(),
            max: MAX_TAG_LEN,
        });
    }
    Ok(tags)
}

pub fn validate_importance(importance: u8) -> Result<u8, ValidationError> {
    if !(MIN_IMPORTANCE..=MAX_IMPORTANCE).contains(&importance) {
        return Err(ValidationError::ImportanceOutOfRange {
            value: importance,
            min: MIN_IMPORTANCE,
            max: MAX_IMPORTANCE,
        });
    }
    Ok(importance)
}

/// A key for a new, non-default diary.
pub fn validate_new_key(key: &str) -> Result<(), ValidationError> {
    if !Diary::is_valid_key(key) {
        return Err(ValidationError::InvalidKey(key.to_string()));
    }
    if key == PRIVATE_DIARY_KEY {
        return Err(ValidationError::ReservedKey);
    }
    Ok(())
}

pub fn validate_name(name: &str) -> Result<String, ValidationError> {
    let trimmed = name.trim();
    let len = trimmed.chars().count();
    if len == 0 || len > MAX_NAME_LEN {
        return Err(ValidationError::InvalidName);
    }
    Ok(trimmed.to_string())
}
