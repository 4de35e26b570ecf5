//! Shared types for the Quire diary store.
//!
//! Every closed set the engine branches on (diary visibility, share role,
//! share status, entry type) is an enum here, so adding a variant surfaces at
//! every `match` that decides permissions, filters or state transitions.

pub mod agent;
pub mod diary;
pub mod entry;
pub mod error;
pub mod ids;
pub mod share;
pub mod text;

pub use agent::Agent;
pub use diary::{Diary, PRIVATE_DIARY_KEY, Visibility};
pub use entry::{Digest, DigestEntry, Entry, EntryType, MAX_IMPORTANCE, MIN_IMPORTANCE};
pub use error::ParseEnumError;
pub use ids::{AgentId, DiaryId, EntryId, JobId, ShareId};
pub use share::{EntryGrant, Share, ShareRole, ShareStatus};
pub use text::{build_embedding_text, detect_injection_risk, normalize_tags};

/// Timestamp type used throughout the workspace.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Current UTC time.
pub fn now() -> Timestamp {
    chrono::Utc::now()
}
