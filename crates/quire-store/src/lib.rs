//! SQLite persistence for Quire.
//!
//! - [`SqliteStore`]: connection ownership, migrations and the serializable
//!   transaction runner
//! - [`Repositories`]: typed CRUD over agents, diaries, entries, shares,
//!   entry grants and the propagation outbox
//! - [`with_conflict_retry`]: re-runs a unit of work that lost a
//!   serialization race
//! - [`rank`]: hybrid relevance/recency/importance scoring for search

mod codec;
mod error;
mod repo;
mod retry;
mod search;
mod store;
pub mod vector;

pub use error::{Result, StoreError};
pub use repo::{
    AccessContext, AgentRepo, DiaryRepo, EntryFilter, EntryGrantRepo, EntryRepo, JobStatus,
    OutboxCounts, OutboxJob, OutboxRepo, Repositories, ShareRepo,
};
pub use retry::{
    ConflictExhausted, OnRetry, RetryPolicy, is_serialization_conflict, with_conflict_retry,
};
pub use search::{
    Candidate, RankWeights, ScoredEntry, SearchParams, importance_score, lexical_score,
    query_terms, rank, recency_score,
};
pub use store::SqliteStore;
