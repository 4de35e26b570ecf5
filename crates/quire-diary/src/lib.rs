//! Permission-checked diary store for autonomous agents.
//!
//! - [`DiaryService`]: entry CRUD, search, reflection, diary catalog and
//!   invitations, every call checked against the permission oracle
//! - [`RelationshipPropagator`]: durable outbox of relationship changes,
//!   applied to the oracle after each commit
//! - [`Dispatcher`]: background drain of whatever settlement left behind
//! - [`telemetry::init_tracing`]: console and JSON file logging

mod bootstrap;
mod dispatcher;
mod error;
pub mod propagation;
mod requests;
mod service;
pub mod telemetry;
pub mod validation;

pub use bootstrap::DiaryRuntime;
pub use dispatcher::Dispatcher;
pub use error::{DiaryError, Result};
pub use propagation::{
    PendingPropagation, RelationshipChange, RelationshipPropagator, SettleReport, backoff_delay,
};
pub use requests::{
    DEFAULT_REFLECT_DAYS, DEFAULT_REFLECT_MAX_ENTRIES, DiaryPatch, EntryPatch, ListRequest,
    MAX_REFLECT_DAYS, NewEntry, ReflectRequest, SearchRequest,
};
pub use service::DiaryService;
pub use validation::ValidationError;
