//! Typed repositories over a connection or an open transaction.
//!
//! Each repository is a thin borrow of a [`Connection`]. Because
//! [`rusqlite::Transaction`] derefs to `Connection`, the same calls work
//! inside [`crate::SqliteStore::run_in_transaction`] and against a plain
//! connection from [`crate::SqliteStore::read`]:
//!
//! ```ignore
//! store.run_in_transaction("create_entry", |tx| {
//!     tx.entries().create(&entry)?;
//!     tx.outbox().enqueue(&change, now)?;
//!     Ok(())
//! })?;
//! ```

mod agents;
mod diaries;
mod entries;
mod grants;
mod outbox;
mod shares;

use rusqlite::Connection;

pub use agents::AgentRepo;
pub use diaries::DiaryRepo;
pub use entries::{AccessContext, EntryFilter, EntryRepo};
pub use grants::EntryGrantRepo;
pub use outbox::{JobStatus, OutboxCounts, OutboxJob, OutboxRepo};
pub use shares::ShareRepo;

/// Repository accessors for anything that derefs to a [`Connection`].
pub trait Repositories {
    fn agents(&self) -> AgentRepo<'_>;
    fn diaries(&self) -> DiaryRepo<'_>;
    fn entries(&self) -> EntryRepo<'_>;
    fn shares(&self) -> ShareRepo<'_>;
    fn entry_grants(&self) -> EntryGrantRepo<'_>;
    fn outbox(&self) -> OutboxRepo<'_>;
}

impl Repositories for Connection {
    fn agents(&self) -> AgentRepo<'_> {
        AgentRepo::new(self)
    }

    fn diaries(&self) -> DiaryRepo<'_> {
        DiaryRepo::new(self)
    }

    fn entries(&self) -> EntryRepo<'_> {
        EntryRepo::new(self)
    }

    fn shares(&self) -> ShareRepo<'_> {
        ShareRepo::new(self)
    }

    fn entry_grants(&self) -> EntryGrantRepo<'_> {
        EntryGrantRepo::new(self)
    }

    fn outbox(&self) -> OutboxRepo<'_> {
        OutboxRepo::new(self)
    }
}
