//! SQLite connection ownership and the transaction runner.

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, info, info_span};

use quire_config::DatabaseConfig;

use crate::error::{Result, StoreError};
use crate::vector;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Diary store backed by SQLite.
///
/// Thread-safe via an internal `Mutex<Connection>`. Uses WAL mode so readers
/// in other processes are not blocked by a writer. Writes go through
/// [`SqliteStore::run_in_transaction`], which takes the write lock up front
/// (`BEGIN IMMEDIATE`), giving serializable behaviour; a competing writer
/// sees `SQLITE_BUSY` once `busy_timeout` elapses.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open or create a store at `path` and run pending migrations.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|_| {
                StoreError::Database(rusqlite::Error::InvalidPath(path.to_path_buf()))
            })?;
        }

        vector::init_vector_extension();
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        let store = Self::initialize(conn, busy_timeout, Some(path.to_path_buf()))?;

        info!(path = %path.display(), "Diary store opened");
        Ok(store)
    }

    /// Open the store described by `config`.
    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let path = config.resolved_path();
        Self::open(path, config.busy_timeout())
    }

    /// Create an in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        vector::init_vector_extension();
        let conn = Connection::open_in_memory()?;
        let store = Self::initialize(conn, Duration::ZERO, None)?;
        debug!("In-memory diary store created");
        Ok(store)
    }

    fn initialize(
        mut conn: Connection,
        busy_timeout: Duration,
        path: Option<PathBuf>,
    ) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(busy_timeout)?;

        let report = embedded::migrations::runner()
            .run(&mut conn)
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        for migration in report.applied_migrations() {
            info!(version = migration.version(), name = migration.name(), "Applied migration");
        }

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Database file path, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a read against the connection outside of any explicit transaction.
    pub fn read<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Connection) -> std::result::Result<T, E>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Execute `f` in a serializable (`BEGIN IMMEDIATE`) transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back otherwise. `name` labels the
    /// `tx` tracing span. Conflicts surface as `rusqlite` busy/locked errors
    /// wrapped in `E`; pair with [`crate::with_conflict_retry`] to retry them.
    pub fn run_in_transaction<T, E, F>(&self, name: &str, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Transaction<'_>) -> std::result::Result<T, E>,
        E: From<StoreError>,
    {
        let span = info_span!("tx", name);
        let _entered = span.enter();

        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| E::from(StoreError::from(e)))?;

        match f(&tx) {
            Ok(value) => {
                tx.commit().map_err(|e| E::from(StoreError::from(e)))?;
                debug!("Transaction committed");
                Ok(value)
            }
            Err(err) => {
                // Dropping the transaction rolls it back.
                drop(tx);
                debug!("Transaction rolled back");
                Err(err)
            }
        }
    }
}
