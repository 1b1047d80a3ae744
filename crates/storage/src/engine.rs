//! redb storage engine wrapper.
//!
//! Provides a thin wrapper around redb with:
//! - Database lifecycle management
//! - Convenient constructors
//! - Table creation on open, so readers never see missing tables

use std::path::Path;
use std::sync::Arc;

use redb::{backends::InMemoryBackend, Database, ReadTransaction, WriteTransaction};
use snafu::{ResultExt, Snafu};

use crate::tables::Tables;

/// Error context for engine-level storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EngineError {
    #[snafu(display("failed to open database at {path}: {source}"))]
    Open {
        path: String,
        source: redb::DatabaseError,
    },

    #[snafu(display("failed to begin transaction: {source}"))]
    Begin { source: redb::TransactionError },

    #[snafu(display("failed to create table: {source}"))]
    CreateTable { source: redb::TableError },

    #[snafu(display("failed to commit transaction: {source}"))]
    Commit { source: redb::CommitError },
}

/// Storage engine backed by redb.
///
/// Wraps an `Arc<Database>` so the sync loop and background collaborators
/// can hold independent handles to the same file.
#[derive(Clone)]
pub struct StorageEngine {
    db: Arc<Database>,
}

impl StorageEngine {
    /// Opens or creates a database at the given path.
    ///
    /// All tables are created up front so read transactions never fail
    /// on a missing table.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let db = Database::create(path).context(OpenSnafu {
            path: path.display().to_string(),
        })?;
        let engine = Self { db: Arc::new(db) };
        engine.ensure_tables()?;
        Ok(engine)
    }

    /// Creates an in-memory database for testing.
    pub fn open_in_memory() -> Result<Self, EngineError> {
        let db = Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .context(OpenSnafu {
                path: ":memory:".to_string(),
            })?;
        let engine = Self { db: Arc::new(db) };
        engine.ensure_tables()?;
        Ok(engine)
    }

    /// Begins a write transaction.
    pub fn begin_write(&self) -> Result<WriteTransaction, EngineError> {
        self.db.begin_write().context(BeginSnafu)
    }

    /// Begins a read transaction.
    pub fn begin_read(&self) -> Result<ReadTransaction, EngineError> {
        self.db.begin_read().context(BeginSnafu)
    }

    fn ensure_tables(&self) -> Result<(), EngineError> {
        let txn = self.begin_write()?;
        {
            txn.open_table(Tables::CHAIN).context(CreateTableSnafu)?;
            txn.open_table(Tables::ACCOUNTS).context(CreateTableSnafu)?;
            txn.open_table(Tables::ACCOUNT_INDEX).context(CreateTableSnafu)?;
            txn.open_table(Tables::BLOCKS).context(CreateTableSnafu)?;
            txn.open_table(Tables::OPERATIONS).context(CreateTableSnafu)?;
            txn.open_table(Tables::LEVEL_OPERATIONS).context(CreateTableSnafu)?;
            txn.open_table(Tables::PROTOCOLS).context(CreateTableSnafu)?;
            txn.open_table(Tables::PROTOCOL_INDEX).context(CreateTableSnafu)?;
            txn.open_table(Tables::CYCLES).context(CreateTableSnafu)?;
            txn.open_table(Tables::BAKER_CYCLES).context(CreateTableSnafu)?;
            txn.open_table(Tables::BAKING_RIGHTS).context(CreateTableSnafu)?;
            txn.open_table(Tables::PENDING_SLASHES).context(CreateTableSnafu)?;
            txn.open_table(Tables::STATISTICS).context(CreateTableSnafu)?;
        }
        txn.commit().context(CommitSnafu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_creates_tables() {
        let engine = StorageEngine::open_in_memory().expect("open engine");
        let txn = engine.begin_read().expect("begin read");
        // A fresh database must expose every table to readers.
        txn.open_table(Tables::ACCOUNTS).expect("accounts table");
        txn.open_table(Tables::CHAIN).expect("chain table");
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("mirror.redb");
        let engine = StorageEngine::open(&path).expect("open engine");
        drop(engine);
        // Reopening an existing file must succeed.
        StorageEngine::open(&path).expect("reopen engine");
    }
}
