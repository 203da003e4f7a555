//! SQLite persistence for secret records and user accounts.
//!
//! One [`Database`] holds four secret tables plus `users`. Every secret row
//! is scoped by `owner_id`, and `(owner_id, <natural key>)` is unique, so a
//! second insert for the same key fails instead of duplicating the record.
//! The server scopes rows by authenticated user id; the client keeps its
//! local mirror under [`LOCAL_OWNER`].

mod records;
mod users;

pub use records::{Record, SecretStores, Store, Upserted};
pub use users::{UserRecord, UserStore};

use crate::error::StoreError;
use crate::token::UserId;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Current schema version, stored in `PRAGMA user_version`.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Owner id used for the client's single-user local store.
pub const LOCAL_OWNER: UserId = 0;

/// Shared, thread-safe SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Open (creating if needed) a database file and bring its schema up to date.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize_schema()?;
        tracing::debug!("Opened database at {}", path.display());
        Ok(db)
    }

    /// Create a new in-memory database for testing
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize_schema()?;
        Ok(db)
    }

    /// Create all tables and indexes. Safe to call on an existing database.
    pub fn initialize_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;

        let found: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if found > CURRENT_SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                expected: CURRENT_SCHEMA_VERSION,
                found,
            });
        }

        Self::create_secret_tables(&conn)?;
        Self::create_users_table(&conn)?;
        Self::create_indexes(&conn)?;
        conn.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
        Ok(())
    }

    fn create_secret_tables(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS credentials (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL,
                tag TEXT NOT NULL,
                login TEXT NOT NULL,
                password TEXT NOT NULL,
                comment TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL,
                UNIQUE (owner_id, login)
            );

            CREATE TABLE IF NOT EXISTS texts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL,
                tag TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                comment TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL,
                UNIQUE (owner_id, key)
            );

            CREATE TABLE IF NOT EXISTS binaries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL,
                tag TEXT NOT NULL,
                key TEXT NOT NULL,
                value BLOB NOT NULL,
                comment TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL,
                UNIQUE (owner_id, key)
            );

            CREATE TABLE IF NOT EXISTS cards (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL,
                tag TEXT NOT NULL,
                number TEXT NOT NULL,
                exp TEXT NOT NULL,
                cvv INTEGER NOT NULL,
                comment TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL,
                UNIQUE (owner_id, number)
            );",
        )?;
        Ok(())
    }

    fn create_users_table(conn: &Connection) -> Result<(), StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                login TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn create_indexes(conn: &Connection) -> Result<(), StoreError> {
        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_credentials_owner ON credentials(owner_id)",
            "CREATE INDEX IF NOT EXISTS idx_texts_owner ON texts(owner_id)",
            "CREATE INDEX IF NOT EXISTS idx_binaries_owner ON binaries(owner_id)",
            "CREATE INDEX IF NOT EXISTS idx_cards_owner ON cards(owner_id)",
        ];
        for sql in &indexes {
            conn.execute(sql, [])?;
        }
        Ok(())
    }

    /// Lock the connection for a short synchronous operation.
    pub fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }

    /// Close the connection once the last handle is released.
    ///
    /// Other clones keep the connection alive; closing one of them only
    /// drops that handle.
    pub fn close(self) -> Result<(), StoreError> {
        if let Ok(mutex) = Arc::try_unwrap(self.conn) {
            let conn = mutex
                .into_inner()
                .map_err(|e| StoreError::Lock(e.to_string()))?;
            conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
        }
        Ok(())
    }
}
