//! SQLite-backed blob store.
//!
//! One small key/value table holds the three entries. Runtime defaults:
//! - `journal_mode = WAL` so readers (e.g. `recall stats`) don't block writes
//! - `busy_timeout = 5s` to ride out transient lock failures
//! - an exclusive advisory [`StoreLock`] held for the life of the store, so
//!   only one engine ever owns a given file
//!
//! [`SqliteBlobStore::open_read_only`] skips the lock and migrations and
//! never creates the file, for commands that only inspect a store.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params, types::Type};

use super::{BlobKey, BlobStore, GatewayError, PersistedState, StoreKey};
use crate::lock::StoreLock;

/// Busy timeout used for store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Latest schema version understood by this binary.
pub const LATEST_SCHEMA_VERSION: u32 = 1;

const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL
);

INSERT OR IGNORE INTO store_meta (id, schema_version) VALUES (1, 0);

CREATE TABLE IF NOT EXISTS blobs (
    key TEXT PRIMARY KEY CHECK (key IN ('active', 'retained', 'last_purge_time')),
    text_value TEXT,
    int_value INTEGER,
    updated_at_ms INTEGER NOT NULL,
    CHECK ((text_value IS NULL) <> (int_value IS NULL))
);
";

const MIGRATIONS: &[(u32, &str)] = &[(1, MIGRATION_V1_SQL)];

/// Read `PRAGMA user_version` as a `u32`.
///
/// # Errors
///
/// Returns an error if querying SQLite fails or the value is out of range.
pub fn current_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(version).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(error))
    })
}

/// Apply all pending migrations in ascending order.
///
/// # Errors
///
/// Returns an error if any migration fails.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<u32> {
    let mut current = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", i64::from(*version))?;
        tx.execute(
            "UPDATE store_meta SET schema_version = ?1 WHERE id = 1",
            [i64::from(*version)],
        )?;
        tx.commit()?;
        current = *version;
    }

    Ok(current)
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

pub struct SqliteBlobStore {
    conn: Connection,
    path: Option<PathBuf>,
    _lock: Option<StoreLock>,
}

impl std::fmt::Debug for SqliteBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBlobStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteBlobStore {
    /// Open (or create) the store at `path`, take its exclusive lock,
    /// apply pragmas and migrate the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is held elsewhere past `lock_timeout`,
    /// or if opening/configuring/migrating the database fails.
    pub fn open(path: &Path, lock_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create store directory {}", parent.display()))?;
        }

        let lock = StoreLock::acquire(path, lock_timeout)
            .map_err(anyhow::Error::new)
            .with_context(|| format!("lock store {}", path.display()))?;

        let mut conn = Connection::open(path)
            .with_context(|| format!("open store database {}", path.display()))?;
        configure_connection(&conn).context("configure sqlite pragmas")?;
        migrate(&mut conn).context("apply store migrations")?;

        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
            _lock: Some(lock),
        })
    }

    /// Open an existing store for reading only. Returns `Ok(None)` when
    /// there is no file at `path`; nothing is created, locked or migrated.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or its schema is
    /// older than this binary understands.
    pub fn open_read_only(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("open store database {} read-only", path.display()))?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)
            .context("configure sqlite busy timeout")?;
        let version = current_schema_version(&conn).context("read store schema version")?;
        if version < LATEST_SCHEMA_VERSION {
            anyhow::bail!(
                "store {} is at schema v{version}, expected v{LATEST_SCHEMA_VERSION}",
                path.display()
            );
        }

        Ok(Some(Self {
            conn,
            path: Some(path.to_path_buf()),
            _lock: None,
        }))
    }

    /// Unlocked in-memory store, for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot create the database.
    pub fn open_in_memory() -> rusqlite::Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migrate(&mut conn)?;
        Ok(Self {
            conn,
            path: None,
            _lock: None,
        })
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn read_text(&self, key: StoreKey) -> rusqlite::Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT text_value FROM blobs WHERE key = ?1",
                [key.as_str()],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()
            .map(Option::flatten)
    }

    fn read_int(&self, key: StoreKey) -> rusqlite::Result<Option<i64>> {
        self.conn
            .query_row(
                "SELECT int_value FROM blobs WHERE key = ?1",
                [key.as_str()],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()
            .map(Option::flatten)
    }
}

impl BlobStore for SqliteBlobStore {
    fn get_all(&mut self) -> Result<PersistedState, GatewayError> {
        Ok(PersistedState {
            active: self.read_text(StoreKey::Active)?,
            retained: self.read_text(StoreKey::Retained)?,
            last_purge_time: self.read_int(StoreKey::LastPurgeTime)?,
        })
    }

    fn put_blob(&mut self, key: BlobKey, blob: &str) -> Result<(), GatewayError> {
        self.conn.execute(
            "INSERT INTO blobs (key, text_value, int_value, updated_at_ms)
             VALUES (?1, ?2, NULL, ?3)
             ON CONFLICT(key) DO UPDATE SET
                text_value = excluded.text_value,
                int_value = NULL,
                updated_at_ms = excluded.updated_at_ms",
            params![key.as_str(), blob, now_ms()],
        )?;
        Ok(())
    }

    fn put_last_purge_time(&mut self, timestamp: i64) -> Result<(), GatewayError> {
        self.conn.execute(
            "INSERT INTO blobs (key, text_value, int_value, updated_at_ms)
             VALUES (?1, NULL, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                text_value = NULL,
                int_value = excluded.int_value,
                updated_at_ms = excluded.updated_at_ms",
            params![StoreKey::LastPurgeTime.as_str(), timestamp, now_ms()],
        )?;
        Ok(())
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
