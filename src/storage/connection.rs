//! Store lifecycle
//!
//! Owns the single SQLite connection behind a mutex. Opening a store
//! applies the engine pragmas (WAL, foreign keys, synchronous=NORMAL),
//! checks the schema version kept in `PRAGMA user_version`, and for
//! stores older than the engine takes a numbered backup before the
//! migration scripts run inside one transaction. A store newer than
//! the engine refuses to open.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

/// Current schema version. v2 added integer bounds columns to `tag`.
pub const SCHEMA_VERSION: i64 = 2;

/// Migration scripts, keyed by the version they migrate *to*.
const MIGRATIONS: &[(i64, &str)] = &[(
    2,
    "ALTER TABLE tag ADD COLUMN min_value INTEGER;
     ALTER TABLE tag ADD COLUMN max_value INTEGER;",
)];

const SCHEMA_DDL: &str = r#"
    CREATE TABLE IF NOT EXISTS file (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS tag (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        default_value BLOB,
        kind INTEGER NOT NULL DEFAULT 3,
        parent INTEGER,
        min_value INTEGER,
        max_value INTEGER,
        FOREIGN KEY(parent) REFERENCES tag(id)
    );

    CREATE TABLE IF NOT EXISTS file_tag (
        file INTEGER NOT NULL,
        tag INTEGER NOT NULL,
        value BLOB,
        PRIMARY KEY(file, tag),
        FOREIGN KEY(file) REFERENCES file(id),
        FOREIGN KEY(tag) REFERENCES tag(id)
    );

    CREATE TABLE IF NOT EXISTS tag_alias (
        id INTEGER NOT NULL,
        name TEXT NOT NULL UNIQUE,
        FOREIGN KEY(id) REFERENCES tag(id)
    );

    CREATE INDEX IF NOT EXISTS idx_file_tag_tag ON file_tag(tag);
    CREATE INDEX IF NOT EXISTS idx_file_name ON file(name);
"#;

// SQL pragma constants
const WAL: &str = "WAL";
const ON: &str = "ON";
const NORMAL: &str = "NORMAL";

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the on-disk store, migrating if necessary.
    pub fn open(config: &EngineConfig) -> Result<Self> {
        let db_path = &config.db_path;
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir).map_err(EngineError::Io)?;
        }

        let conn = Connection::open(db_path).map_err(EngineError::Database)?;
        apply_pragmas(&conn)?;

        let has_tables: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='file'",
            [],
            |row| row.get(0),
        )?;

        if has_tables == 0 {
            conn.execute_batch(SCHEMA_DDL)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            tracing::info!("Initialized new store at {}", db_path.display());
            return Ok(Self { conn: Mutex::new(conn) });
        }

        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        // Pre-versioning stores carry 0; their layout is v1.
        let version = version.max(1);

        if version > SCHEMA_VERSION {
            return Err(EngineError::SchemaVersion {
                found: version,
                expected: SCHEMA_VERSION,
            });
        }

        if version < SCHEMA_VERSION {
            // Flush the WAL so the file copy below is complete, then
            // release the connection for the duration of the copy.
            // wal_checkpoint returns a result row, so it must be queried.
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
            drop(conn);

            let backup = rotate_backups(db_path, config.backup_cap)?;
            tracing::info!(
                "Backed up store to {} before migrating v{} -> v{}",
                backup.display(),
                version,
                SCHEMA_VERSION
            );

            let mut conn = Connection::open(db_path).map_err(EngineError::Database)?;
            apply_pragmas(&conn)?;
            run_migrations(&mut conn, version)?;
            tracing::info!("Store migrated to schema v{}", SCHEMA_VERSION);
            return Ok(Self { conn: Mutex::new(conn) });
        }

        tracing::info!("Opened store at {} (schema v{})", db_path.display(), version);
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// A fresh in-memory store with the current schema. Used by the
    /// standalone cabinet configuration and tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(EngineError::Database)?;
        conn.pragma_update(None, "foreign_keys", ON)?;
        conn.execute_batch(SCHEMA_DDL)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Runs `f` with the connection. Single statements auto-commit.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Runs `f` inside one transaction; commits only on `Ok`.
    pub fn with_tx<T>(&self, f: impl FnOnce(&rusqlite::Transaction) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", WAL)?;
    conn.pragma_update(None, "foreign_keys", ON)?;
    conn.pragma_update(None, "synchronous", NORMAL)?;
    Ok(())
}

/// Applies every migration past `from` inside a single transaction and
/// stamps the new version. Failure aborts the open; the backup taken by
/// the caller is the recovery path.
fn run_migrations(conn: &mut Connection, from: i64) -> Result<()> {
    let tx = conn.transaction()?;
    for (target, script) in MIGRATIONS {
        if *target > from {
            tx.execute_batch(script)
                .map_err(|e| EngineError::Migration(format!("to v{}: {}", target, e)))?;
        }
    }
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)
        .map_err(|e| EngineError::Migration(format!("stamping version: {}", e)))?;
    tx.commit()
        .map_err(|e| EngineError::Migration(format!("commit: {}", e)))?;
    Ok(())
}

/// Copies the database file to the next numbered `<db>.bak.<n>` slot,
/// evicting the oldest slots beyond `cap`.
fn rotate_backups(db_path: &Path, cap: usize) -> Result<PathBuf> {
    let file_name = db_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| EngineError::Config("invalid database path".into()))?;
    let dir = db_path.parent().unwrap_or_else(|| Path::new("."));
    let prefix = format!("{}.bak.", file_name);

    let mut slots: Vec<u64> = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(EngineError::Io)? {
        let entry = entry.map_err(EngineError::Io)?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(n) = name.strip_prefix(&prefix).and_then(|s| s.parse().ok()) {
                slots.push(n);
            }
        }
    }
    slots.sort_unstable();

    let next = slots.last().map(|n| n + 1).unwrap_or(1);
    let backup = dir.join(format!("{}{}", prefix, next));
    std::fs::copy(db_path, &backup).map_err(EngineError::Io)?;

    slots.push(next);
    while slots.len() > cap.max(1) {
        let oldest = slots.remove(0);
        let victim = dir.join(format!("{}{}", prefix, oldest));
        if let Err(e) = std::fs::remove_file(&victim) {
            tracing::warn!("Failed to evict backup {}: {}", victim.display(), e);
        }
    }

    Ok(backup)
}
