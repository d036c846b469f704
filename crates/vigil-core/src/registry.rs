//! SQLite-backed resource registry.
//!
//! One table of registered resources keyed by path, with the trusted
//! baseline stored alongside. The connection is shared behind a mutex; the
//! batch baseline write runs in a single transaction so a store failure
//! rolls the whole batch back.

use crate::models::{Resource, ResourceKind};
use crate::{MonitorError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// Current schema version
const SCHEMA_VERSION: i32 = 1;

/// One pending baseline write, produced by the verification engine
#[derive(Debug, Clone)]
pub struct BaselineUpdate {
    pub path: String,
    pub hash: String,
    pub checked_at: DateTime<Utc>,
}

/// Registry of monitored resources
pub struct Registry {
    conn: Mutex<Connection>,
}

impl Registry {
    /// Open or create the registry database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        let registry = Self { conn: Mutex::new(conn) };
        registry.migrate()?;

        Ok(registry)
    }

    /// Open an in-memory registry (test fixture)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let registry = Self { conn: Mutex::new(conn) };
        registry.migrate()?;

        Ok(registry)
    }

    /// Run schema migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap_or(0);

        if current_version < SCHEMA_VERSION {
            self.migrate_v1(&conn)?;
        }

        Ok(())
    }

    /// Schema version 1 - initial schema
    fn migrate_v1(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS resources (
                path TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                added_at TEXT NOT NULL,
                baseline_hash TEXT,
                baseline_checked_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_resources_added_at ON resources(added_at);

            INSERT OR REPLACE INTO schema_version (version) VALUES (1);
        "#,
        )?;

        Ok(())
    }

    /// Insert a new resource. Fails with `DuplicatePath` if the path is
    /// already registered.
    pub fn insert(&self, resource: &Resource) -> Result<()> {
        let conn = self.conn.lock();

        let result = conn.execute(
            "INSERT INTO resources (path, name, kind, added_at, baseline_hash, baseline_checked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                resource.path,
                resource.name,
                resource.kind.as_str(),
                resource.added_at.to_rfc3339(),
                resource.baseline_hash,
                resource.baseline_checked_at.map(|t| t.to_rfc3339()),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(MonitorError::DuplicatePath(resource.path.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Look up a resource by its path
    pub fn find_by_path(&self, path: &str) -> Result<Option<Resource>> {
        let conn = self.conn.lock();

        conn.query_row(
            "SELECT path, name, kind, added_at, baseline_hash, baseline_checked_at
             FROM resources WHERE path = ?1",
            params![path],
            row_to_resource,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Delete a resource by path. Returns whether a row was removed.
    pub fn delete_by_path(&self, path: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM resources WHERE path = ?1", params![path])?;
        Ok(removed > 0)
    }

    /// All resources in registration order
    pub fn list_all(&self) -> Result<Vec<Resource>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT path, name, kind, added_at, baseline_hash, baseline_checked_at
             FROM resources ORDER BY added_at ASC, rowid ASC",
        )?;

        let resources = stmt
            .query_map([], row_to_resource)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(resources)
    }

    /// Write one baseline. Hash and timestamp are set together, never
    /// separately. Returns whether the path was registered.
    pub fn update_baseline(&self, path: &str, hash: &str, checked_at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE resources SET baseline_hash = ?1, baseline_checked_at = ?2 WHERE path = ?3",
            params![hash, checked_at.to_rfc3339(), path],
        )?;
        Ok(updated > 0)
    }

    /// Write a batch of baselines in one transaction. A failure rolls the
    /// whole batch back; success commits every update at once.
    pub fn update_baselines(&self, updates: &[BaselineUpdate]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut applied = 0;

        {
            let mut stmt = tx.prepare(
                "UPDATE resources SET baseline_hash = ?1, baseline_checked_at = ?2 WHERE path = ?3",
            )?;
            for update in updates {
                applied += stmt.execute(params![
                    update.hash,
                    update.checked_at.to_rfc3339(),
                    update.path,
                ])?;
            }
        }

        tx.commit()?;
        Ok(applied)
    }
}

fn row_to_resource(row: &rusqlite::Row) -> rusqlite::Result<Resource> {
    let added_at_str: String = row.get(3)?;
    let checked_at_str: Option<String> = row.get(5)?;

    Ok(Resource {
        path: row.get(0)?,
        name: row.get(1)?,
        kind: ResourceKind::from_str(&row.get::<_, String>(2)?),
        added_at: DateTime::parse_from_rfc3339(&added_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        baseline_hash: row.get(4)?,
        baseline_checked_at: checked_at_str
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok().map(|dt| dt.with_timezone(&Utc))),
    })
}
