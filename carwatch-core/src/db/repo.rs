//! Database repository layer
//!
//! Append-only storage of snapshots plus the read queries `status` needs.

use crate::error::{Error, Result};
use crate::types::Snapshot;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::SnapshotStore;

/// A stored snapshot row.
#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    pub id: i64,
    pub taken_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    pub user_present: bool,
    pub charging: bool,
    pub payload: Vec<u8>,
}

/// Database handle (single connection)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL keeps `status` readers from blocking the writer; FULL sync makes
        // every append durable before the next snapshot is taken.
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.connection();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ============================================
    // Snapshot operations
    // ============================================

    /// Append one snapshot
    pub fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<i64> {
        let conn = self.connection();
        conn.execute(
            r#"
            INSERT INTO snapshots (taken_at, recorded_at, user_present, charging, payload)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                snapshot.timestamp().to_rfc3339(),
                Utc::now().to_rfc3339(),
                snapshot.user_present(),
                snapshot.charging(),
                snapshot.payload(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Number of stored snapshots
    pub fn snapshot_count(&self) -> Result<i64> {
        let conn = self.connection();
        let count = conn.query_row("SELECT COUNT(*) FROM snapshots", [], |r| r.get(0))?;
        Ok(count)
    }

    /// Timestamp of the most recently taken snapshot
    pub fn latest_snapshot_at(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.connection();
        let latest: Option<String> = conn
            .query_row(
                "SELECT taken_at FROM snapshots ORDER BY taken_at DESC, id DESC LIMIT 1",
                [],
                |r| r.get(0),
            )
            .optional()?;

        Ok(latest
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }

    /// Most recent snapshots in insertion order, newest last
    pub fn recent_snapshots(&self, limit: usize) -> Result<Vec<StoredSnapshot>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, taken_at, recorded_at, user_present, charging, payload
            FROM (SELECT * FROM snapshots ORDER BY id DESC LIMIT ?1)
            ORDER BY id ASC
            "#,
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let taken_at: String = row.get(1)?;
            let recorded_at: String = row.get(2)?;
            Ok(StoredSnapshot {
                id: row.get(0)?,
                taken_at: parse_datetime(&taken_at),
                recorded_at: parse_datetime(&recorded_at),
                user_present: row.get(3)?,
                charging: row.get(4)?,
                payload: row.get(5)?,
            })
        })?;

        let snapshots = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(snapshots)
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl SnapshotStore for Database {
    fn ensure_schema(&self) -> Result<()> {
        self.migrate()
    }

    fn append(&self, snapshot: &Snapshot) -> Result<()> {
        self.insert_snapshot(snapshot)
            .map(|_| ())
            .map_err(|e| Error::Storage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn snapshot(secs: i64, user_present: bool) -> Snapshot {
        let ts = Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
        Snapshot::new(format!("{{\"n\":{}}}", secs).into_bytes(), ts, user_present, false)
    }

    #[test]
    fn test_append_and_read_back() {
        let db = Database::open_in_memory().unwrap();
        db.ensure_schema().unwrap();

        db.append(&snapshot(0, true)).unwrap();
        db.append(&snapshot(60, false)).unwrap();

        assert_eq!(db.snapshot_count().unwrap(), 2);
        let rows = db.recent_snapshots(10).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].user_present);
        assert_eq!(rows[1].payload, b"{\"n\":60}");
        assert_eq!(
            db.latest_snapshot_at().unwrap(),
            Some(Utc.timestamp_opt(1_700_000_060, 0).unwrap())
        );
    }

    #[test]
    fn test_recent_snapshots_limit_keeps_newest() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        for n in 0..5 {
            db.append(&snapshot(n, false)).unwrap();
        }

        let rows = db.recent_snapshots(2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].payload, b"{\"n\":3}");
        assert_eq!(rows[1].payload, b"{\"n\":4}");
    }

    #[test]
    fn test_empty_store() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        assert_eq!(db.snapshot_count().unwrap(), 0);
        assert!(db.latest_snapshot_at().unwrap().is_none());
    }

    #[test]
    fn test_append_without_schema_is_storage_error() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.append(&snapshot(0, false)),
            Err(Error::Storage(_))
        ));
    }

    #[test]
    fn test_on_disk_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/carwatch.db");

        {
            let db = Database::open(&path).unwrap();
            db.ensure_schema().unwrap();
            db.append(&snapshot(1, false)).unwrap();
        }

        let db = Database::open(&path).unwrap();
        db.ensure_schema().unwrap();
        assert_eq!(db.snapshot_count().unwrap(), 1);
    }
}
