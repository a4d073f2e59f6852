use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::warn;

use super::blocklist::{BlockRecord, BlocklistBackend};
use crate::error::PersistenceError;

/// Blocklist persistence as a transactional key-value table: one row per
/// identity, written with an upsert so concurrent writers for different
/// identities never clobber each other.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    pub fn open(path: &str) -> Result<Self, PersistenceError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    /// Private in-memory database, used by tests and throwaway deployments.
    pub fn in_memory() -> Result<Self, PersistenceError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, PersistenceError> {
        // WAL is unavailable for in-memory databases; the pragma then reports
        // "memory" and is harmless.
        conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS blocked_ips (
                ip             TEXT PRIMARY KEY,
                block_reason   TEXT NOT NULL,
                blocked_until  TEXT,
                created_at     TEXT DEFAULT (datetime('now'))
            );
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// Fixed-width UTC timestamp so that text comparison in SQL orders correctly.
fn to_column(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl BlocklistBackend for SqliteBackend {
    fn load(&self) -> Result<Vec<BlockRecord>, PersistenceError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT ip, block_reason, blocked_until FROM blocked_ips ORDER BY created_at, rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (ip, block_reason, until) = row?;
            let blocked_until = match until {
                None => None,
                Some(raw) => match DateTime::parse_from_rfc3339(&raw) {
                    Ok(ts) => Some(ts.with_timezone(&Utc)),
                    Err(e) => {
                        warn!(ip = %ip, value = %raw, error = %e, "Skipping blocklist row with unreadable expiry");
                        continue;
                    }
                },
            };
            records.push(BlockRecord {
                ip,
                block_reason,
                blocked_until,
            });
        }
        Ok(records)
    }

    fn upsert(&self, record: &BlockRecord) -> Result<(), PersistenceError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO blocked_ips (ip, block_reason, blocked_until)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(ip) DO UPDATE SET
                 block_reason = excluded.block_reason,
                 blocked_until = excluded.blocked_until",
            params![
                record.ip,
                record.block_reason,
                record.blocked_until.as_ref().map(to_column),
            ],
        )?;
        Ok(())
    }

    fn remove(&self, ip: &str) -> Result<(), PersistenceError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM blocked_ips WHERE ip = ?1", params![ip])?;
        Ok(())
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, PersistenceError> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM blocked_ips WHERE blocked_until IS NOT NULL AND blocked_until <= ?1",
            params![to_column(&now)],
        )?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(ip: &str, reason: &str, until: Option<DateTime<Utc>>) -> BlockRecord {
        BlockRecord {
            ip: ip.to_string(),
            block_reason: reason.to_string(),
            blocked_until: until,
        }
    }

    #[test]
    fn upsert_replaces_by_ip() {
        let backend = SqliteBackend::in_memory().unwrap();
        let now = Utc::now();
        backend.upsert(&record("1.1.1.1", "first", Some(now))).unwrap();
        backend.upsert(&record("1.1.1.1", "second", None)).unwrap();
        backend.upsert(&record("2.2.2.2", "other", None)).unwrap();

        let rows = backend.load().unwrap();
        assert_eq!(rows.len(), 2);
        let first = rows.iter().find(|r| r.ip == "1.1.1.1").unwrap();
        assert_eq!(first.block_reason, "second");
        assert_eq!(first.blocked_until, None);
    }

    #[test]
    fn purge_keeps_permanent_and_future_rows() {
        let backend = SqliteBackend::in_memory().unwrap();
        let now = Utc::now();
        backend.upsert(&record("1.1.1.1", "old", Some(now - Duration::seconds(5)))).unwrap();
        backend.upsert(&record("2.2.2.2", "future", Some(now + Duration::seconds(5)))).unwrap();
        backend.upsert(&record("3.3.3.3", "forever", None)).unwrap();

        assert_eq!(backend.purge_expired(now).unwrap(), 1);
        let mut ips: Vec<String> = backend.load().unwrap().into_iter().map(|r| r.ip).collect();
        ips.sort();
        assert_eq!(ips, vec!["2.2.2.2", "3.3.3.3"]);
    }

    #[test]
    fn expiry_round_trips_at_millisecond_precision() {
        let backend = SqliteBackend::in_memory().unwrap();
        let until = DateTime::parse_from_rfc3339("2030-01-02T03:04:05.678Z")
            .unwrap()
            .with_timezone(&Utc);
        backend.upsert(&record("1.1.1.1", "r", Some(until))).unwrap();
        assert_eq!(backend.load().unwrap()[0].blocked_until, Some(until));
    }

    #[test]
    fn reopens_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("blocks.db");
        let path = path.to_str().unwrap();
        {
            let backend = SqliteBackend::open(path).unwrap();
            backend.upsert(&record("1.1.1.1", "persisted", None)).unwrap();
        }
        let backend = SqliteBackend::open(path).unwrap();
        assert_eq!(backend.load().unwrap()[0].block_reason, "persisted");
    }
}
