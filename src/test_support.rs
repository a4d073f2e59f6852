//! Shared fakes for unit tests.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::audit::AuditSink;
use crate::error::PersistenceError;
use crate::models::decision::DecisionRecord;
use crate::models::request::RequestContext;
use crate::storage::blocklist::{BlockRecord, BlocklistBackend};
use crate::storage::sqlite::SqliteBackend;

/// Audit sink that keeps everything it is given.
#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<DecisionRecord>>,
    failures: Mutex<Vec<&'static str>>,
}

impl RecordingSink {
    pub fn records(&self) -> Vec<DecisionRecord> {
        self.records.lock().clone()
    }

    pub fn failures(&self) -> Vec<&'static str> {
        self.failures.lock().clone()
    }
}

impl AuditSink for RecordingSink {
    fn record(&self, record: &DecisionRecord) {
        self.records.lock().push(record.clone());
    }

    fn persistence_failure(&self, operation: &'static str, _error: &PersistenceError) {
        self.failures.lock().push(operation);
    }
}

/// Backend whose reads and writes can be made to fail.
pub struct FlakyBackend {
    fail_reads: bool,
    /// Writes fail while fewer than this many attempts have been made.
    failing_writes: u32,
    attempts: AtomicU32,
}

impl FlakyBackend {
    pub fn failing_reads() -> Self {
        Self {
            fail_reads: true,
            failing_writes: 0,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn failing_writes() -> Self {
        Self::failing_first_writes(u32::MAX)
    }

    pub fn failing_first_writes(n: u32) -> Self {
        Self {
            fail_reads: false,
            failing_writes: n,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn write_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn attempt_write(&self) -> Result<(), PersistenceError> {
        let previous = self.attempts.fetch_add(1, Ordering::SeqCst);
        if previous < self.failing_writes {
            Err(PersistenceError::Io(std::io::Error::other("disk unavailable")))
        } else {
            Ok(())
        }
    }
}

impl BlocklistBackend for FlakyBackend {
    fn load(&self) -> Result<Vec<BlockRecord>, PersistenceError> {
        if self.fail_reads {
            Err(PersistenceError::Io(std::io::Error::other("unreadable")))
        } else {
            Ok(Vec::new())
        }
    }

    fn upsert(&self, _record: &BlockRecord) -> Result<(), PersistenceError> {
        self.attempt_write()
    }

    fn remove(&self, _ip: &str) -> Result<(), PersistenceError> {
        self.attempt_write()
    }

    fn purge_expired(&self, _now: DateTime<Utc>) -> Result<usize, PersistenceError> {
        Ok(0)
    }
}

/// In-memory SQLite backend whose upserts take `delay` to land.
pub struct SlowUpserts {
    inner: SqliteBackend,
    delay: std::time::Duration,
}

impl SlowUpserts {
    pub fn new(delay: std::time::Duration) -> Self {
        Self {
            inner: SqliteBackend::in_memory().unwrap(),
            delay,
        }
    }
}

impl BlocklistBackend for SlowUpserts {
    fn load(&self) -> Result<Vec<BlockRecord>, PersistenceError> {
        self.inner.load()
    }

    fn upsert(&self, record: &BlockRecord) -> Result<(), PersistenceError> {
        std::thread::sleep(self.delay);
        self.inner.upsert(record)
    }

    fn remove(&self, ip: &str) -> Result<(), PersistenceError> {
        self.inner.remove(ip)
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, PersistenceError> {
        self.inner.purge_expired(now)
    }
}

/// A `GET /` from `ip` received at `at`.
pub fn request_from(ip: &str, at: DateTime<Utc>) -> RequestContext {
    let ip: IpAddr = ip.parse().unwrap();
    RequestContext::new(ip, "GET", "/").at(at)
}

/// A `POST /ads/click` from `ip` received at `at`.
pub fn click_from(ip: &str, at: DateTime<Utc>) -> RequestContext {
    let ip: IpAddr = ip.parse().unwrap();
    RequestContext::new(ip, "POST", "/ads/click").at(at)
}
