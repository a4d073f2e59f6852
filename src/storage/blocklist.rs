use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audit::AuditSink;
use crate::error::PersistenceError;

// ---------------------------------------------------------------------------
// Persistence contract
// ---------------------------------------------------------------------------

/// Persisted shape of a block, one per identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
    pub ip: String,
    #[serde(alias = "reason")]
    pub block_reason: String,
    /// `None` is a permanent block.
    #[serde(default)]
    pub blocked_until: Option<DateTime<Utc>>,
}

/// Durable storage behind the blocklist. Writes are per identity; no
/// implementation rewrites the whole set on the request path.
pub trait BlocklistBackend: Send + Sync {
    /// Read every stored record. Called once at startup.
    fn load(&self) -> Result<Vec<BlockRecord>, PersistenceError>;

    /// Insert or replace the record for `record.ip`.
    fn upsert(&self, record: &BlockRecord) -> Result<(), PersistenceError>;

    fn remove(&self, ip: &str) -> Result<(), PersistenceError>;

    /// Physically drop records whose expiry is at or before `now`.
    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, PersistenceError>;
}

// ---------------------------------------------------------------------------
// BlockEntry
// ---------------------------------------------------------------------------

/// When a block stops applying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expiry {
    At(DateTime<Utc>),
    Never,
}

impl Expiry {
    /// `ttl` from `now`. An instant past the end of the calendar is `Never`.
    pub fn after(now: DateTime<Utc>, ttl: Duration) -> Self {
        now.checked_add_signed(ttl).map_or(Expiry::Never, Expiry::At)
    }

    /// A block is active strictly before its expiry instant.
    pub fn has_passed(&self, now: DateTime<Utc>) -> bool {
        match self {
            Expiry::At(at) => now >= *at,
            Expiry::Never => false,
        }
    }

    fn as_option(&self) -> Option<DateTime<Utc>> {
        match self {
            Expiry::At(at) => Some(*at),
            Expiry::Never => None,
        }
    }
}

impl From<Option<DateTime<Utc>>> for Expiry {
    fn from(value: Option<DateTime<Utc>>) -> Self {
        value.map_or(Expiry::Never, Expiry::At)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockEntry {
    pub ip: IpAddr,
    pub reason: String,
    pub expires: Expiry,
}

impl BlockEntry {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.expires.has_passed(now)
    }

    fn to_record(&self) -> BlockRecord {
        BlockRecord {
            ip: self.ip.to_string(),
            block_reason: self.reason.clone(),
            blocked_until: self.expires.as_option(),
        }
    }
}

/// Result of a `block` request.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockOutcome {
    /// A new entry was created (or replaced an expired one).
    Inserted(BlockEntry),
    /// An active entry already existed and was left untouched.
    AlreadyBlocked(BlockEntry),
}

impl BlockOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, BlockOutcome::Inserted(_))
    }

    pub fn entry(&self) -> &BlockEntry {
        match self {
            BlockOutcome::Inserted(e) | BlockOutcome::AlreadyBlocked(e) => e,
        }
    }
}

// ---------------------------------------------------------------------------
// BlocklistStore
// ---------------------------------------------------------------------------

/// The single source of truth for blocked identities.
///
/// Reads are served from memory. Every change goes through `block` /
/// `unblock` and is then written through to the backend outside the
/// identity's lock. Backend failures never reach the caller.
///
/// Backend writes are serialized, and each one persists the identity's
/// in-memory state as of the moment it runs. The last write for an identity
/// therefore always matches memory, whatever order racing callers reach the
/// backend in.
pub struct BlocklistStore {
    entries: DashMap<IpAddr, BlockEntry>,
    backend: Arc<dyn BlocklistBackend>,
    audit: Arc<dyn AuditSink>,
    write_retries: u32,
    persist: Mutex<()>,
}

impl BlocklistStore {
    /// Build the store and restore its contents from `backend`.
    ///
    /// A failed read leaves the store empty: startup continues and the
    /// failure is reported to the audit sink.
    pub fn open(
        backend: Arc<dyn BlocklistBackend>,
        audit: Arc<dyn AuditSink>,
        write_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let store = Self {
            entries: DashMap::new(),
            backend,
            audit,
            write_retries,
            persist: Mutex::new(()),
        };

        match store.backend.load() {
            Ok(records) => {
                let total = records.len();
                for record in records {
                    let ip = match IpAddr::from_str(record.ip.trim()) {
                        Ok(ip) => ip,
                        Err(_) => {
                            warn!(ip = %record.ip, "Skipping persisted block with unparseable address");
                            continue;
                        }
                    };
                    let entry = BlockEntry {
                        ip,
                        reason: record.block_reason,
                        expires: record.blocked_until.into(),
                    };
                    if entry.is_active(now) {
                        store.entries.insert(ip, entry);
                    }
                }
                info!(restored = store.entries.len(), stored = total, "Blocklist restored");
            }
            Err(e) => {
                warn!(error = %e, "Failed to read persisted blocklist; starting empty");
                store.audit.persistence_failure("load", &e);
            }
        }

        store
    }

    /// The active block for `ip`, if any. An expired entry is removed on
    /// the way out and never reported as blocking.
    pub fn is_blocked(&self, ip: &IpAddr, now: DateTime<Utc>) -> Option<BlockEntry> {
        {
            let entry = self.entries.get(ip)?;
            if entry.is_active(now) {
                return Some(entry.value().clone());
            }
        }

        if self.entries.remove_if(ip, |_, e| !e.is_active(now)).is_some() {
            debug!(ip = %ip, "Block expired");
        }
        None
    }

    /// Block `ip` unless it is already actively blocked. First writer wins:
    /// an active entry keeps its original reason and expiry.
    pub fn block(&self, ip: IpAddr, reason: &str, expires: Expiry, now: DateTime<Utc>) -> BlockOutcome {
        let candidate = BlockEntry {
            ip,
            reason: reason.to_string(),
            expires,
        };

        let outcome = match self.entries.entry(ip) {
            Entry::Occupied(existing) if existing.get().is_active(now) => {
                BlockOutcome::AlreadyBlocked(existing.get().clone())
            }
            Entry::Occupied(mut stale) => {
                stale.insert(candidate.clone());
                BlockOutcome::Inserted(candidate)
            }
            Entry::Vacant(slot) => {
                slot.insert(candidate.clone());
                BlockOutcome::Inserted(candidate)
            }
        };

        if let BlockOutcome::Inserted(ref entry) = outcome {
            info!(ip = %ip, reason = %entry.reason, expires = ?entry.expires, "Identity blocked");
            self.write_through("block", ip);
        }

        outcome
    }

    /// Lift a block regardless of expiry. Returns whether one was present.
    pub fn unblock(&self, ip: &IpAddr) -> bool {
        let removed = self.entries.remove(ip).is_some();
        if removed {
            info!(ip = %ip, "Identity unblocked");
            self.write_through("unblock", *ip);
        }
        removed
    }

    /// Active entries, soonest expiry first, permanent blocks last.
    pub fn list_active(&self, now: DateTime<Utc>) -> Vec<BlockEntry> {
        let mut active: Vec<BlockEntry> = self
            .entries
            .iter()
            .filter(|e| e.is_active(now))
            .map(|e| e.value().clone())
            .collect();

        active.sort_by(|a, b| match (a.expires, b.expires) {
            (Expiry::At(x), Expiry::At(y)) => x.cmp(&y).then_with(|| a.ip.cmp(&b.ip)),
            (Expiry::At(_), Expiry::Never) => std::cmp::Ordering::Less,
            (Expiry::Never, Expiry::At(_)) => std::cmp::Ordering::Greater,
            (Expiry::Never, Expiry::Never) => a.ip.cmp(&b.ip),
        });
        active
    }

    /// Drop expired entries from memory and compact the backend.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_active(now));
        let removed = before.saturating_sub(self.entries.len());

        let _serial = self.persist.lock();
        if let Err(e) = self.backend.purge_expired(now) {
            warn!(error = %e, "Failed to compact persisted blocklist");
            self.audit.persistence_failure("compact", &e);
        }
        removed
    }

    /// Persist the current in-memory state of `ip`, retrying transient
    /// failures. A present entry is upserted and an absent one removed.
    fn write_through(&self, operation: &'static str, ip: IpAddr) {
        let _serial = self.persist.lock();
        let record = self.entries.get(&ip).map(|e| e.to_record());
        let key = ip.to_string();

        let mut attempt = 0;
        loop {
            let result = match &record {
                Some(record) => self.backend.upsert(record),
                None => self.backend.remove(&key),
            };
            match result {
                Ok(()) => return,
                Err(e) if attempt < self.write_retries => {
                    attempt += 1;
                    debug!(operation, attempt, error = %e, "Retrying blocklist write");
                }
                Err(e) => {
                    warn!(operation, error = %e, "Blocklist write failed; in-memory state kept but not durable");
                    self.audit.persistence_failure(operation, &e);
                    return;
                }
            }
        }
    }
}
