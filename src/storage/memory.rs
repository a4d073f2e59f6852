use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// A per-identity record that goes stale once it has not been touched for
/// the store's TTL.
pub trait Expiring {
    fn last_seen(&self) -> DateTime<Utc>;
}

/// Keyed store for per-identity detector state.
///
/// `update` is the only write path and is atomic per key: two concurrent
/// updates for the same identity never observe the same prior value. Records
/// older than the store's TTL are presented to callers as absent, whether or
/// not they have been physically removed yet.
///
/// Implementations exist per deployment topology; detectors are generic over
/// this trait and never touch the backing map directly.
pub trait CounterStore<V>: Send + Sync {
    /// Atomically read-modify-write the record for `ip`. `f` receives the
    /// live record (or `None` when absent or expired) and returns the record
    /// to store plus a value handed back to the caller.
    ///
    /// `f` runs under the key's lock and must not block on I/O.
    fn update<R>(&self, ip: IpAddr, now: DateTime<Utc>, f: impl FnOnce(Option<V>) -> (V, R)) -> R;

    /// The live record for `ip`, if any.
    fn get(&self, ip: &IpAddr, now: DateTime<Utc>) -> Option<V>;

    /// Drop every expired record. Returns how many were removed.
    fn purge_expired(&self, now: DateTime<Utc>) -> usize;

    /// Number of physically stored records, live or not.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Single-process `CounterStore` backed by a sharded `DashMap`.
pub struct MemoryCounterStore<V> {
    entries: DashMap<IpAddr, V>,
    ttl: Duration,
}

impl<V> MemoryCounterStore<V>
where
    V: Expiring + Clone + Send + Sync,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::with_capacity(1_024),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The one place record freshness is decided.
    fn is_live(&self, record: &V, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(record.last_seen()) < self.ttl
    }
}

impl<V> CounterStore<V> for MemoryCounterStore<V>
where
    V: Expiring + Clone + Send + Sync,
{
    fn update<R>(&self, ip: IpAddr, now: DateTime<Utc>, f: impl FnOnce(Option<V>) -> (V, R)) -> R {
        match self.entries.entry(ip) {
            Entry::Occupied(mut occupied) => {
                let current = Some(occupied.get().clone()).filter(|r| self.is_live(r, now));
                let (next, result) = f(current);
                occupied.insert(next);
                result
            }
            Entry::Vacant(vacant) => {
                let (next, result) = f(None);
                vacant.insert(next);
                result
            }
        }
    }

    fn get(&self, ip: &IpAddr, now: DateTime<Utc>) -> Option<V> {
        self.entries
            .get(ip)
            .map(|r| r.value().clone())
            .filter(|r| self.is_live(r, now))
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, r| self.is_live(r, now));
        before.saturating_sub(self.entries.len())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
