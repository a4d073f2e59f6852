use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::audit::AuditSink;
use crate::config::settings::EscalationConfig;
use crate::models::decision::DecisionRecord;
use crate::models::request::RequestContext;
use crate::models::threat::{BlockType, ThreatAction, REASON_RATE_VIOLATIONS};
use crate::storage::blocklist::{BlockEntry, BlockOutcome, BlocklistStore, Expiry};
use crate::storage::memory::{CounterStore, Expiring, MemoryCounterStore};

/// Rate-limit rejections seen from one identity inside the violation window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViolationCounter {
    pub count: u32,
    pub last_event_at: DateTime<Utc>,
}

impl Expiring for ViolationCounter {
    fn last_seen(&self) -> DateTime<Utc> {
        self.last_event_at
    }
}

/// What a recorded violation led to.
#[derive(Debug, Clone, PartialEq)]
pub enum ViolationOutcome {
    /// Below the threshold; nothing else happened.
    Counted { count: u32 },
    /// This violation crossed the threshold and placed the block.
    Escalated { count: u32, entry: BlockEntry },
    /// At or over the threshold, but the identity was already blocked.
    AlreadyBlocked { count: u32 },
}

impl ViolationOutcome {
    pub fn count(&self) -> u32 {
        match self {
            ViolationOutcome::Counted { count }
            | ViolationOutcome::Escalated { count, .. }
            | ViolationOutcome::AlreadyBlocked { count } => *count,
        }
    }
}

/// Turns repeated rate-limit rejections into a timed block.
///
/// A counter that has not been touched for the violation window starts over
/// at zero. The counter survives the block, so a fresh violation after the
/// block lapses re-blocks immediately.
pub struct ViolationEscalator<S = MemoryCounterStore<ViolationCounter>> {
    counters: S,
    blocklist: Arc<BlocklistStore>,
    audit: Arc<dyn AuditSink>,
    threshold: u32,
    block_duration: Duration,
}

impl ViolationEscalator {
    pub fn new(config: &EscalationConfig, blocklist: Arc<BlocklistStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self::with_store(
            MemoryCounterStore::new(config.violation_expiration()),
            config,
            blocklist,
            audit,
        )
    }
}

impl<S> ViolationEscalator<S>
where
    S: CounterStore<ViolationCounter>,
{
    pub fn with_store(
        counters: S,
        config: &EscalationConfig,
        blocklist: Arc<BlocklistStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            counters,
            blocklist,
            audit,
            threshold: config.violation_threshold,
            block_duration: config.block_duration(),
        }
    }

    /// Count one rate-limit rejection for the request's identity and block
    /// it once the threshold is reached.
    pub fn record_violation(&self, ctx: &RequestContext) -> ViolationOutcome {
        let ip = ctx.client_ip;
        let now = ctx.received_at;

        let count = self.counters.update(ip, now, |current| {
            let next = match current {
                Some(c) => ViolationCounter {
                    count: c.count.saturating_add(1),
                    last_event_at: c.last_event_at.max(now),
                },
                None => ViolationCounter {
                    count: 1,
                    last_event_at: now,
                },
            };
            let count = next.count;
            (next, count)
        });

        if count < self.threshold {
            debug!(ip = %ip, count, threshold = self.threshold, "Rate-limit violation recorded");
            return ViolationOutcome::Counted { count };
        }

        if self.blocklist.is_blocked(&ip, now).is_some() {
            return ViolationOutcome::AlreadyBlocked { count };
        }

        // Racing callers can both get here; the blocklist lets only one insert.
        let expires = Expiry::after(now, self.block_duration);
        match self.blocklist.block(ip, REASON_RATE_VIOLATIONS, expires, now) {
            BlockOutcome::Inserted(entry) => {
                warn!(ip = %ip, count, expires = ?entry.expires, "Violation threshold reached, blocking");
                self.audit.record(
                    &DecisionRecord::new(ctx, ThreatAction::Block, BlockType::RateLimit)
                        .reason(REASON_RATE_VIOLATIONS)
                        .violation_count(count),
                );
                ViolationOutcome::Escalated { count, entry }
            }
            BlockOutcome::AlreadyBlocked(_) => ViolationOutcome::AlreadyBlocked { count },
        }
    }

    /// Live violation count for `ip`, zero when absent or expired.
    pub fn count(&self, ip: &std::net::IpAddr, now: DateTime<Utc>) -> u32 {
        self.counters.get(ip, now).map_or(0, |c| c.count)
    }

    pub fn cleanup(&self, now: DateTime<Utc>) -> usize {
        self.counters.purge_expired(now)
    }
}
