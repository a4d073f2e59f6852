use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::audit::AuditSink;
use crate::config::settings::ClickVelocityConfig;
use crate::models::decision::DecisionRecord;
use crate::models::request::RequestContext;
use crate::models::threat::{BlockType, ThreatAction, REASON_ALREADY_BLOCKED, REASON_CLICK_VELOCITY};
use crate::storage::blocklist::{BlocklistStore, Expiry};
use crate::storage::memory::{CounterStore, Expiring, MemoryCounterStore};

/// Stale trackers are swept inline once every this many clicks, on top of
/// the periodic background sweep.
const SWEEP_EVERY: u64 = 256;

/// Consecutive rapid clicks seen from one identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClickTracker {
    pub count: u32,
    pub last_click_at: DateTime<Utc>,
}

impl Expiring for ClickTracker {
    fn last_seen(&self) -> DateTime<Utc> {
        self.last_click_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickVerdict {
    Human { count: u32 },
    Bot { reason: &'static str },
}

impl ClickVerdict {
    /// Why the click was refused, `None` for a human click.
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            ClickVerdict::Human { .. } => None,
            ClickVerdict::Bot { reason } => Some(*reason),
        }
    }
}

/// Flags identities that click faster than a human plausibly can.
///
/// Each click closer than `minimum_click_interval` to the previous one adds
/// to a run; any slower click resets the run to one. A run reaching
/// `max_clicks` blocks the identity.
pub struct ClickVelocityDetector<S = MemoryCounterStore<ClickTracker>> {
    trackers: S,
    blocklist: Arc<BlocklistStore>,
    audit: Arc<dyn AuditSink>,
    max_clicks: u32,
    min_interval: Duration,
    block_duration: Duration,
    calls: AtomicU64,
}

impl ClickVelocityDetector {
    pub fn new(config: &ClickVelocityConfig, blocklist: Arc<BlocklistStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self::with_store(
            MemoryCounterStore::new(config.tracker_expiration()),
            config,
            blocklist,
            audit,
        )
    }
}

impl<S> ClickVelocityDetector<S>
where
    S: CounterStore<ClickTracker>,
{
    pub fn with_store(
        trackers: S,
        config: &ClickVelocityConfig,
        blocklist: Arc<BlocklistStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            trackers,
            blocklist,
            audit,
            max_clicks: config.max_clicks,
            min_interval: config.minimum_click_interval(),
            block_duration: config.block_duration(),
            calls: AtomicU64::new(0),
        }
    }

    pub fn check_click(&self, ctx: &RequestContext) -> ClickVerdict {
        let ip = ctx.client_ip;
        let now = ctx.received_at;

        if self.calls.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            let swept = self.trackers.purge_expired(now);
            if swept > 0 {
                debug!(swept, "Swept stale click trackers");
            }
        }

        if self.blocklist.is_blocked(&ip, now).is_some() {
            return ClickVerdict::Bot {
                reason: REASON_ALREADY_BLOCKED,
            };
        }

        let min_interval = self.min_interval;
        let (count, first) = self.trackers.update(ip, now, |current| match current {
            None => (
                ClickTracker {
                    count: 1,
                    last_click_at: now,
                },
                (1, true),
            ),
            Some(t) => {
                let rapid = now.signed_duration_since(t.last_click_at) < min_interval;
                let count = if rapid { t.count.saturating_add(1) } else { 1 };
                let next = ClickTracker {
                    count,
                    last_click_at: t.last_click_at.max(now),
                };
                (next, (count, false))
            }
        });

        if first || count < self.max_clicks {
            return ClickVerdict::Human { count };
        }

        let outcome = self
            .blocklist
            .block(ip, REASON_CLICK_VELOCITY, Expiry::after(now, self.block_duration), now);
        if outcome.is_inserted() {
            warn!(ip = %ip, clicks = count, "Click velocity exceeded, blocking");
            self.audit.record(
                &DecisionRecord::new(ctx, ThreatAction::Block, BlockType::AdFraud)
                    .reason(REASON_CLICK_VELOCITY)
                    .click_count(count),
            );
        }

        ClickVerdict::Bot {
            reason: REASON_CLICK_VELOCITY,
        }
    }

    pub fn cleanup(&self, now: DateTime<Utc>) -> usize {
        self.trackers.purge_expired(now)
    }

    pub fn tracked(&self) -> usize {
        self.trackers.len()
    }
}
