use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::config::settings::RateLimitConfig;
use crate::error::UpstreamCounterError;
use crate::storage::memory::{CounterStore, Expiring, MemoryCounterStore};

/// Answer from the rate-counting capability for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed {
        /// Requests left in the current window after this one.
        remaining: u64,
    },
    Limited {
        /// Time until the current window closes.
        retry_after: Duration,
    },
}

/// The rate-counting capability the admission gate delegates to: admits up
/// to N events per window per identity. Implementations may live out of
/// process, hence the fallible signature.
pub trait RateCounter: Send + Sync {
    fn hit(&self, ip: IpAddr, now: DateTime<Utc>) -> Result<RateDecision, UpstreamCounterError>;

    /// Drop state for windows that have closed.
    fn cleanup(&self, _now: DateTime<Utc>) {}
}

#[derive(Debug, Clone)]
struct Window {
    started_at: DateTime<Utc>,
    hits: u64,
}

impl Expiring for Window {
    fn last_seen(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// In-process fixed-window counter. A window opens on the first hit from an
/// identity and lasts `window`; an expired window is indistinguishable from
/// no window at all, so the next hit opens a fresh one.
pub struct FixedWindowCounter {
    windows: MemoryCounterStore<Window>,
    max_requests: u64,
}

impl FixedWindowCounter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            windows: MemoryCounterStore::new(config.window()),
            max_requests: config.max_requests,
        }
    }
}

impl RateCounter for FixedWindowCounter {
    fn hit(&self, ip: IpAddr, now: DateTime<Utc>) -> Result<RateDecision, UpstreamCounterError> {
        let (hits, started_at) = self.windows.update(ip, now, |current| {
            let window = match current {
                Some(w) => Window {
                    started_at: w.started_at,
                    hits: w.hits.saturating_add(1),
                },
                None => Window {
                    started_at: now,
                    hits: 1,
                },
            };
            let seen = (window.hits, window.started_at);
            (window, seen)
        });

        if hits <= self.max_requests {
            return Ok(RateDecision::Allowed {
                remaining: self.max_requests - hits,
            });
        }

        let retry_after = self
            .windows
            .ttl()
            .checked_sub(&now.signed_duration_since(started_at))
            .unwrap_or(Duration::MAX);
        debug!(ip = %ip, hits, limit = self.max_requests, "Rate window exhausted");
        Ok(RateDecision::Limited {
            retry_after: retry_after.max(Duration::zero()),
        })
    }

    fn cleanup(&self, now: DateTime<Utc>) {
        self.windows.purge_expired(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter(max_requests: u64, window_ms: u64) -> FixedWindowCounter {
        FixedWindowCounter::new(&RateLimitConfig { window_ms, max_requests })
    }

    #[test]
    fn admits_up_to_the_limit_then_rejects() {
        let counter = counter(10, 3_000);
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        let t0 = Utc::now();

        for i in 0..10 {
            let decision = counter.hit(ip, t0 + Duration::milliseconds(i * 10)).unwrap();
            assert_eq!(decision, RateDecision::Allowed { remaining: 9 - i as u64 });
        }
        match counter.hit(ip, t0 + Duration::milliseconds(100)).unwrap() {
            RateDecision::Limited { retry_after } => {
                assert_eq!(retry_after, Duration::milliseconds(2_900));
            }
            other => panic!("expected limit, got {other:?}"),
        }
    }

    #[test]
    fn new_window_resets_quota() {
        let counter = counter(1, 1_000);
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        let t0 = Utc::now();

        assert!(matches!(counter.hit(ip, t0).unwrap(), RateDecision::Allowed { .. }));
        assert!(matches!(counter.hit(ip, t0).unwrap(), RateDecision::Limited { .. }));
        assert!(matches!(
            counter.hit(ip, t0 + Duration::milliseconds(1_000)).unwrap(),
            RateDecision::Allowed { remaining: 0 }
        ));
    }

    #[test]
    fn identities_are_counted_separately() {
        let counter = counter(1, 1_000);
        let t0 = Utc::now();
        assert!(matches!(counter.hit("1.1.1.1".parse().unwrap(), t0).unwrap(), RateDecision::Allowed { .. }));
        assert!(matches!(counter.hit("2.2.2.2".parse().unwrap(), t0).unwrap(), RateDecision::Allowed { .. }));
    }
}
