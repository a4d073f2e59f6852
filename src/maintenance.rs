use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::protection::click_velocity::ClickVelocityDetector;
use crate::protection::escalator::ViolationEscalator;
use crate::protection::rate_limiter::RateCounter;
use crate::storage::blocklist::BlocklistStore;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub blocks: usize,
    pub violation_counters: usize,
    pub click_trackers: usize,
}

/// Periodic eviction of expired state from every component.
pub struct Sweeper {
    pub blocklist: Arc<BlocklistStore>,
    pub escalator: Arc<ViolationEscalator>,
    pub clicks: Arc<ClickVelocityDetector>,
    pub rate_counter: Arc<dyn RateCounter>,
}

impl Sweeper {
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        self.rate_counter.cleanup(now);
        SweepReport {
            blocks: self.blocklist.purge_expired(now),
            violation_counters: self.escalator.cleanup(now),
            click_trackers: self.clicks.cleanup(now),
        }
    }
}

/// Background task: sweep every `period` until the runtime shuts down.
pub async fn cleanup_loop(sweeper: Sweeper, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let report = sweeper.sweep(Utc::now());
        debug!(
            blocks = report.blocks,
            violation_counters = report.violation_counters,
            click_trackers = report.click_trackers,
            "Expired state swept"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::Settings;
    use crate::protection::rate_limiter::FixedWindowCounter;
    use crate::storage::blocklist::Expiry;
    use crate::storage::sqlite::SqliteBackend;
    use crate::test_support::{click_from, request_from, RecordingSink};

    #[test]
    fn sweep_evicts_from_every_component() {
        let t0 = Utc::now();
        let settings = Settings::default();
        let sink = Arc::new(RecordingSink::default());
        let blocklist = Arc::new(BlocklistStore::open(
            Arc::new(SqliteBackend::in_memory().unwrap()),
            sink.clone(),
            1,
            t0,
        ));
        let escalator = Arc::new(ViolationEscalator::new(
            &settings.escalation,
            blocklist.clone(),
            sink.clone(),
        ));
        let clicks = Arc::new(ClickVelocityDetector::new(
            &settings.click_velocity,
            blocklist.clone(),
            sink.clone(),
        ));
        let sweeper = Sweeper {
            blocklist: blocklist.clone(),
            escalator: escalator.clone(),
            clicks: clicks.clone(),
            rate_counter: Arc::new(FixedWindowCounter::new(&settings.rate_limit)),
        };

        blocklist.block("1.1.1.1".parse().unwrap(), "r", Expiry::after(t0, chrono::Duration::seconds(1)), t0);
        escalator.record_violation(&request_from("2.2.2.2", t0));
        clicks.check_click(&click_from("3.3.3.3", t0));

        assert_eq!(sweeper.sweep(t0), SweepReport::default());

        let later = t0 + chrono::Duration::minutes(5);
        assert_eq!(
            sweeper.sweep(later),
            SweepReport {
                blocks: 1,
                violation_counters: 1,
                click_trackers: 1,
            }
        );
    }
}
