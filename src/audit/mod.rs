//! Consumers of admission decisions.
//!
//! The decision engine only produces [`DecisionRecord`]s; where they end up
//! (structured logs, a JSON-lines file, several at once) is decided at
//! wiring time.

pub mod decision_log;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::PersistenceError;
use crate::models::decision::DecisionRecord;
use crate::models::threat::ThreatAction;

pub use decision_log::DecisionLog;

pub trait AuditSink: Send + Sync {
    fn record(&self, record: &DecisionRecord);

    /// A blocklist read or write failed. The request path has already
    /// carried on; this is only for visibility.
    fn persistence_failure(&self, operation: &'static str, error: &PersistenceError) {
        warn!(operation, error = %error, "Blocklist persistence failure");
    }
}

/// Emits every decision as a structured `tracing` event.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, r: &DecisionRecord) {
        match r.action {
            ThreatAction::Admit if r.degraded => warn!(
                ip = %r.identity,
                method = %r.method,
                path = %r.path,
                reason = r.reason.as_deref().unwrap_or("-"),
                "Admitted in degraded mode"
            ),
            ThreatAction::Admit => debug!(
                ip = %r.identity,
                method = %r.method,
                path = %r.path,
                remaining = r.remaining_quota,
                "Admitted"
            ),
            ThreatAction::Warn => info!(
                ip = %r.identity,
                forwarded_for = r.forwarded_for.as_deref().unwrap_or("-"),
                block_type = %r.block_type,
                reason = r.reason.as_deref().unwrap_or("-"),
                violations = r.violation_count,
                "Request rejected"
            ),
            ThreatAction::Block => warn!(
                ip = %r.identity,
                forwarded_for = r.forwarded_for.as_deref().unwrap_or("-"),
                block_type = %r.block_type,
                reason = r.reason.as_deref().unwrap_or("-"),
                violations = r.violation_count,
                clicks = r.click_count,
                user_agent = %r.user_agent,
                "Request blocked"
            ),
        }
    }
}

/// Fans every event out to several sinks in order.
#[derive(Default)]
pub struct AuditChain {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl AuditChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl AuditSink for AuditChain {
    fn record(&self, record: &DecisionRecord) {
        for sink in &self.sinks {
            sink.record(record);
        }
    }

    fn persistence_failure(&self, operation: &'static str, error: &PersistenceError) {
        for sink in &self.sinks {
            sink.persistence_failure(operation, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::request::RequestContext;
    use crate::models::threat::BlockType;
    use crate::test_support::RecordingSink;

    #[test]
    fn chain_fans_out_records_and_failures() {
        let a = Arc::new(RecordingSink::default());
        let b = Arc::new(RecordingSink::default());
        let chain = AuditChain::new().with(a.clone()).with(b.clone());

        let ctx = RequestContext::new("1.2.3.4".parse().unwrap(), "GET", "/");
        chain.record(&DecisionRecord::new(&ctx, ThreatAction::Block, BlockType::IpBlocked));
        chain.persistence_failure("block", &PersistenceError::Io(std::io::Error::other("disk full")));

        assert_eq!(a.records().len(), 1);
        assert_eq!(b.records().len(), 1);
        assert_eq!(a.failures(), vec!["block"]);
        assert_eq!(b.failures(), vec!["block"]);
    }
}
