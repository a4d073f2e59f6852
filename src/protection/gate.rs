use std::sync::Arc;

use axum::http::StatusCode;
use chrono::Duration;
use tracing::{debug, warn};

use crate::audit::AuditSink;
use crate::models::decision::DecisionRecord;
use crate::models::request::RequestContext;
use crate::models::threat::{BlockType, ThreatAction, REASON_RATE_LIMITED};
use crate::storage::blocklist::BlocklistStore;
use crate::storage::memory::{CounterStore, MemoryCounterStore};

use super::escalator::{ViolationCounter, ViolationEscalator};
use super::rate_limiter::{RateCounter, RateDecision};

/// What to do with one inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Admit {
        /// Quota left in the caller's window. `None` when the rate counter
        /// could not be consulted.
        remaining: Option<u64>,
        degraded: bool,
    },
    /// The caller is on the blocklist (403).
    Forbidden { reason: String },
    /// The caller exceeded its window (429). `violations` is the running
    /// count inside the violation window, including this one.
    TooManyRequests { retry_after: Duration, violations: u32 },
}

impl GateDecision {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GateDecision::Admit { .. } => StatusCode::OK,
            GateDecision::Forbidden { .. } => StatusCode::FORBIDDEN,
            GateDecision::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

/// Admission check run before every request reaches a handler.
///
/// Order: blocklist, then the rate counter, then (on a 429) the violation
/// escalator. An unreachable rate counter fails open.
pub struct AdmissionGate<S = MemoryCounterStore<ViolationCounter>> {
    blocklist: Arc<BlocklistStore>,
    rate_counter: Arc<dyn RateCounter>,
    escalator: Arc<ViolationEscalator<S>>,
    audit: Arc<dyn AuditSink>,
    log_admitted: bool,
}

impl<S> AdmissionGate<S>
where
    S: CounterStore<ViolationCounter>,
{
    pub fn new(
        blocklist: Arc<BlocklistStore>,
        rate_counter: Arc<dyn RateCounter>,
        escalator: Arc<ViolationEscalator<S>>,
        audit: Arc<dyn AuditSink>,
        log_admitted: bool,
    ) -> Self {
        Self {
            blocklist,
            rate_counter,
            escalator,
            audit,
            log_admitted,
        }
    }

    pub fn check(&self, ctx: &RequestContext) -> GateDecision {
        let ip = ctx.client_ip;
        let now = ctx.received_at;

        if let Some(entry) = self.blocklist.is_blocked(&ip, now) {
            debug!(ip = %ip, reason = %entry.reason, "Rejecting blocked identity");
            self.audit.record(
                &DecisionRecord::new(ctx, ThreatAction::Block, BlockType::IpBlocked).reason(entry.reason.clone()),
            );
            return GateDecision::Forbidden { reason: entry.reason };
        }

        match self.rate_counter.hit(ip, now) {
            Ok(RateDecision::Allowed { remaining }) => {
                if self.log_admitted {
                    self.audit.record(
                        &DecisionRecord::new(ctx, ThreatAction::Admit, BlockType::None).remaining_quota(remaining),
                    );
                }
                GateDecision::Admit {
                    remaining: Some(remaining),
                    degraded: false,
                }
            }
            Ok(RateDecision::Limited { retry_after }) => {
                let violations = self.escalator.record_violation(ctx).count();
                self.audit.record(
                    &DecisionRecord::new(ctx, ThreatAction::Warn, BlockType::RateLimit)
                        .reason(REASON_RATE_LIMITED)
                        .remaining_quota(0)
                        .violation_count(violations),
                );
                GateDecision::TooManyRequests {
                    retry_after,
                    violations,
                }
            }
            Err(e) => {
                warn!(ip = %ip, error = %e, "Rate counter unavailable; admitting");
                self.audit.record(
                    &DecisionRecord::new(ctx, ThreatAction::Admit, BlockType::None)
                        .reason(e.to_string())
                        .degraded(),
                );
                GateDecision::Admit {
                    remaining: None,
                    degraded: true,
                }
            }
        }
    }

    pub fn blocklist(&self) -> &Arc<BlocklistStore> {
        &self.blocklist
    }
}
