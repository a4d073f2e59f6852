use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::request::RequestContext;
use super::threat::{BlockType, ThreatAction};

/// One admission decision, as handed to the audit sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRecord {
    pub timestamp: DateTime<Utc>,
    pub identity: IpAddr,
    pub forwarded_for: Option<String>,
    pub method: String,
    pub path: String,
    pub user_agent: String,
    pub action: ThreatAction,
    pub block_type: BlockType,
    pub reason: Option<String>,
    pub remaining_quota: Option<u64>,
    /// Set when the decision was made without one of its inputs (fail open).
    #[serde(default)]
    pub degraded: bool,
    pub violation_count: Option<u32>,
    pub click_count: Option<u32>,
}

impl DecisionRecord {
    pub fn new(ctx: &RequestContext, action: ThreatAction, block_type: BlockType) -> Self {
        Self {
            timestamp: ctx.received_at,
            identity: ctx.client_ip,
            forwarded_for: ctx.forwarded_for.clone(),
            method: ctx.method.clone(),
            path: ctx.path.clone(),
            user_agent: ctx.user_agent.clone().unwrap_or_else(|| "unknown".to_string()),
            action,
            block_type,
            reason: None,
            remaining_quota: None,
            degraded: false,
            violation_count: None,
            click_count: None,
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn remaining_quota(mut self, remaining: u64) -> Self {
        self.remaining_quota = Some(remaining);
        self
    }

    pub fn degraded(mut self) -> Self {
        self.degraded = true;
        self
    }

    pub fn violation_count(mut self, count: u32) -> Self {
        self.violation_count = Some(count);
        self
    }

    pub fn click_count(mut self, count: u32) -> Self {
        self.click_count = Some(count);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_audit_field_names() {
        let ctx = RequestContext::new("1.2.3.4".parse().unwrap(), "GET", "/")
            .with_forwarded_for(Some("9.9.9.9".to_string()));
        let record = DecisionRecord::new(&ctx, ThreatAction::Warn, BlockType::RateLimit)
            .reason("rate limit exceeded")
            .remaining_quota(0);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["identity"], "1.2.3.4");
        assert_eq!(json["forwardedFor"], "9.9.9.9");
        assert_eq!(json["userAgent"], "unknown");
        assert_eq!(json["action"], "warn");
        assert_eq!(json["blockType"], "RateLimit");
        assert_eq!(json["remainingQuota"], 0);
        assert_eq!(json["degraded"], false);
    }
}
