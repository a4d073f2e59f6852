use std::fmt;

use serde::{Deserialize, Serialize};

/// What the admission layer did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatAction {
    /// Request forwarded downstream.
    Admit,
    /// Request rejected for this window only (429); the caller is not blocked.
    Warn,
    /// Caller is (or has just been) placed on the blocklist.
    Block,
}

impl fmt::Display for ThreatAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreatAction::Admit => write!(f, "admit"),
            ThreatAction::Warn => write!(f, "warn"),
            ThreatAction::Block => write!(f, "block"),
        }
    }
}

/// Which detector produced a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockType {
    #[serde(rename = "none")]
    None,
    RateLimit,
    #[serde(rename = "IPBlocked")]
    IpBlocked,
    AdFraud,
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockType::None => write!(f, "none"),
            BlockType::RateLimit => write!(f, "RateLimit"),
            BlockType::IpBlocked => write!(f, "IPBlocked"),
            BlockType::AdFraud => write!(f, "AdFraud"),
        }
    }
}

/// Block reason recorded when the violation escalator promotes an identity.
pub const REASON_RATE_VIOLATIONS: &str = "rate-limit violation threshold exceeded";
/// Block reason recorded when the click-velocity detector flags a bot.
pub const REASON_CLICK_VELOCITY: &str = "click-velocity threshold exceeded";
/// Reason recorded on a 429 rejection.
pub const REASON_RATE_LIMITED: &str = "rate limit exceeded";
/// Verdict reason for clicks from identities that are already blocked.
pub const REASON_ALREADY_BLOCKED: &str = "already blocked";
