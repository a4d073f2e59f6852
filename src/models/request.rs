use std::net::IpAddr;

use chrono::{DateTime, Utc};

/// Per-request metadata handed to the admission layer by the HTTP binding.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Direct connection address. Every piece of per-client state is keyed
    /// on this, never on a header the client controls.
    pub client_ip: IpAddr,

    /// Raw `X-Forwarded-For` value, kept for the audit trail only.
    pub forwarded_for: Option<String>,

    pub method: String,

    pub path: String,

    pub user_agent: Option<String>,

    /// Decision time for every detector touched by this request.
    pub received_at: DateTime<Utc>,
}

impl RequestContext {
    pub fn new(client_ip: IpAddr, method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            client_ip,
            forwarded_for: None,
            method: method.into(),
            path: path.into(),
            user_agent: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_forwarded_for(mut self, value: Option<String>) -> Self {
        self.forwarded_for = value;
        self
    }

    pub fn with_user_agent(mut self, value: Option<String>) -> Self {
        self.user_agent = value;
        self
    }

    pub fn at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }
}
