//! Inline request-admission layer: a persistent blocklist, rate-violation
//! escalation and click-velocity (ad fraud) detection in front of an HTTP
//! application.

pub mod audit;
pub mod config;
pub mod error;
pub mod maintenance;
pub mod models;
pub mod protection;
pub mod server;
pub mod storage;

#[cfg(test)]
mod test_support;
