use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::models::request::RequestContext;
use crate::protection::click_velocity::ClickVelocityDetector;
use crate::protection::gate::AdmissionGate;
use crate::storage::blocklist::{BlocklistStore, Expiry};

use super::admission::access_denied;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<AdmissionGate>,
    pub clicks: Arc<ClickVelocityDetector>,
    pub blocklist: Arc<BlocklistStore>,
    pub api_key: String,
    pub start_time: Instant,
}

#[derive(Debug, Deserialize)]
pub struct AddBlockRequest {
    pub ip: String,
    pub reason: Option<String>,
    /// Omitted for a permanent block.
    pub ttl_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Public
// ---------------------------------------------------------------------------

pub async fn index() -> Json<Value> {
    Json(json!({ "message": "Welcome to the ad server" }))
}

pub async fn record_click(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Response {
    match state.clicks.check_click(&ctx).reason() {
        None => Json(json!({ "message": "Click recorded" })).into_response(),
        Some(reason) => access_denied(reason),
    }
}

pub async fn not_found() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "message": "Not found" })))
}

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

pub async fn get_status(State(state): State<AppState>) -> Json<Value> {
    let now = Utc::now();
    Json(json!({
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "active_blocks": state.blocklist.list_active(now).len(),
        "tracked_click_identities": state.clicks.tracked(),
    }))
}

pub async fn list_blocks(State(state): State<AppState>) -> Json<Value> {
    let entries = state.blocklist.list_active(Utc::now());
    Json(json!({
        "total": entries.len(),
        "entries": entries,
    }))
}

/// Manual block. An identity that is already actively blocked keeps its
/// existing entry and the call answers 409.
pub async fn add_block(
    State(state): State<AppState>,
    Json(body): Json<AddBlockRequest>,
) -> Response {
    let ip: IpAddr = match body.ip.trim().parse() {
        Ok(ip) => ip,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("Invalid IP address: {}", body.ip) })),
            )
                .into_response()
        }
    };

    let now = Utc::now();
    // A TTL too large to represent is treated as permanent.
    let expires = body
        .ttl_secs
        .and_then(|secs| i64::try_from(secs).ok())
        .and_then(Duration::try_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .map_or(Expiry::Never, Expiry::At);
    let reason = body.reason.as_deref().unwrap_or("manual");

    let outcome = state.blocklist.block(ip, reason, expires, now);
    let status = if outcome.is_inserted() {
        StatusCode::CREATED
    } else {
        StatusCode::CONFLICT
    };
    (status, Json(outcome.entry())).into_response()
}

pub async fn remove_block(State(state): State<AppState>, Path(ip): Path<String>) -> StatusCode {
    match ip.parse::<IpAddr>() {
        Ok(ip) if state.blocklist.unblock(&ip) => StatusCode::NO_CONTENT,
        Ok(_) => StatusCode::NOT_FOUND,
        Err(_) => StatusCode::BAD_REQUEST,
    }
}
