use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::models::request::RequestContext;
use crate::protection::gate::GateDecision;

use super::routes::AppState;

const TOO_MANY_REQUESTS: &str = "Too many requests, please try again later.";

/// 403 with the caller-facing denial message.
pub fn access_denied(reason: &str) -> Response {
    denied(StatusCode::FORBIDDEN, reason)
}

fn denied(status: StatusCode, reason: &str) -> Response {
    (status, Json(json!({ "message": format!("Access denied: {}", reason) }))).into_response()
}

fn header_string(req: &Request, name: header::HeaderName) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Identity is the socket peer. `X-Forwarded-For` is carried for the audit
/// trail only.
fn request_context(peer: SocketAddr, req: &Request) -> RequestContext {
    RequestContext::new(peer.ip(), req.method().as_str(), req.uri().path())
        .with_forwarded_for(header_string(req, header::HeaderName::from_static("x-forwarded-for")))
        .with_user_agent(header_string(req, header::USER_AGENT))
}

/// Runs the admission gate in front of every public route. Admitted
/// requests carry their `RequestContext` on to the handler as an extension.
pub async fn admission_middleware(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut req: Request,
    next: Next,
) -> Response {
    let ctx = request_context(peer, &req);

    let decision = state.gate.check(&ctx);
    let status = decision.status_code();

    match decision {
        GateDecision::Admit { remaining, .. } => {
            req.extensions_mut().insert(ctx);
            let mut response = next.run(req).await;
            if let Some(remaining) = remaining {
                response
                    .headers_mut()
                    .insert("x-ratelimit-remaining", HeaderValue::from(remaining));
            }
            response
        }
        GateDecision::Forbidden { reason } => denied(status, &reason),
        GateDecision::TooManyRequests { retry_after, .. } => {
            let secs = (retry_after.num_milliseconds().max(0) as u64).div_ceil(1_000);
            (
                status,
                [(header::RETRY_AFTER, HeaderValue::from(secs))],
                Json(json!({ "message": TOO_MANY_REQUESTS })),
            )
                .into_response()
        }
    }
}
