pub mod admission;
pub mod auth;
pub mod routes;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use routes::AppState;

/// Build the full HTTP surface: public routes behind the admission gate,
/// admin routes behind the API key.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let public = Router::new()
        .route("/", get(routes::index))
        .route("/ads/click", post(routes::record_click))
        .fallback(routes::not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admission::admission_middleware,
        ));

    let admin = Router::new()
        .route("/admin/status", get(routes::get_status))
        .route(
            "/admin/blocks",
            get(routes::list_blocks).post(routes::add_block),
        )
        .route("/admin/blocks/{ip}", delete(routes::remove_block))
        .layer(middleware::from_fn_with_state(
            state.api_key.clone(),
            auth::auth_middleware,
        ));

    public
        .merge(admin)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Instant;

    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::config::settings::{ClickVelocityConfig, EscalationConfig, RateLimitConfig};
    use crate::protection::click_velocity::ClickVelocityDetector;
    use crate::protection::escalator::ViolationEscalator;
    use crate::protection::gate::AdmissionGate;
    use crate::protection::rate_limiter::FixedWindowCounter;
    use crate::storage::blocklist::BlocklistStore;
    use crate::storage::sqlite::SqliteBackend;
    use crate::test_support::RecordingSink;

    const KEY: &str = "test-key";

    fn state(max_requests: u64) -> AppState {
        let sink = Arc::new(RecordingSink::default());
        let blocklist = Arc::new(BlocklistStore::open(
            Arc::new(SqliteBackend::in_memory().unwrap()),
            sink.clone(),
            1,
            Utc::now(),
        ));
        let escalator = Arc::new(ViolationEscalator::new(
            &EscalationConfig {
                violation_threshold: 3,
                violation_expiration_secs: 20,
                block_duration_ms: 10_000,
            },
            blocklist.clone(),
            sink.clone(),
        ));
        let counter = Arc::new(FixedWindowCounter::new(&RateLimitConfig {
            window_ms: 60_000,
            max_requests,
        }));
        let clicks = Arc::new(ClickVelocityDetector::new(
            &ClickVelocityConfig {
                max_clicks: 5,
                minimum_click_interval_ms: 60_000,
                tracker_expiration_ms: 120_000,
                block_duration_ms: 10_000,
            },
            blocklist.clone(),
            sink.clone(),
        ));
        AppState {
            gate: Arc::new(AdmissionGate::new(blocklist.clone(), counter, escalator, sink, false)),
            clicks,
            blocklist,
            api_key: KEY.to_string(),
            start_time: Instant::now(),
        }
    }

    fn request(method: &str, uri: &str, peer: &str) -> axum::http::request::Builder {
        let peer: SocketAddr = peer.parse().unwrap();
        Request::builder()
            .method(method)
            .uri(uri)
            .extension(ConnectInfo(peer))
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn admitted_request_reaches_the_handler() {
        let app = build_router(state(10));
        let response = app
            .oneshot(request("GET", "/", "1.2.3.4:5000").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "9");
    }

    #[tokio::test]
    async fn exhausted_window_answers_429() {
        let app = build_router(state(1));
        let first = app
            .clone()
            .oneshot(request("GET", "/", "1.2.3.4:5000").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(request("GET", "/", "1.2.3.4:5001").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().contains_key("retry-after"));
        assert_eq!(
            json_body(second).await["message"],
            "Too many requests, please try again later."
        );
    }

    #[tokio::test]
    async fn blocked_identity_gets_403_with_reason() {
        let state = state(10);
        state
            .blocklist
            .block("1.2.3.4".parse().unwrap(), "manual", crate::storage::blocklist::Expiry::Never, Utc::now());
        let app = build_router(state);

        let response = app
            .oneshot(
                request("GET", "/", "1.2.3.4:5000")
                    .header("x-forwarded-for", "8.8.8.8")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(response).await["message"], "Access denied: manual");
    }

    #[tokio::test]
    async fn rapid_clicks_are_denied() {
        let app = build_router(state(100));
        for _ in 0..4 {
            let response = app
                .clone()
                .oneshot(request("POST", "/ads/click", "5.6.7.8:4000").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let fifth = app
            .clone()
            .oneshot(request("POST", "/ads/click", "5.6.7.8:4000").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(fifth.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            json_body(fifth).await["message"],
            "Access denied: click-velocity threshold exceeded"
        );

        // The block now applies to every route.
        let index = app
            .oneshot(request("GET", "/", "5.6.7.8:4001").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(index.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn admin_routes_require_the_key() {
        let app = build_router(state(10));
        let response = app
            .oneshot(request("GET", "/admin/blocks", "127.0.0.1:9000").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn admin_can_block_list_and_unblock() {
        let app = build_router(state(10));

        let created = app
            .clone()
            .oneshot(
                request("POST", "/admin/blocks", "127.0.0.1:9000")
                    .header(auth::API_KEY_HEADER, KEY)
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"ip":"9.9.9.9","reason":"abuse","ttl_secs":600}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);

        let duplicate = app
            .clone()
            .oneshot(
                request("POST", "/admin/blocks", "127.0.0.1:9000")
                    .header(auth::API_KEY_HEADER, KEY)
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"ip":"9.9.9.9","reason":"other"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(duplicate.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(duplicate).await["reason"], "abuse");

        let listed = app
            .clone()
            .oneshot(
                request("GET", "/admin/blocks", "127.0.0.1:9000")
                    .header(auth::API_KEY_HEADER, KEY)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let listed = json_body(listed).await;
        assert_eq!(listed["total"], 1);
        assert_eq!(listed["entries"][0]["ip"], "9.9.9.9");

        let removed = app
            .clone()
            .oneshot(
                request("DELETE", "/admin/blocks/9.9.9.9", "127.0.0.1:9000")
                    .header(auth::API_KEY_HEADER, KEY)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(removed.status(), StatusCode::NO_CONTENT);

        let missing = app
            .oneshot(
                request("DELETE", "/admin/blocks/9.9.9.9", "127.0.0.1:9000")
                    .header(auth::API_KEY_HEADER, KEY)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
