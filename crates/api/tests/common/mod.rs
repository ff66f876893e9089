#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use busline_api::auth::jwt::{Claims, JwtConfig};
use busline_api::config::ServerConfig;
use busline_api::router::build_app_router;
use busline_api::state::AppState;
use busline_core::observation::ObservationInput;
use busline_engine::catalog::StaticCatalog;
use busline_engine::{Engine, EngineConfig};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use http_body_util::BodyExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use tower::ServiceExt;

pub const TEST_JWT_SECRET: &str = "integration-test-secret";

/// Build a test `ServerConfig` with safe defaults.
///
/// Uses `http://localhost:5173` as CORS origin (matching the dev default)
/// and a 30-second request timeout.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        database_url: None,
        catalog_url: None,
        prediction_sweep_interval_secs: 600,
        auto_generate_interval_secs: 0,
        jwt: JwtConfig {
            secret: TEST_JWT_SECRET.to_string(),
        },
    }
}

/// In-memory engine that knows buses `B1`, `B2`, lines `L1`, `L2` and stops
/// `S1`, `S2`.
pub fn test_engine() -> Arc<Engine> {
    let catalog = StaticCatalog::new()
        .with_bus("B1")
        .with_bus("B2")
        .with_line("L1")
        .with_line("L2")
        .with_stop("S1")
        .with_stop("S2");
    Arc::new(Engine::in_memory(EngineConfig::default(), Arc::new(catalog)))
}

/// Build the full application router around `engine`, with the same
/// middleware stack production uses.
pub fn build_test_app(engine: Arc<Engine>) -> Router {
    let config = test_config();
    let state = AppState::new(engine, Arc::new(config.clone()), None);
    build_app_router(state, &config)
}

/// Access token signed with [`TEST_JWT_SECRET`], as the auth service would
/// issue it.
pub fn auth_token() -> String {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: "1".to_string(),
        role: "admin".to_string(),
        exp: now + 15 * 60,
        iat: now,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

// ---------------------------------------------------------------------------
// Observation fixtures
// ---------------------------------------------------------------------------

pub fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Observation arriving at `arrival`, `delay` minutes behind schedule.
pub fn observation_input(
    bus_id: &str,
    line_id: &str,
    stop_id: &str,
    arrival: DateTime<Utc>,
    delay: i64,
    occupancy: Option<f64>,
) -> ObservationInput {
    ObservationInput {
        bus_id: bus_id.to_string(),
        line_id: line_id.to_string(),
        stop_id: stop_id.to_string(),
        scheduled_time: Some(rfc3339(arrival - Duration::minutes(delay))),
        actual_arrival_time: Some(rfc3339(arrival)),
        occupancy,
    }
}

/// Record `delays.len()` hourly arrivals for one series, the newest one hour
/// ago.
pub async fn seed_series(
    engine: &Engine,
    bus_id: &str,
    line_id: &str,
    stop_id: &str,
    delays: &[i64],
) {
    let now = Utc::now();
    for (i, delay) in delays.iter().enumerate() {
        let arrival = now - Duration::hours(delays.len() as i64 - i as i64);
        engine
            .record_observation(&observation_input(
                bus_id, line_id, stop_id, arrival, *delay, None,
            ))
            .await
            .unwrap();
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn send(app: Router, request: Request<Body>) -> Response {
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

/// POST with an empty body and an optional bearer token.
pub async fn post_auth(app: Router, uri: &str, token: Option<&str>) -> Response {
    let mut builder = Request::builder().method(Method::POST).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    send(app, builder.body(Body::empty()).unwrap()).await
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
