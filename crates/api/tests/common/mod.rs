#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use tower::ServiceExt;
use warden_core::clock::ManualClock;
use warden_core::rate_limit::{MemoryRateLimitStore, RateLimitPolicy};
use warden_core::session::MemorySessionStore;
use warden_core::users::{MemoryUserDirectory, UserCredentials};
use warden_core::visitor::{MemoryVisitorStore, VisitPolicy};

use warden_api::auth::jwt::JwtConfig;
use warden_api::auth::password::hash_password;
use warden_api::config::{RateLimitBackend, ServerConfig, StoreBackend};
use warden_api::router::build_app_router;
use warden_api::state::{AppState, Backends};

pub const TEST_PASSWORD: &str = "test_password_123!";

/// Build a test `ServerConfig` over in-memory backends.
///
/// Uses `http://localhost:5173` as CORS origin (matching the dev default),
/// a 30-second request timeout and the production rate-limit defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        jwt: JwtConfig {
            secret: "test-secret-that-is-long-enough-for-hs256".to_string(),
            access_token_expiry_mins: 15,
            refresh_token_expiry_days: 7,
        },
        store_backend: StoreBackend::Memory,
        database_url: None,
        rate_limit_backend: RateLimitBackend::Memory,
        redis_url: None,
        login_rate_limit: RateLimitPolicy::new(5, 300, 900),
        refresh_rate_limit: RateLimitPolicy::new(30, 60, 300),
        visit_policy: VisitPolicy::default(),
        identity_hash_salt: "test-salt".to_string(),
        retention_days: 30,
        counter_reap_interval_secs: 600,
    }
}

/// Handles onto the in-memory backends behind a test app.
pub struct TestApp {
    pub router: Router,
    pub clock: Arc<ManualClock>,
    pub users: Arc<MemoryUserDirectory>,
    pub sessions: Arc<MemorySessionStore>,
    pub visitors: Arc<MemoryVisitorStore>,
}

impl TestApp {
    /// A fresh clone of the router for one `oneshot` request.
    pub fn app(&self) -> Router {
        self.router.clone()
    }

    /// Seed a user with [`TEST_PASSWORD`].
    pub async fn create_user(&self, id: i64, username: &str, is_active: bool) {
        let password_hash = hash_password(TEST_PASSWORD).expect("hashing should succeed");
        self.users
            .insert(UserCredentials {
                id,
                username: username.to_string(),
                password_hash,
                role: "member".to_string(),
                is_active,
            })
            .await;
    }

    pub fn advance(&self, by: Duration) {
        self.clock
            .advance(chrono::Duration::from_std(by).expect("duration in range"));
    }
}

/// Build the full application router over in-memory backends.
///
/// Uses the same [`build_app_router`] as `main.rs` so integration tests
/// exercise the production middleware stack. The clock starts at the real
/// current time so JWT expiry validation agrees with it.
pub fn build_test_app() -> TestApp {
    build_test_app_with(test_config())
}

pub fn build_test_app_with(config: ServerConfig) -> TestApp {
    let clock = Arc::new(ManualClock::starting_at(Utc::now()));
    let users = Arc::new(MemoryUserDirectory::new());
    let sessions = Arc::new(MemorySessionStore::new());
    let visitors = Arc::new(MemoryVisitorStore::new());

    let backends = Backends {
        sessions: sessions.clone(),
        users: users.clone(),
        rate_limits: Arc::new(MemoryRateLimitStore::new()),
        visitors: visitors.clone(),
        clock: clock.clone(),
    };
    let state = AppState::new(config.clone(), backends);
    let router = build_app_router(state, &config);

    TestApp {
        router,
        clock,
        users,
        sessions,
        visitors,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn send(app: Router, request: Request<Body>) -> Response<Body> {
    app.oneshot(request).await.expect("router is infallible")
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn get_auth(app: Router, uri: &str, token: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

pub async fn post_json_auth(
    app: Router,
    uri: &str,
    body: serde_json::Value,
    token: &str,
) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should be readable")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body should be JSON")
}
