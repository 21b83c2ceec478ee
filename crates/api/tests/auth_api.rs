//! HTTP-level integration tests for login, refresh rotation, reuse detection,
//! logout and session listing.

mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::header::RETRY_AFTER;
use axum::http::{Method, Request, StatusCode};
use common::{body_json, get, get_auth, post_json, post_json_auth, send, TestApp, TEST_PASSWORD};
use serde_json::json;
use warden_core::hashing::generate_refresh_token;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn login_user(test: &TestApp, username: &str) -> serde_json::Value {
    let body = json!({ "username": username, "password": TEST_PASSWORD });
    let response = post_json(test.app(), "/api/v1/auth/login", body).await;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

async fn refresh(test: &TestApp, refresh_token: &str) -> axum::http::Response<Body> {
    let body = json!({ "refresh_token": refresh_token });
    post_json(test.app(), "/api/v1/auth/refresh", body).await
}

fn str_field<'a>(json: &'a serde_json::Value, field: &str) -> &'a str {
    json[field]
        .as_str()
        .unwrap_or_else(|| panic!("missing string field {field}"))
}

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

#[tokio::test]
async fn login_returns_token_pair_and_opens_session() {
    let test = common::build_test_app();
    test.create_user(1, "alice", true).await;

    let json = login_user(&test, "alice").await;

    assert!(json["access_token"].is_string());
    assert_eq!(str_field(&json, "refresh_token").len(), 64);
    assert_eq!(json["expires_in"], 15 * 60);

    let sessions = test.sessions.all_for_user(1).await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session_id, str_field(&json, "session_id"));
    assert!(sessions[0].rotated_at.is_none());
}

#[tokio::test]
async fn login_with_wrong_password_is_unauthorized() {
    let test = common::build_test_app();
    test.create_user(1, "alice", true).await;

    let body = json!({ "username": "alice", "password": "incorrect_password" });
    let response = post_json(test.app(), "/api/v1/auth/login", body).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn login_with_unknown_user_is_unauthorized() {
    let test = common::build_test_app();

    let body = json!({ "username": "nobody", "password": TEST_PASSWORD });
    let response = post_json(test.app(), "/api/v1/auth/login", body).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_with_deactivated_account_is_forbidden() {
    let test = common::build_test_app();
    test.create_user(1, "alice", false).await;

    let body = json!({ "username": "alice", "password": TEST_PASSWORD });
    let response = post_json(test.app(), "/api/v1/auth/login", body).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(test.sessions.all_for_user(1).await.is_empty());
}

#[tokio::test]
async fn login_is_locked_after_limit_with_retry_after() {
    let test = common::build_test_app();
    test.create_user(1, "alice", true).await;

    let wrong = json!({ "username": "alice", "password": "nope" });
    for _ in 0..5 {
        let response = post_json(test.app(), "/api/v1/auth/login", wrong.clone()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // Even the right password is refused while the lock holds.
    let right = json!({ "username": "alice", "password": TEST_PASSWORD });
    let response = post_json(test.app(), "/api/v1/auth/login", right.clone()).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[RETRY_AFTER], "900");
    let json = body_json(response).await;
    assert_eq!(json["code"], "RATE_LIMITED");
    assert_eq!(json["remaining"], 0);
    assert!(json["blocked_until_ms"].is_number());

    test.advance(Duration::from_secs(901));
    let response = post_json(test.app(), "/api/v1/auth/login", right).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn login_limit_is_per_client_identity() {
    let test = common::build_test_app();
    test.create_user(1, "alice", true).await;

    let wrong = json!({ "username": "alice", "password": "nope" });
    for _ in 0..6 {
        post_json(test.app(), "/api/v1/auth/login", wrong.clone()).await;
    }

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/auth/login")
        .header("content-type", "application/json")
        .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
        .body(Body::from(
            json!({ "username": "alice", "password": TEST_PASSWORD }).to_string(),
        ))
        .unwrap();
    let response = send(test.app(), request).await;

    assert_eq!(response.status(), StatusCode::OK);
}

// ---------------------------------------------------------------------------
// Refresh
// ---------------------------------------------------------------------------

#[tokio::test]
async fn refresh_rotates_session() {
    let test = common::build_test_app();
    test.create_user(1, "alice", true).await;
    let first = login_user(&test, "alice").await;

    let response = refresh(&test, str_field(&first, "refresh_token")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let second = body_json(response).await;

    assert_ne!(second["refresh_token"], first["refresh_token"]);
    assert_ne!(second["session_id"], first["session_id"]);

    let sessions = test.sessions.all_for_user(1).await;
    assert_eq!(sessions.len(), 2);
    let old = sessions
        .iter()
        .find(|s| s.session_id == str_field(&first, "session_id"))
        .expect("old session kept");
    assert!(old.rotated_at.is_some());
    assert_eq!(old.replaced_by.as_deref(), Some(str_field(&second, "session_id")));
}

#[tokio::test]
async fn successor_is_created_after_predecessor_when_clock_stalls_or_steps_back() {
    let test = common::build_test_app();
    test.create_user(1, "alice", true).await;
    let first = login_user(&test, "alice").await;

    let second = body_json(refresh(&test, str_field(&first, "refresh_token")).await).await;

    test.clock.advance(chrono::Duration::seconds(-5));
    let response = refresh(&test, str_field(&second, "refresh_token")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let third = body_json(response).await;

    let sessions = test.sessions.all_for_user(1).await;
    let created = |id: &str| {
        sessions
            .iter()
            .find(|s| s.session_id == id)
            .map(|s| s.created_at)
            .expect("session stored")
    };
    let chain = [
        created(str_field(&first, "session_id")),
        created(str_field(&second, "session_id")),
        created(str_field(&third, "session_id")),
    ];
    assert!(chain[0] < chain[1]);
    assert!(chain[1] < chain[2]);

    let response = get_auth(
        test.app(),
        "/api/v1/auth/sessions",
        str_field(&third, "access_token"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let listed = body_json(response).await;
    assert_eq!(listed["data"][0]["session_id"], third["session_id"]);
}

#[tokio::test]
async fn replayed_refresh_token_revokes_every_session() {
    let test = common::build_test_app();
    test.create_user(1, "alice", true).await;
    let a = login_user(&test, "alice").await;
    let other_device = login_user(&test, "alice").await;

    let b = body_json(refresh(&test, str_field(&a, "refresh_token")).await).await;

    // A is presented again after it was rotated.
    let response = refresh(&test, str_field(&a, "refresh_token")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "REFRESH_REUSE_DETECTED");

    assert!(test
        .sessions
        .all_for_user(1)
        .await
        .iter()
        .all(|s| s.revoked_at.is_some()));

    for token in [str_field(&b, "refresh_token"), str_field(&other_device, "refresh_token")] {
        let response = refresh(&test, token).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["code"], "SESSION_REVOKED");
    }
}

#[tokio::test]
async fn malformed_refresh_token_is_a_validation_error() {
    let test = common::build_test_app();

    let response = refresh(&test, "not-a-refresh-token").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn unknown_refresh_token_is_not_found() {
    let test = common::build_test_app();
    let (token, _hash) = generate_refresh_token();

    let response = refresh(&test, &token).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn expired_session_cannot_refresh() {
    let test = common::build_test_app();
    test.create_user(1, "alice", true).await;
    let login = login_user(&test, "alice").await;

    test.advance(Duration::from_secs(8 * 24 * 3600));
    let response = refresh(&test, str_field(&login, "refresh_token")).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "SESSION_EXPIRED");
}

#[tokio::test]
async fn deactivated_user_cannot_refresh() {
    let test = common::build_test_app();
    test.create_user(1, "alice", true).await;
    let login = login_user(&test, "alice").await;
    test.users.set_active("alice", false).await;

    let response = refresh(&test, str_field(&login, "refresh_token")).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

// ---------------------------------------------------------------------------
// Logout and session listing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn logout_revokes_current_session() {
    let test = common::build_test_app();
    test.create_user(1, "alice", true).await;
    let login = login_user(&test, "alice").await;
    let access = str_field(&login, "access_token");

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/auth/logout")
        .header("authorization", format!("Bearer {access}"))
        .body(Body::empty())
        .unwrap();
    let response = send(test.app(), request).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = refresh(&test, str_field(&login, "refresh_token")).await;
    assert_eq!(body_json(response).await["code"], "SESSION_REVOKED");
}

#[tokio::test]
async fn logout_all_revokes_every_session() {
    let test = common::build_test_app();
    test.create_user(1, "alice", true).await;
    let first = login_user(&test, "alice").await;
    let second = login_user(&test, "alice").await;

    let response = post_json_auth(
        test.app(),
        "/api/v1/auth/logout",
        json!({ "all": true }),
        str_field(&second, "access_token"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert!(test
        .sessions
        .all_for_user(1)
        .await
        .iter()
        .all(|s| s.revoked_at.is_some()));
    let response = refresh(&test, str_field(&first, "refresh_token")).await;
    assert_eq!(body_json(response).await["code"], "SESSION_REVOKED");
}

#[tokio::test]
async fn logout_of_another_users_session_is_forbidden() {
    let test = common::build_test_app();
    test.create_user(1, "alice", true).await;
    test.create_user(2, "bob", true).await;
    let alice = login_user(&test, "alice").await;
    let bob = login_user(&test, "bob").await;

    let response = post_json_auth(
        test.app(),
        "/api/v1/auth/logout",
        json!({ "session_id": str_field(&bob, "session_id") }),
        str_field(&alice, "access_token"),
    )
    .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = refresh(&test, str_field(&bob, "refresh_token")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn logout_with_invalid_body_is_bad_request() {
    let test = common::build_test_app();
    test.create_user(1, "alice", true).await;
    let login = login_user(&test, "alice").await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/auth/logout")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", str_field(&login, "access_token")))
        .body(Body::from("{not json"))
        .unwrap();
    let response = send(test.app(), request).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn list_sessions_shows_live_sessions_and_marks_current() {
    let test = common::build_test_app();
    test.create_user(1, "alice", true).await;
    let first = login_user(&test, "alice").await;
    let second = login_user(&test, "alice").await;
    // Rotating the first leaves its successor live and itself not.
    let rotated = body_json(refresh(&test, str_field(&first, "refresh_token")).await).await;

    let response = get_auth(
        test.app(),
        "/api/v1/auth/sessions",
        str_field(&second, "access_token"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let data = json["data"].as_array().expect("data array");

    assert_eq!(data.len(), 2);
    let ids: Vec<&str> = data
        .iter()
        .map(|s| s["session_id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&str_field(&second, "session_id")));
    assert!(ids.contains(&str_field(&rotated, "session_id")));
    let current: Vec<_> = data.iter().filter(|s| s["current"] == true).collect();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0]["session_id"], second["session_id"]);
}

#[tokio::test]
async fn session_listing_requires_bearer_token() {
    let test = common::build_test_app();

    let response = get(test.app(), "/api/v1/auth/sessions").await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
