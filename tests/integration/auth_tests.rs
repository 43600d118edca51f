//! Admission integration tests.
//!
//! Tests verify:
//! - Bearer token acceptance and rejection
//! - The browser flow: same origin plus a matching anti-forgery token
//! - Bearer-only operator endpoints
//! - Hot reload of the token file

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};

use audio_joiner::{RouterConfig, TokenStore};

use super::test_utils::{
    body_json, csrf_cookie, get, merge_request, test_app, test_app_with_tokens, test_config,
    MultipartBuilder, GOOD_TOKEN, ORIGIN,
};

/// Browser-style merge request carrying an Origin header and the csrf cookie.
fn browser_merge(form: MultipartBuilder, origin: &str, cookie: Option<&str>) -> Request<Body> {
    let body = form.build();
    let mut builder = Request::builder()
        .method("POST")
        .uri("/merge")
        .header("content-type", MultipartBuilder::content_type())
        .header("content-length", body.len())
        .header("origin", origin);
    if let Some(cookie) = cookie {
        builder = builder.header("cookie", format!("csrf_token={}", cookie));
    }
    builder.body(Body::from(body)).unwrap()
}

// =============================================================================
// Bearer Tokens
// =============================================================================

#[tokio::test]
async fn test_valid_bearer_admitted() {
    let app = test_app(test_config());
    let form = MultipartBuilder::new().text("count", "1").mp3("a");

    let response = app.send(merge_request(form, Some(GOOD_TOKEN))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_bearer_forbidden() {
    let app = test_app(test_config());
    let form = MultipartBuilder::new().text("count", "1").mp3("a");

    let response = app.send(merge_request(form, Some("BAD_TOKEN"))).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["error"], "Forbidden");
    assert_eq!(app.concat.calls(), 0);
}

#[tokio::test]
async fn test_no_credentials_without_origin() {
    let app = test_app(test_config());
    let form = MultipartBuilder::new().text("count", "1").mp3("a");

    let response = app.send(merge_request(form, None)).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(response).await["error"],
        "CSRF token missing or invalid"
    );
}

#[tokio::test]
async fn test_cross_origin_without_bearer() {
    let app = test_app(test_config());
    let form = MultipartBuilder::new().text("count", "1").mp3("a");

    let response = app
        .send(browser_merge(form, "http://evil.example", None))
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "Unauthorized");
    assert_eq!(app.concat.calls(), 0);
}

#[tokio::test]
async fn test_cross_origin_with_bearer_admitted() {
    let app = test_app(test_config());
    let body = MultipartBuilder::new().text("count", "1").mp3("a").build();
    let request = Request::builder()
        .method("POST")
        .uri("/merge")
        .header("content-type", MultipartBuilder::content_type())
        .header("origin", "http://evil.example")
        .header("authorization", format!("Bearer {}", GOOD_TOKEN))
        .body(Body::from(body))
        .unwrap();

    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
}

// =============================================================================
// Browser Flow
// =============================================================================

#[tokio::test]
async fn test_form_token_round_trip() {
    let app = test_app(test_config());

    let page = app.send(get("/", None)).await;
    assert_eq!(page.status(), StatusCode::OK);
    let token = csrf_cookie(&page);

    let form = MultipartBuilder::new()
        .text("csrf_token", &token)
        .text("count", "2")
        .mp3("a")
        .mp3("b");
    let response = app.send(browser_merge(form, ORIGIN, Some(&token))).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.concat.calls(), 1);
}

#[tokio::test]
async fn test_csrf_field_after_files_not_seen() {
    let app = test_app(test_config());
    let token = csrf_cookie(&app.send(get("/", None)).await);

    let form = MultipartBuilder::new()
        .text("count", "1")
        .mp3("a")
        .text("csrf_token", &token);
    let response = app.send(browser_merge(form, ORIGIN, Some(&token))).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.concat.calls(), 0);
}

#[tokio::test]
async fn test_csrf_header_accepted() {
    let app = test_app(test_config());
    let token = csrf_cookie(&app.send(get("/", None)).await);

    let body = MultipartBuilder::new().text("count", "1").mp3("a").build();
    let request = Request::builder()
        .method("POST")
        .uri("/merge")
        .header("content-type", MultipartBuilder::content_type())
        .header("origin", ORIGIN)
        .header("cookie", format!("csrf_token={}", token))
        .header("x-csrf-token", token.as_str())
        .body(Body::from(body))
        .unwrap();

    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_csrf_mismatch_rejected() {
    let app = test_app(test_config());
    let first = csrf_cookie(&app.send(get("/", None)).await);
    let second = csrf_cookie(&app.send(get("/", None)).await);

    let form = MultipartBuilder::new()
        .text("csrf_token", &first)
        .text("count", "1")
        .mp3("a");
    let response = app.send(browser_merge(form, ORIGIN, Some(&second))).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(response).await["error"],
        "CSRF token missing or invalid"
    );
}

#[tokio::test]
async fn test_csrf_field_without_cookie_rejected() {
    let app = test_app(test_config());
    let token = csrf_cookie(&app.send(get("/", None)).await);

    let form = MultipartBuilder::new()
        .text("csrf_token", &token)
        .text("count", "1")
        .mp3("a");
    let response = app.send(browser_merge(form, ORIGIN, None)).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_token_signed_by_other_secret_rejected() {
    let app = test_app(test_config());
    let other = test_app(RouterConfig::new("another-secret").with_allowed_origin(ORIGIN));
    let foreign = csrf_cookie(&other.send(get("/", None)).await);

    let form = MultipartBuilder::new()
        .text("csrf_token", &foreign)
        .text("count", "1")
        .mp3("a");
    let response = app.send(browser_merge(form, ORIGIN, Some(&foreign))).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_csrf_token_from_other_origin_rejected() {
    let app = test_app(test_config());
    let token = csrf_cookie(&app.send(get("/", None)).await);

    let form = MultipartBuilder::new()
        .text("csrf_token", &token)
        .text("count", "1")
        .mp3("a");
    let response = app
        .send(browser_merge(form, "http://evil.example", Some(&token)))
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "Unauthorized");
}

// =============================================================================
// Enforcement Disabled
// =============================================================================

#[tokio::test]
async fn test_auth_disabled_admits_anonymous() {
    let app = test_app(RouterConfig::without_auth().with_tracing(false));
    let form = MultipartBuilder::new().text("count", "1").mp3("a");

    let response = app.send(merge_request(form, None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.send(get("/api/test", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

// =============================================================================
// Operator Endpoints
// =============================================================================

#[tokio::test]
async fn test_api_test_requires_bearer() {
    let app = test_app(test_config());

    let response = app.send(get("/api/test", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "Missing bearer token");

    let response = app.send(get("/api/test", Some("BAD_TOKEN"))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.send(get("/api/test", Some(GOOD_TOKEN))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["message"], "API OK");
}

#[tokio::test]
async fn test_browser_credentials_not_enough_for_api() {
    let app = test_app(test_config());
    let token = csrf_cookie(&app.send(get("/", None)).await);

    let request = Request::builder()
        .uri("/api/test")
        .header("origin", ORIGIN)
        .header("cookie", format!("csrf_token={}", token))
        .header("x-csrf-token", token.as_str())
        .body(Body::empty())
        .unwrap();

    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_reload_tokens_picks_up_new_file_contents() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("allowed_tokens.txt");
    std::fs::write(&path, format!("{}\n", GOOD_TOKEN)).unwrap();

    let tokens = Arc::new(TokenStore::open(&path).unwrap());
    let app = test_app_with_tokens(test_config(), tokens);

    let response = app.send(get("/api/test", Some("NEW_TOKEN"))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    std::fs::write(&path, format!("# rotated\n{}\nNEW_TOKEN\n", GOOD_TOKEN)).unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/api/reload-tokens")
        .header("authorization", format!("Bearer {}", GOOD_TOKEN))
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "success");
    assert_eq!(json["tokens_count"], 2);

    let response = app.send(get("/api/test", Some("NEW_TOKEN"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.tokens.len(), 2);
}

#[tokio::test]
async fn test_revoked_token_rejected_after_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("allowed_tokens.txt");
    std::fs::write(&path, "ADMIN\nREVOKED\n").unwrap();

    let tokens = Arc::new(TokenStore::open(&path).unwrap());
    let app = test_app_with_tokens(test_config(), tokens);

    let response = app.send(get("/api/test", Some("REVOKED"))).await;
    assert_eq!(response.status(), StatusCode::OK);

    std::fs::write(&path, "ADMIN\n").unwrap();
    let request = Request::builder()
        .method("POST")
        .uri("/api/reload-tokens")
        .header("authorization", "Bearer ADMIN")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.send(request).await.status(), StatusCode::OK);

    let response = app.send(get("/api/test", Some("REVOKED"))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
