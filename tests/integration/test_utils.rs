//! Test utilities for integration tests.
//!
//! This module provides fake concatenators, a multipart body builder and
//! helpers for driving the router in-process.

use std::io::Read;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;

use audio_joiner::error::ConcatError;
use audio_joiner::{create_router, AppState, AudioConcatenator, RouterConfig, TokenStore};

/// Token accepted by [`test_app`].
pub const GOOD_TOKEN: &str = "GOOD_TOKEN";

/// Origin configured by [`test_app`].
pub const ORIGIN: &str = "http://joiner.test";

// =============================================================================
// Fake Concatenators
// =============================================================================

/// Writes the inputs' bytes back to back and counts invocations.
#[derive(Default)]
pub struct FakeConcatenator {
    calls: AtomicUsize,
}

impl FakeConcatenator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioConcatenator for FakeConcatenator {
    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ConcatError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut merged = Vec::new();
        for input in inputs {
            let data = tokio::fs::read(input)
                .await
                .map_err(|e| ConcatError::Staging(e.to_string()))?;
            merged.extend(data);
        }
        tokio::fs::write(output, merged)
            .await
            .map_err(|e| ConcatError::Staging(e.to_string()))
    }
}

/// Fails every group like a tool exiting with status 1.
pub struct FailingConcatenator;

#[async_trait]
impl AudioConcatenator for FailingConcatenator {
    async fn concat(&self, _inputs: &[PathBuf], _output: &Path) -> Result<(), ConcatError> {
        Err(ConcatError::Failed {
            tool: "ffmpeg".to_string(),
            status: "exit status: 1".to_string(),
            stderr: "Invalid data found when processing input".to_string(),
        })
    }
}

// =============================================================================
// Test Application
// =============================================================================

/// Router plus handles to the state it serves.
pub struct TestApp {
    pub router: Router,
    pub tokens: Arc<TokenStore>,
    pub concat: Arc<FakeConcatenator>,
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        use tower::ServiceExt;
        self.router.clone().oneshot(request).await.unwrap()
    }
}

/// Default test configuration: auth enforced, tracing off, fixed origin.
pub fn test_config() -> RouterConfig {
    RouterConfig::new("integration-secret")
        .with_allowed_origin(ORIGIN)
        .with_tracing(false)
}

/// Build an app with [`GOOD_TOKEN`] as the only valid token.
pub fn test_app(config: RouterConfig) -> TestApp {
    test_app_with_tokens(config, Arc::new(TokenStore::from_tokens([GOOD_TOKEN])))
}

pub fn test_app_with_tokens(config: RouterConfig, tokens: Arc<TokenStore>) -> TestApp {
    let concat = Arc::new(FakeConcatenator::default());
    let state = AppState::new(&config, Arc::clone(&tokens), concat.clone());
    TestApp {
        router: create_router(state, &config),
        tokens,
        concat,
    }
}

/// Build an app whose concatenator always fails.
pub fn failing_app(config: RouterConfig) -> Router {
    let tokens = Arc::new(TokenStore::from_tokens([GOOD_TOKEN]));
    let state = AppState::new(&config, tokens, Arc::new(FailingConcatenator));
    create_router(state, &config)
}

// =============================================================================
// Multipart Bodies
// =============================================================================

const BOUNDARY: &str = "----audio-joiner-test-boundary";

/// Builds `multipart/form-data` bodies.
#[derive(Default)]
pub struct MultipartBuilder {
    body: Vec<u8>,
}

impl MultipartBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, filename: &str, content_type: &str, data: &[u8]) -> Self {
        self.body.extend(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                BOUNDARY, filename, content_type
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    /// Add an MP3 named `<label>.mp3` whose contents are `ID3<label>`.
    pub fn mp3(self, label: &str) -> Self {
        self.file(&format!("{}.mp3", label), "audio/mpeg", &mp3_bytes(label))
    }

    pub fn content_type() -> String {
        format!("multipart/form-data; boundary={}", BOUNDARY)
    }

    pub fn build(mut self) -> Vec<u8> {
        self.body.extend(format!("--{}--\r\n", BOUNDARY).as_bytes());
        self.body
    }
}

/// Minimal bytes that pass the MP3 signature check.
pub fn mp3_bytes(label: &str) -> Vec<u8> {
    let mut data = b"ID3".to_vec();
    data.extend_from_slice(label.as_bytes());
    data
}

/// `POST /merge` with the given form, optionally authenticated by bearer token.
pub fn merge_request(form: MultipartBuilder, bearer: Option<&str>) -> Request<Body> {
    let body = form.build();
    let mut builder = Request::builder()
        .method("POST")
        .uri("/merge")
        .header("content-type", MultipartBuilder::content_type())
        .header("content-length", body.len());
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body)).unwrap()
}

/// Plain `GET` with an optional bearer token.
pub fn get(uri: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

/// Attach a socket peer address as `into_make_service_with_connect_info` would.
pub fn from_peer(mut request: Request<Body>, addr: &str) -> Request<Body> {
    let addr: SocketAddr = addr.parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

// =============================================================================
// Response Helpers
// =============================================================================

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Entries of a ZIP archive as `(name, contents)` in archive order.
pub fn read_zip(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut entry = archive.by_index(i).unwrap();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            (entry.name().to_string(), data)
        })
        .collect()
}

/// `csrf_token` value from a `Set-Cookie` header.
pub fn csrf_cookie(response: &Response<Body>) -> String {
    let header = response
        .headers()
        .get("set-cookie")
        .unwrap()
        .to_str()
        .unwrap();
    audio_joiner::auth::cookie_value(header, "csrf_token")
        .unwrap()
        .to_string()
}
