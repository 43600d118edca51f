//! HTTP request handlers for the audio joiner.
//!
//! # Endpoints
//!
//! - `GET /` - Upload form
//! - `GET /how-it-works` - Static help page
//! - `GET /healthz` - Liveness and limits snapshot
//! - `POST /merge` - Merge uploaded files in groups and return a ZIP
//! - `GET /api/health` - Token subsystem status
//! - `GET /api/test` - Bearer token smoke test
//! - `POST /api/reload-tokens` - Reload the token file

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{multipart::MultipartError, ConnectInfo, FromRequest, Multipart, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::auth::{
    Admission, AdmissionRequest, AuthMode, CsrfGuard, Gatekeeper, RateLimiter, TokenStore,
    CSRF_COOKIE, CSRF_FIELD,
};
use crate::error::{ArchiveError, MergeError, TokenStoreError, ValidationError};
use crate::merge::{
    ArchiveBuilder, AudioConcatenator, MergeOrchestrator, UploadBatch, UploadLimits,
    UploadValidator, UploadedFile, ARCHIVE_NAME,
};

use super::pages;
use super::routes::RouterConfig;

// =============================================================================
// Application State
// =============================================================================

/// Shared application state.
///
/// The token set and the rate limiter are the only pieces shared across
/// requests; everything else is read-only configuration.
pub struct AppState {
    /// Admission control for `/merge` and `/api/*`
    pub gatekeeper: Arc<Gatekeeper>,

    /// Active bearer tokens
    pub tokens: Arc<TokenStore>,

    /// Per-identity request counters
    pub limiter: Arc<RateLimiter>,

    /// Upload checks
    pub validator: UploadValidator,

    /// Group concatenation driver
    pub orchestrator: Arc<MergeOrchestrator>,

    /// Liveness and limits reporting
    pub health: Arc<HealthReporter>,

    /// Configured origin for the same-origin check
    pub allowed_origin: Option<String>,

    /// Honor `X-Forwarded-For` / `X-Real-IP`
    pub trust_proxy_headers: bool,
}

impl AppState {
    /// Assemble state from router configuration.
    pub fn new(
        config: &RouterConfig,
        tokens: Arc<TokenStore>,
        concatenator: Arc<dyn AudioConcatenator>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.rate_window, config.rate_max));
        let csrf = CsrfGuard::new(config.secret.as_bytes().to_vec()).with_ttl(config.csrf_ttl);
        let gatekeeper = Gatekeeper::new(
            Arc::clone(&tokens),
            Arc::clone(&limiter),
            csrf,
            config.tokens_required,
        );
        let health = HealthReporter::new(
            Arc::clone(&tokens),
            config.limits,
            config.tool_available,
            config.tokens_required,
            config.geo_enabled,
        );

        Self {
            gatekeeper: Arc::new(gatekeeper),
            tokens,
            limiter,
            validator: UploadValidator::new(config.limits),
            orchestrator: Arc::new(MergeOrchestrator::new(concatenator, config.merge_workers)),
            health: Arc::new(health),
            allowed_origin: config.allowed_origin.clone(),
            trust_proxy_headers: config.trust_proxy_headers,
        }
    }

    /// Collect credentials for the gatekeeper from request headers.
    pub fn admission_request(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> AdmissionRequest {
        AdmissionRequest::from_headers(
            headers,
            peer,
            self.trust_proxy_headers,
            self.allowed_origin.as_deref(),
        )
    }

    /// Run the gatekeeper and turn a rejection into an error response.
    pub fn admit(&self, request: &AdmissionRequest, mode: AuthMode) -> Result<(), ApiError> {
        match self.gatekeeper.admit(request, mode) {
            Admission::Admit => Ok(()),
            rejection => Err(rejection.into()),
        }
    }
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            gatekeeper: Arc::clone(&self.gatekeeper),
            tokens: Arc::clone(&self.tokens),
            limiter: Arc::clone(&self.limiter),
            validator: self.validator,
            orchestrator: Arc::clone(&self.orchestrator),
            health: Arc::clone(&self.health),
            allowed_origin: self.allowed_origin.clone(),
            trust_proxy_headers: self.trust_proxy_headers,
        }
    }
}

/// Peer address recorded by `into_make_service_with_connect_info`.
pub fn peer_addr(request: &Request) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0)
}

// =============================================================================
// Health Reporting
// =============================================================================

/// Reports liveness and operating limits.
///
/// Reads only; never touches rate-limit or token state beyond counting tokens.
pub struct HealthReporter {
    tokens: Arc<TokenStore>,
    limits: UploadLimits,
    tool_available: bool,
    tokens_required: bool,
    geo_enabled: bool,
}

impl HealthReporter {
    pub fn new(
        tokens: Arc<TokenStore>,
        limits: UploadLimits,
        tool_available: bool,
        tokens_required: bool,
        geo_enabled: bool,
    ) -> Self {
        Self {
            tokens,
            limits,
            tool_available,
            tokens_required,
            geo_enabled,
        }
    }

    /// Whether the startup probe found the external tool.
    pub fn tool_available(&self) -> bool {
        self.tool_available
    }

    pub fn liveness(&self) -> HealthResponse {
        HealthResponse {
            status: "ok".to_string(),
            tool_available: self.tool_available,
            max_content_length_mb: self.limits.max_content_length_mb(),
            max_files: self.limits.max_files,
            max_per_file_mb: self.limits.max_per_file_mb(),
        }
    }

    pub fn api_status(&self) -> ApiHealthResponse {
        ApiHealthResponse {
            status: "ok".to_string(),
            tokens_required: self.tokens_required,
            tokens_loaded: self.tokens.len(),
            geo_enabled: self.geo_enabled,
        }
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error body returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable error message
    pub error: String,
}

/// `GET /healthz` body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub tool_available: bool,
    pub max_content_length_mb: u64,
    pub max_files: usize,
    pub max_per_file_mb: u64,
}

/// `GET /api/health` body.
#[derive(Debug, Serialize)]
pub struct ApiHealthResponse {
    pub status: String,
    pub tokens_required: bool,
    pub tokens_loaded: usize,
    pub geo_enabled: bool,
}

/// `GET /api/test` body.
#[derive(Debug, Serialize)]
pub struct ApiTestResponse {
    pub message: String,
    pub ip: String,

    /// Geolocation is not resolved by this service
    pub country: Option<String>,
    pub city: Option<String>,
}

/// `POST /api/reload-tokens` body.
#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub status: String,
    pub tokens_count: usize,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Error returned by handlers and middleware.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error_type: &'static str,
    message: String,
    retry_after: Option<Duration>,
}

impl ApiError {
    pub fn new(status: StatusCode, error_type: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            error_type,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<Admission> for ApiError {
    fn from(admission: Admission) -> Self {
        let error_type = match admission {
            Admission::Admit => "ok",
            Admission::RejectUnauthenticated(_) => "unauthorized",
            Admission::RejectForbidden => "forbidden",
            Admission::RejectRateLimited { .. } => "rate_limited",
        };
        let mut err = ApiError::new(admission.status(), error_type, admission.message());
        if let Admission::RejectRateLimited { retry_after } = admission {
            err.retry_after = Some(retry_after);
        }
        err
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        let (status, error_type) = match err {
            ValidationError::UnsupportedContentType => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_media_type")
            }
            ValidationError::PayloadTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large")
            }
            _ => (StatusCode::BAD_REQUEST, "invalid_upload"),
        };
        ApiError::new(status, error_type, err.to_string())
    }
}

impl From<MergeError> for ApiError {
    fn from(err: MergeError) -> Self {
        match err {
            MergeError::Validation(validation) => validation.into(),
            MergeError::ToolUnavailable => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "tool_unavailable", err.to_string())
            }
            MergeError::Group { .. } => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "concat_failed", err.to_string())
            }
            MergeError::Archive(_) | MergeError::Workspace(_) => ApiError::internal(err.to_string()),
        }
    }
}

impl From<ArchiveError> for ApiError {
    fn from(err: ArchiveError) -> Self {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "archive_failed", err.to_string())
    }
}

impl From<TokenStoreError> for ApiError {
    fn from(err: TokenStoreError) -> Self {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "token_reload_failed",
            format!("Failed to reload tokens: {}", err),
        )
    }
}

/// Log by severity and render `{"error": message}`.
///
/// Rejections from the gatekeeper are already logged there, so client errors
/// are kept at debug level here.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(
                error_type = self.error_type,
                status = self.status.as_u16(),
                "Server error: {}",
                self.message
            );
        } else {
            debug!(
                error_type = self.error_type,
                status = self.status.as_u16(),
                "Client error: {}",
                self.message
            );
        }

        let mut response = (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response();

        if let Some(retry_after) = self.retry_after {
            if let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().max(1).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

// =============================================================================
// Pages
// =============================================================================

/// Serve the upload form.
///
/// # Endpoint
///
/// `GET /`
///
/// Issues a fresh anti-forgery token, embeds it in the form and sets it as the
/// `csrf_token` cookie.
pub async fn index_handler(State(state): State<AppState>) -> Response {
    let csrf = state.gatekeeper.csrf();
    let token = csrf.issue();
    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Strict; Max-Age={}",
        CSRF_COOKIE,
        token,
        csrf.ttl().as_secs()
    );

    let mut response = Html(pages::index(&token, state.validator.limits())).into_response();
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}

/// Serve the static help page.
///
/// # Endpoint
///
/// `GET /how-it-works`
pub async fn how_it_works_handler() -> Html<&'static str> {
    Html(pages::HOW_IT_WORKS)
}

// =============================================================================
// Health
// =============================================================================

/// Handle liveness checks.
///
/// # Endpoint
///
/// `GET /healthz`
///
/// # Response
///
/// `200 OK` with JSON body:
/// ```json
/// {
///   "status": "ok",
///   "tool_available": true,
///   "max_content_length_mb": 100,
///   "max_files": 50,
///   "max_per_file_mb": 50
/// }
/// ```
pub async fn healthz_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(state.health.liveness())
}

/// Handle token subsystem status checks.
///
/// # Endpoint
///
/// `GET /api/health`
pub async fn api_health_handler(State(state): State<AppState>) -> Json<ApiHealthResponse> {
    Json(state.health.api_status())
}

// =============================================================================
// Operator API
// =============================================================================

/// Confirm that a bearer token is accepted.
///
/// # Endpoint
///
/// `GET /api/test` (bearer token required)
///
/// # Response
///
/// `200 OK` with the caller's resolved address. Geolocation fields are
/// always `null`.
pub async fn api_test_handler(State(state): State<AppState>, request: Request) -> Json<ApiTestResponse> {
    let peer = peer_addr(&request);
    let admission = state.admission_request(request.headers(), peer);
    Json(ApiTestResponse {
        message: "API OK".to_string(),
        ip: admission.client_addr,
        country: None,
        city: None,
    })
}

/// Re-read the token file.
///
/// # Endpoint
///
/// `POST /api/reload-tokens` (bearer token required)
///
/// # Errors
///
/// - `500 Internal Server Error`: the file could not be read; the previous
///   token set stays active
pub async fn reload_tokens_handler(
    State(state): State<AppState>,
) -> Result<Json<ReloadResponse>, ApiError> {
    let tokens_count = state.tokens.reload()?;
    Ok(Json(ReloadResponse {
        status: "success".to_string(),
        tokens_count,
    }))
}

// =============================================================================
// Merge
// =============================================================================

/// Merge uploaded files in groups and return a ZIP archive.
///
/// # Endpoint
///
/// `POST /merge` (`multipart/form-data`)
///
/// # Form Fields
///
/// - `files`: one or more audio files, in the order they should be joined
/// - `count`: group size
/// - `csrf_token`: anti-forgery token (browser flow only)
///
/// Browser clients must send `csrf_token` before the first `files` part, or
/// pass it in the `X-CSRF-Token` header. A field placed after the files is
/// not seen by admission and the request is rejected with 401.
///
/// Requests that carry a bearer token, a CSRF header, or come from another
/// origin are admitted before the body is inspected, so a malformed body is
/// still charged against the caller's rate limit.
///
/// # Response
///
/// - `200 OK`: `application/zip` containing `merged_1.mp3`, `merged_2.mp3`, ...
/// - `400 Bad Request`: invalid upload or group size
/// - `401 Unauthorized`: no usable credentials
/// - `403 Forbidden`: unknown bearer token
/// - `413 Payload Too Large`: request exceeds the content-length ceiling
/// - `415 Unsupported Media Type`: body is not multipart
/// - `429 Too Many Requests`: rate limit exhausted
/// - `500 Internal Server Error`: concatenation or archiving failed
///
/// # Headers
///
/// - `Content-Disposition: attachment; filename="merged_files.zip"`
/// - `X-Process-Time: {seconds}`
pub async fn merge_handler(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, ApiError> {
    let started = Instant::now();

    let peer = peer_addr(&request);
    let admission = state.admission_request(request.headers(), peer);
    let multipart_body = is_multipart(request.headers());

    // Only a same-origin request without any other credential may still be
    // waiting for the form field; everyone else is decided up front.
    let admitted = !needs_form_token(&admission) || !multipart_body;
    if admitted {
        state.admit(&admission, AuthMode::SameOriginOrBearer)?;
    }

    if !multipart_body {
        return Err(ValidationError::UnsupportedContentType.into());
    }

    let multipart = match Multipart::from_request(request, &state).await {
        Ok(multipart) => multipart,
        Err(rejection) => {
            if !admitted {
                state.admit(&admission, AuthMode::SameOriginOrBearer)?;
            }
            return Err(ValidationError::MalformedBody(rejection.body_text()).into());
        }
    };

    let batch = read_merge_form(&state, multipart, admission, admitted).await?;
    let upload = state.validator.validate(batch)?;

    if !state.health.tool_available() {
        return Err(MergeError::ToolUnavailable.into());
    }

    let files = upload.files.len();
    let job = state.orchestrator.run(upload).await?;
    let groups = job.outputs().len();
    let archive = ArchiveBuilder::stream(job).await?;

    let elapsed = started.elapsed();
    info!(
        event = "merge_served",
        files,
        groups,
        bytes = archive.len,
        elapsed_ms = elapsed.as_millis() as u64,
        "Merge request completed"
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", ARCHIVE_NAME),
        )
        .header(header::CONTENT_LENGTH, archive.len)
        .header("X-Process-Time", format!("{:.3}", elapsed.as_secs_f64()))
        .body(Body::from_stream(archive.stream))
        .map_err(|e| ApiError::internal(format!("Failed to build response: {}", e)))
}

/// Whether admission has to wait for the `csrf_token` form field.
fn needs_form_token(admission: &AdmissionRequest) -> bool {
    admission.same_origin && admission.bearer().is_none() && admission.csrf_submitted.is_none()
}

/// Read the merge form, admitting the request before any file is buffered.
///
/// Unless `admitted` is already set, the gatekeeper runs once: at the first
/// `files` part (so a `csrf_token` field placed before the files is honored),
/// on a body error, or at the end of the body.
async fn read_merge_form(
    state: &AppState,
    mut multipart: Multipart,
    admission: AdmissionRequest,
    mut admitted: bool,
) -> Result<UploadBatch, ApiError> {
    let max_mb = state.validator.limits().max_content_length_mb();
    let field_error = |err: MultipartError| -> ApiError {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ValidationError::PayloadTooLarge { max_mb }.into()
        } else {
            ValidationError::MalformedBody(err.body_text()).into()
        }
    };

    let mut batch = UploadBatch::default();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                if !admitted {
                    let request = admission.clone().with_csrf_field(batch.csrf_token.clone());
                    state.admit(&request, AuthMode::SameOriginOrBearer)?;
                }
                return Err(field_error(err));
            }
        };
        let name = field.name().unwrap_or_default().to_string();

        if name == "files" {
            if !admitted {
                let request = admission.clone().with_csrf_field(batch.csrf_token.clone());
                state.admit(&request, AuthMode::SameOriginOrBearer)?;
                admitted = true;
            }

            let file_name = field.file_name().unwrap_or_default().to_string();
            if file_name.is_empty() {
                continue;
            }
            let content_type = field.content_type().map(str::to_string);
            let data = field.bytes().await.map_err(field_error)?;
            batch
                .files
                .push(UploadedFile::new(file_name, content_type, data));
        } else if name == "count" {
            batch.count = Some(field.text().await.map_err(field_error)?);
        } else if name == CSRF_FIELD {
            batch.csrf_token = Some(field.text().await.map_err(field_error)?);
        }
    }

    if !admitted {
        let request = admission.with_csrf_field(batch.csrf_token.clone());
        state.admit(&request, AuthMode::SameOriginOrBearer)?;
    }

    Ok(batch)
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_ascii_lowercase().starts_with("multipart/form-data"))
        .unwrap_or(false)
}
