//! Router configuration for the audio joiner.
//!
//! # Route Structure
//!
//! ```text
//! /                    - Upload form (public)
//! /how-it-works        - Help page (public)
//! /healthz             - Liveness and limits (public)
//! /merge               - Merge endpoint (same-origin + CSRF, or bearer)
//! /api/health          - Token subsystem status (public)
//! /api/test            - Bearer smoke test (bearer)
//! /api/reload-tokens   - Reload token file (bearer)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use audio_joiner::auth::TokenStore;
//! use audio_joiner::merge::FfmpegConcatenator;
//! use audio_joiner::server::{create_router, AppState, RouterConfig};
//!
//! let config = RouterConfig::new("my-secret-key")
//!     .with_allowed_origin("https://joiner.example.com");
//! let tokens = Arc::new(TokenStore::open("tokens/allowed_tokens.txt")?);
//! let state = AppState::new(&config, tokens, Arc::new(FfmpegConcatenator::default()));
//!
//! let router = create_router(state, &config);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:5001").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use http::header::{AUTHORIZATION, CONTENT_DISPOSITION, CONTENT_TYPE};
use http::{HeaderName, Method};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{
    api_health_handler, api_test_handler, healthz_handler, how_it_works_handler, index_handler,
    merge_handler, reload_tokens_handler, AppState,
};
use super::middleware::{limit_payload, require_bearer};
use crate::auth::{CSRF_HEADER, DEFAULT_CSRF_TTL, DEFAULT_RATE_MAX, DEFAULT_RATE_WINDOW};
use crate::merge::{UploadLimits, DEFAULT_MERGE_WORKERS};

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router and the state it serves.
#[derive(Clone)]
pub struct RouterConfig {
    /// Secret key for signing anti-forgery tokens
    pub secret: String,

    /// Whether bearer / CSRF authentication is enforced
    pub tokens_required: bool,

    /// Origin accepted by the same-origin check and CORS (None = request Host)
    pub allowed_origin: Option<String>,

    /// Upload size and count limits
    pub limits: UploadLimits,

    /// Rate-limit window length
    pub rate_window: Duration,

    /// Requests admitted per window per identity
    pub rate_max: u32,

    /// Concurrent groups per merge request
    pub merge_workers: usize,

    /// Result of the startup tool probe
    pub tool_available: bool,

    /// Reported by `/api/health` only
    pub geo_enabled: bool,

    /// Honor `X-Forwarded-For` / `X-Real-IP` for the client address
    pub trust_proxy_headers: bool,

    /// Lifetime of anti-forgery tokens
    pub csrf_ttl: Duration,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl RouterConfig {
    /// Create a configuration with the given signing secret.
    ///
    /// By default:
    /// - Authentication is enforced
    /// - Same-origin checks use the request `Host`
    /// - Limits are 50 files, 50 MB per file, 100 MB in total
    /// - 20 requests per 60 seconds per identity
    /// - 4 concurrent groups per request
    /// - Tracing is enabled
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            tokens_required: true,
            allowed_origin: None,
            limits: UploadLimits::default(),
            rate_window: DEFAULT_RATE_WINDOW,
            rate_max: DEFAULT_RATE_MAX,
            merge_workers: DEFAULT_MERGE_WORKERS,
            tool_available: true,
            geo_enabled: false,
            trust_proxy_headers: false,
            csrf_ttl: DEFAULT_CSRF_TTL,
            enable_tracing: true,
        }
    }

    /// Create a configuration with authentication disabled.
    ///
    /// **Warning**: every request is trusted. Rate limits still apply.
    pub fn without_auth() -> Self {
        Self::new(String::new()).with_tokens_required(false)
    }

    pub fn with_tokens_required(mut self, required: bool) -> Self {
        self.tokens_required = required;
        self
    }

    pub fn with_allowed_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origin = Some(origin.into());
        self
    }

    pub fn with_limits(mut self, limits: UploadLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_rate_limit(mut self, window: Duration, max_requests: u32) -> Self {
        self.rate_window = window;
        self.rate_max = max_requests;
        self
    }

    pub fn with_merge_workers(mut self, workers: usize) -> Self {
        self.merge_workers = workers;
        self
    }

    pub fn with_tool_available(mut self, available: bool) -> Self {
        self.tool_available = available;
        self
    }

    pub fn with_geo_enabled(mut self, enabled: bool) -> Self {
        self.geo_enabled = enabled;
        self
    }

    pub fn with_trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the main application router.
///
/// `/merge` is wrapped in the payload ceiling (declared `Content-Length`
/// first, then the streaming body limit) before any handler logic runs.
/// The bearer-only guard covers `/api/test` and `/api/reload-tokens`.
pub fn create_router(state: AppState, config: &RouterConfig) -> Router {
    let body_limit = usize::try_from(config.limits.max_total_bytes).unwrap_or(usize::MAX);

    let merge_routes = Router::new()
        .route("/merge", post(merge_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(state.clone(), limit_payload));

    let protected_api = Router::new()
        .route("/test", get(api_test_handler))
        .route("/reload-tokens", post(reload_tokens_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    let api_routes = Router::new()
        .route("/health", get(api_health_handler))
        .merge(protected_api);

    let public_routes = Router::new()
        .route("/", get(index_handler))
        .route("/how-it-works", get(how_it_works_handler))
        .route("/healthz", get(healthz_handler));

    let router = Router::new()
        .merge(public_routes)
        .merge(merge_routes)
        .nest("/api", api_routes)
        .with_state(state)
        .layer(build_cors_layer(config));

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer.
///
/// Cross-origin requests are only allowed from the configured origin.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static(CSRF_HEADER),
        ])
        .expose_headers([CONTENT_DISPOSITION, HeaderName::from_static("x-process-time")])
        .max_age(Duration::from_secs(86400));

    match config
        .allowed_origin
        .as_deref()
        .and_then(|origin| origin.trim_end_matches('/').parse::<http::HeaderValue>().ok())
    {
        Some(origin) => cors.allow_origin(origin).allow_credentials(true),
        None => cors,
    }
}
