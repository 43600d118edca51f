//! HTTP server layer for the audio joiner.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │                 POST /merge   GET /healthz   /api/*             │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │  handlers   │  │ middleware  │  │        routes           │  │
//! │  │ (requests)  │  │(bearer,size)│  │  (router config)        │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod handlers;
pub mod middleware;
pub mod pages;
pub mod routes;

pub use handlers::{
    api_health_handler, api_test_handler, healthz_handler, merge_handler, reload_tokens_handler,
    ApiError, ApiHealthResponse, ApiTestResponse, AppState, ErrorResponse, HealthReporter,
    HealthResponse, ReloadResponse,
};
pub use middleware::{limit_payload, require_bearer};
pub use routes::{create_router, RouterConfig};
