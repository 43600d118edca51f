//! # Audio Joiner
//!
//! An HTTP service that merges uploaded audio files in groups.
//!
//! A client uploads an ordered batch of audio files together with a group
//! size `count`. Every `count` consecutive files are joined into one MP3 by
//! FFmpeg, and all merged files are returned in a single ZIP archive.
//!
//! ## Features
//!
//! - **Two authentication paths**: bearer tokens for scripts, same-origin plus
//!   a signed anti-forgery token for the browser form
//! - **Hot-reloadable token list**: the active set is swapped atomically
//! - **Fixed-window rate limiting** per token or client address
//! - **Bounded parallelism**: groups of one request run concurrently, results
//!   keep upload order
//! - **Scoped workspaces**: temporary files are removed on every exit path,
//!   child processes are killed when a request is abandoned
//!
//! ## Architecture
//!
//! - [`auth`] - Token store, rate limiter, CSRF and the admission gatekeeper
//! - [`merge`] - Upload validation, orchestration, FFmpeg and ZIP packaging
//! - [`server`] - Axum handlers, middleware and routes
//! - [`config`] - CLI and configuration types
//! - [`error`] - Error types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use audio_joiner::{create_router, AppState, FfmpegConcatenator, RouterConfig, TokenStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RouterConfig::new("change-me");
//!     let tokens = Arc::new(TokenStore::from_tokens(["secret-token"]));
//!     let state = AppState::new(&config, tokens, Arc::new(FfmpegConcatenator::default()));
//!     let router = create_router(state, &config);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:5001").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod merge;
pub mod server;

// Re-export commonly used types
pub use auth::{Admission, AdmissionRequest, AuthMode, CsrfGuard, Gatekeeper, RateLimiter, TokenStore};
pub use config::{CheckConfig, Cli, Command, ServeConfig};
pub use error::{ArchiveError, ConcatError, MergeError, TokenStoreError, ValidationError};
pub use merge::{
    partition, ArchiveBuilder, AudioConcatenator, FfmpegConcatenator, MergeJob, MergeOrchestrator,
    MergedOutput, UploadBatch, UploadLimits, UploadValidator, UploadedFile, Workspace,
};
pub use server::{create_router, AppState, HealthReporter, RouterConfig};
