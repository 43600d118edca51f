//! Authentication and admission control.
//!
//! - [`TokenStore`]: reloadable bearer token allow-list
//! - [`RateLimiter`]: per-identity fixed-window counter
//! - [`CsrfGuard`]: signed anti-forgery tokens for the upload form
//! - [`same_origin`]: `Origin` / `Referer` check
//! - [`Gatekeeper`]: combines all of the above into an [`Admission`]

mod csrf;
mod gatekeeper;
mod origin;
mod rate_limit;
mod tokens;

pub use csrf::{
    cookie_value, CsrfError, CsrfGuard, CSRF_COOKIE, CSRF_FIELD, CSRF_HEADER, DEFAULT_CSRF_TTL,
};
pub use gatekeeper::{Admission, AdmissionRequest, AuthMode, Gatekeeper, MissingCredential};
pub use origin::same_origin;
pub use rate_limit::{spawn_eviction, RateLimiter, DEFAULT_RATE_MAX, DEFAULT_RATE_WINDOW};
pub use tokens::{TokenStore, DEFAULT_TOKEN_FILE_NAME};
