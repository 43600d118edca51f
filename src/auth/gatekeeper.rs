//! Admission decision for protected endpoints.
//!
//! The gatekeeper combines the same-origin + anti-forgery path, the bearer
//! token path and the rate limiter into one [`Admission`] per request.
//!
//! # Decision Order
//!
//! 1. Token enforcement disabled: authenticated.
//! 2. Same-origin request with a matching CSRF token (upload form only):
//!    authenticated without a bearer token.
//! 3. No bearer token: [`Admission::RejectUnauthenticated`].
//! 4. Bearer token not in the active set: [`Admission::RejectForbidden`].
//! 5. Authenticated but the caller's window is exhausted:
//!    [`Admission::RejectRateLimited`].
//!
//! Every call counts exactly once against the caller's rate window, whether
//! it is admitted or rejected.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::header::{AUTHORIZATION, COOKIE};
use http::{HeaderMap, StatusCode};
use tracing::{debug, warn};

use super::csrf::{cookie_value, CsrfGuard, CSRF_COOKIE, CSRF_HEADER};
use super::origin::same_origin;
use super::rate_limit::RateLimiter;
use super::tokens::TokenStore;

/// Number of token characters used in the rate-limit identity.
const IDENTITY_TOKEN_PREFIX: usize = 64;

/// Which credential was missing or unusable on an unauthenticated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingCredential {
    /// Not same-origin and no bearer token
    CrossOrigin,
    /// Same-origin but the anti-forgery token is absent or does not verify
    Csrf,
    /// Bearer token required and absent
    Bearer,
}

/// Outcome of one admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    RejectUnauthenticated(MissingCredential),
    RejectForbidden,
    RejectRateLimited { retry_after: Duration },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admit)
    }

    /// HTTP status for a rejection.
    pub fn status(&self) -> StatusCode {
        match self {
            Admission::Admit => StatusCode::OK,
            Admission::RejectUnauthenticated(_) => StatusCode::UNAUTHORIZED,
            Admission::RejectForbidden => StatusCode::FORBIDDEN,
            Admission::RejectRateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Client-facing message for a rejection.
    pub fn message(&self) -> &'static str {
        match self {
            Admission::Admit => "OK",
            Admission::RejectUnauthenticated(MissingCredential::CrossOrigin) => "Unauthorized",
            Admission::RejectUnauthenticated(MissingCredential::Csrf) => {
                "CSRF token missing or invalid"
            }
            Admission::RejectUnauthenticated(MissingCredential::Bearer) => "Missing bearer token",
            Admission::RejectForbidden => "Forbidden",
            Admission::RejectRateLimited { .. } => "Too many requests",
        }
    }
}

/// Which authentication paths an endpoint accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Browser form submission or bearer token (`POST /merge`)
    SameOriginOrBearer,
    /// Bearer token only (`/api/*` operator endpoints)
    BearerOnly,
}

/// Credentials and identity extracted from one request.
#[derive(Debug, Clone, Default)]
pub struct AdmissionRequest {
    /// Raw `Authorization` header value
    pub authorization: Option<String>,

    /// Result of the `Origin` / `Referer` check
    pub same_origin: bool,

    /// Anti-forgery token from the form field or `X-CSRF-Token`
    pub csrf_submitted: Option<String>,

    /// Anti-forgery token from the cookie set by the upload page
    pub csrf_cookie: Option<String>,

    /// Resolved client address
    pub client_addr: String,
}

impl AdmissionRequest {
    /// Collect credentials from request headers.
    ///
    /// Proxy headers (`X-Forwarded-For`, `X-Real-IP`) are only honored when
    /// `trust_proxy` is set; otherwise the socket peer address is used.
    pub fn from_headers(
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
        trust_proxy: bool,
        allowed_origin: Option<&str>,
    ) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let csrf_cookie = headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|v| cookie_value(v, CSRF_COOKIE))
            .map(str::to_string);

        Self {
            authorization: text(AUTHORIZATION.as_str()),
            same_origin: same_origin(headers, allowed_origin),
            csrf_submitted: text(CSRF_HEADER),
            csrf_cookie,
            client_addr: client_addr(headers, peer, trust_proxy),
        }
    }

    /// Replace the submitted anti-forgery token with the form field value.
    pub fn with_csrf_field(mut self, token: Option<String>) -> Self {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            self.csrf_submitted = Some(token);
        }
        self
    }

    /// Bearer token from the `Authorization` header, if any.
    pub fn bearer(&self) -> Option<&str> {
        self.authorization
            .as_deref()
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    /// Rate-limit key: `t:<token prefix>` when the bearer token is known
    /// good, else `ip:<addr>`.
    ///
    /// Unrecognized tokens fall back to the address so that guessing tokens
    /// cannot mint a fresh window per guess.
    pub fn identity(&self, token_trusted: bool) -> String {
        match self.bearer().filter(|_| token_trusted) {
            Some(token) => {
                let prefix: String = token.chars().take(IDENTITY_TOKEN_PREFIX).collect();
                format!("t:{}", prefix)
            }
            None => format!("ip:{}", self.client_addr),
        }
    }
}

fn client_addr(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> String {
    if trust_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        let real_ip = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        if let Some(addr) = forwarded.or(real_ip) {
            return addr.to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Admission control shared by all protected handlers.
pub struct Gatekeeper {
    tokens: Arc<TokenStore>,
    limiter: Arc<RateLimiter>,
    csrf: CsrfGuard,
    tokens_required: bool,
}

impl Gatekeeper {
    pub fn new(
        tokens: Arc<TokenStore>,
        limiter: Arc<RateLimiter>,
        csrf: CsrfGuard,
        tokens_required: bool,
    ) -> Self {
        Self {
            tokens,
            limiter,
            csrf,
            tokens_required,
        }
    }

    /// Decide whether `request` may proceed.
    pub fn admit(&self, request: &AdmissionRequest, mode: AuthMode) -> Admission {
        let authenticated = self.authenticate(request, mode);
        let token_trusted = !self.tokens_required
            || request.bearer().is_some_and(|token| self.tokens.is_valid(token));
        let identity = request.identity(token_trusted);
        let within_limit = self.limiter.admit(&identity);

        let decision = match authenticated {
            Err(rejection) => rejection,
            Ok(()) if !within_limit => Admission::RejectRateLimited {
                retry_after: self
                    .limiter
                    .retry_after(&identity)
                    .unwrap_or(self.limiter.window()),
            },
            Ok(()) => Admission::Admit,
        };

        match decision {
            Admission::Admit => debug!(client = %identity, "Request admitted"),
            rejection => warn!(
                event = "admission_rejected",
                client = %identity,
                status = rejection.status().as_u16(),
                reason = rejection.message(),
                "Request rejected"
            ),
        }
        decision
    }

    fn authenticate(&self, request: &AdmissionRequest, mode: AuthMode) -> Result<(), Admission> {
        if !self.tokens_required {
            return Ok(());
        }

        let browser_trusted = mode == AuthMode::SameOriginOrBearer
            && request.same_origin
            && self.csrf.matches(
                request.csrf_submitted.as_deref(),
                request.csrf_cookie.as_deref(),
            );
        if browser_trusted {
            return Ok(());
        }

        match request.bearer() {
            Some(token) if self.tokens.is_valid(token) => Ok(()),
            Some(_) => Err(Admission::RejectForbidden),
            None => Err(Admission::RejectUnauthenticated(match mode {
                AuthMode::BearerOnly => MissingCredential::Bearer,
                AuthMode::SameOriginOrBearer if request.same_origin => MissingCredential::Csrf,
                AuthMode::SameOriginOrBearer => MissingCredential::CrossOrigin,
            })),
        }
    }

    /// Whether bearer enforcement is active.
    pub fn tokens_required(&self) -> bool {
        self.tokens_required
    }

    pub fn csrf(&self) -> &CsrfGuard {
        &self.csrf
    }
}
