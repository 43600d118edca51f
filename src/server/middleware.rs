//! Request guards applied as `from_fn_with_state` layers.

use axum::{
    extract::{Request, State},
    http::header::CONTENT_LENGTH,
    middleware::Next,
    response::Response,
};

use crate::auth::AuthMode;
use crate::error::ValidationError;

use super::handlers::{peer_addr, ApiError, AppState};

/// Require a valid bearer token (`/api/test`, `/api/reload-tokens`).
///
/// Same-origin browser credentials are not accepted here.
pub async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let admission = state.admission_request(request.headers(), peer_addr(&request));
    state.admit(&admission, AuthMode::BearerOnly)?;
    Ok(next.run(request).await)
}

/// Reject requests whose declared `Content-Length` exceeds the ceiling.
///
/// Runs before the body is read. Bodies without a declared length are cut off
/// by the body limit while the multipart stream is parsed.
pub async fn limit_payload(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let limits = state.validator.limits();
    let declared = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    if let Some(length) = declared {
        if length > limits.max_total_bytes {
            return Err(ValidationError::PayloadTooLarge {
                max_mb: limits.max_content_length_mb(),
            }
            .into());
        }
    }

    Ok(next.run(request).await)
}
