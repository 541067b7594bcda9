//! services/api/src/adapters/http.rs
//!
//! Shared mapping from `reqwest` outcomes to `PortError`s.

use culinary_core::ports::{PortError, PortResult};
use reqwest::{Response, StatusCode};

/// Longest response body kept in diagnostics.
const MAX_BODY_CHARS: usize = 2_000;

/// Classifies a transport-level failure.
pub(crate) fn transport_error(err: reqwest::Error) -> PortError {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        PortError::Unreachable(err.to_string())
    } else if err.is_decode() {
        PortError::Unexpected(format!("Malformed response body: {}", err))
    } else {
        PortError::Unexpected(err.to_string())
    }
}

/// Passes 2xx responses through; anything else becomes `Rejected` with the body.
pub(crate) async fn ensure_success(response: Response) -> PortResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = match response.text().await {
        Ok(body) => body.chars().take(MAX_BODY_CHARS).collect(),
        Err(e) => format!("<unreadable body: {}>", e),
    };
    Err(PortError::Rejected {
        status: status.as_u16(),
        body,
    })
}

/// Like `ensure_success`, but 401/403 are reported as `Unauthorized`.
pub(crate) async fn ensure_authorized(response: Response) -> PortResult<Response> {
    match response.status() {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(PortError::Unauthorized),
        _ => ensure_success(response).await,
    }
}
