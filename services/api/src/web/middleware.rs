//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use culinary_core::ports::PortError;
use std::sync::Arc;
use tracing::{error, warn};

use crate::web::state::AppState;

/// Middleware that validates the bearer access token with the auth service.
///
/// If valid, inserts the resolved `Session` into request extensions for handlers to use.
/// If invalid or missing, returns 401 Unauthorized.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // 1. Extract the bearer token
    let access_token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    // 2. Resolve it into a session
    let session = state
        .gotrue
        .session_for_token(&access_token)
        .await
        .map_err(|e| match e {
            PortError::Unauthorized => {
                warn!("Rejected request with an invalid access token");
                StatusCode::UNAUTHORIZED
            }
            e => {
                error!("Failed to validate access token: {}", e);
                StatusCode::BAD_GATEWAY
            }
        })?;

    // 3. Insert the session into request extensions
    req.extensions_mut().insert(session);

    // 4. Continue to the handler
    Ok(next.run(req).await)
}
