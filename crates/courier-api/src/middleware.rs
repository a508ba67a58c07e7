use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::auth::AppState;
use crate::error::ApiError;

/// Extract and verify the bearer token, making the caller's identity
/// available to handlers via request extensions. Runs before any
/// authorization check or store access on the protected routes, so a
/// missing or invalid token is denied before anything is fetched or
/// mutated.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::InvalidToken)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(ApiError::InvalidToken)?;

    let claims = state.auth.verify_token(token)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
