use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Core error taxonomy. Every variant is raised at the point of detection
/// and propagated unchanged to the transport boundary, which maps it to a
/// status and a `{"error": ...}` body here.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Login failure. Deliberately covers both unknown usernames and wrong
    /// passwords so responses cannot be used for username enumeration.
    #[error("Invalid username/password")]
    InvalidCredentials,

    #[error("Username already taken")]
    DuplicateUsername,

    #[error("{0}")]
    InvalidRequest(&'static str),

    #[error("Invalid or missing token")]
    InvalidToken,

    #[error("Message not found")]
    NotFound,

    #[error("Recipient does not exist")]
    UnknownRecipient,

    #[error("{0}")]
    NotAuthorized(&'static str),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidCredentials | ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::DuplicateUsername => StatusCode::CONFLICT,
            ApiError::InvalidToken | ApiError::NotAuthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound | ApiError::UnknownRecipient => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(source) = &self {
            error!("internal error: {:#}", source);
        }

        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
