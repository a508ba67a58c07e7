use anyhow::anyhow;
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use tracing::{error, warn};
use uuid::Uuid;

use courier_db::models::ProfileRow;
use courier_types::api::{
    Claims, MarkReadResponse, MessageDetailResponse, MessageSentResponse, SendMessageRequest,
};
use courier_types::models::UserProfile;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::guard;

pub async fn get_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MessageDetailResponse>, ApiError> {
    // Run blocking DB work off the async runtime
    let db = state.clone();
    let message_id = id.to_string();
    let (message, from, to) = tokio::task::spawn_blocking(move || db.db.get_message_detail(&message_id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow!("join error: {}", e))
        })?
        .map_err(ApiError::Internal)?
        .ok_or(ApiError::NotFound)?;

    guard::ensure_can_view(&claims.username, &message)?;

    Ok(Json(MessageDetailResponse {
        id,
        body: message.body,
        sent_at: parse_db_time(&message.sent_at),
        read_at: message.read_at.as_deref().map(parse_db_time),
        from_user: profile(from),
        to_user: profile(to),
    }))
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessageSentResponse>), ApiError> {
    if req.body.trim().is_empty() {
        return Err(ApiError::InvalidRequest("Message body must not be empty"));
    }

    let db = state.clone();
    let caller = claims.username.clone();
    let message = tokio::task::spawn_blocking(move || {
        let recipient = guard::resolve_recipient(
            db.db
                .get_user_by_username(&req.to_username)
                .map_err(ApiError::Internal)?,
        )?;

        // from_username always comes from the verified token, never the body
        db.db
            .create_message(&caller, &recipient.username, &req.body)
            .map_err(ApiError::Internal)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal(anyhow!("join error: {}", e))
    })??;

    Ok((
        StatusCode::CREATED,
        Json(MessageSentResponse {
            id: message.id.parse().unwrap_or_else(|e| {
                warn!("Corrupt message id '{}': {}", message.id, e);
                Uuid::default()
            }),
            from_username: message.from_username,
            to_username: message.to_username,
            body: message.body,
            sent_at: parse_db_time(&message.sent_at),
        }),
    ))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let db = state.clone();
    let message_id = id.to_string();
    let caller = claims.username.clone();

    let read_at = tokio::task::spawn_blocking(move || {
        let message = db
            .db
            .get_message(&message_id)
            .map_err(ApiError::Internal)?
            .ok_or(ApiError::NotFound)?;

        guard::ensure_can_mark_read(&caller, &message)?;

        // Idempotent: an already-read message keeps its original timestamp
        db.db
            .mark_read(&message_id)
            .map_err(ApiError::Internal)?
            .ok_or(ApiError::NotFound)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal(anyhow!("join error: {}", e))
    })??;

    Ok(Json(MarkReadResponse {
        id,
        read_at: parse_db_time(&read_at),
    }))
}

fn profile(row: ProfileRow) -> UserProfile {
    UserProfile {
        username: row.username,
        first_name: row.first_name,
        last_name: row.last_name,
        phone: row.phone,
    }
}

fn parse_db_time(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
            // Parse as naive UTC and convert.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}
