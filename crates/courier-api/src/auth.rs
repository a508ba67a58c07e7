use std::sync::Arc;

use anyhow::anyhow;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{Json, extract::State, http::StatusCode};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::warn;

use courier_db::Database;
use courier_db::models::UserRow;
use courier_types::api::{Claims, LoginRequest, RegisterRequest, TokenResponse};

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub auth: Authenticator,
}

/// Checks credentials against the user store and issues/verifies bearer
/// tokens. The signing secret is injected once at construction; nothing
/// here reads process globals.
pub struct Authenticator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl Authenticator {
    pub fn new(secret: &str) -> Self {
        // Tokens bind a bare username claim and no expiry, so exp must not
        // be required during validation.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Sign a token for the given username. Existence of the user is the
    /// caller's concern; login and registration both prove it first.
    pub fn issue_token(&self, username: &str) -> anyhow::Result<String> {
        let claims = Claims {
            username: username.to_string(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding)?;
        Ok(token)
    }

    /// Verify a token signature and extract the username claim.
    /// Purely cryptographic: the subject is not re-checked against the
    /// store, so a token outlives its user record.
    pub fn verify_token(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|_| ApiError::InvalidToken)
    }

    /// Check a username/password pair against the stored Argon2 hash.
    /// Unknown usernames and wrong passwords fail with the same error.
    pub fn authenticate(
        &self,
        db: &Database,
        username: &str,
        password: &str,
    ) -> Result<UserRow, ApiError> {
        let user = db
            .get_user_by_username(username)
            .map_err(ApiError::Internal)?
            .ok_or(ApiError::InvalidCredentials)?;

        let parsed_hash = PasswordHash::new(&user.password)
            .map_err(|e| ApiError::Internal(anyhow!("Corrupt password hash for {}: {}", username, e)))?;

        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .map_err(|_| ApiError::InvalidCredentials)?;

        Ok(user)
    }

    /// Create a user with a freshly salted Argon2id hash and return the
    /// stored row.
    pub fn register(&self, db: &Database, req: &RegisterRequest) -> Result<UserRow, ApiError> {
        if req.username.len() < 3 || req.username.len() > 32 {
            return Err(ApiError::InvalidRequest("Username must be 3-32 characters"));
        }
        if req.password.len() < 8 {
            return Err(ApiError::InvalidRequest("Password must be at least 8 characters"));
        }

        if db
            .get_user_by_username(&req.username)
            .map_err(ApiError::Internal)?
            .is_some()
        {
            return Err(ApiError::DuplicateUsername);
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(req.password.as_bytes(), &salt)
            .map_err(|e| ApiError::Internal(anyhow!("Password hashing failed: {}", e)))?
            .to_string();

        db.create_user(&req.username, &password_hash, &req.first_name, &req.last_name, &req.phone)
            .map_err(ApiError::Internal)
    }
}

/// Stamp last_login_at off the request path. The login/registration
/// response never waits on this write; failures are logged and suppressed.
pub fn record_login(state: AppState, username: String) {
    tokio::spawn(async move {
        let name = username.clone();
        match tokio::task::spawn_blocking(move || state.db.touch_last_login(&name)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to record last login for {}: {}", username, e),
            Err(e) => warn!("Last-login task failed for {}: {}", username, e),
        }
    });
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<TokenResponse>), ApiError> {
    let user = state.auth.register(&state.db, &req)?;
    let token = state.auth.issue_token(&user.username)?;

    record_login(state.clone(), user.username);

    Ok((StatusCode::CREATED, Json(TokenResponse { token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let user = state.auth.authenticate(&state.db, &req.username, &req.password)?;
    let token = state.auth.issue_token(&user.username)?;

    record_login(state.clone(), user.username);

    Ok(Json(TokenResponse { token }))
}
