//! Sessions, password hashing and the authorization policy.
//!
//! Clients authenticate with `Authorization: Bearer <token>`. Only the
//! SHA-256 digest of a token is stored. Every `/api/admin` route passes
//! through [`require_admin`]; handlers never inspect roles themselves.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::{header::AUTHORIZATION, request::Parts, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::aggregates::{Role, User};
use crate::state::AppState;
use crate::{Result, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token_hash: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Issues a fresh token. The plain token is returned once and never stored.
    pub fn issue(user_id: Uuid, ttl: chrono::Duration, now: DateTime<Utc>) -> (String, Self) {
        let token = hex::encode(rand::random::<[u8; 32]>());
        let session = Self { token_hash: hash_token(&token), user_id, created_at: now, expires_at: now + ttl };
        (token, session)
    }
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| StoreError::Internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    PasswordHash::new(stored)
        .map(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
        .unwrap_or(false)
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// The single role rule applied to protected routes.
pub fn authorize(user: &User, required: Role) -> Result<()> {
    match required {
        Role::User => Ok(()),
        Role::Admin if user.is_admin() => Ok(()),
        Role::Admin => Err(StoreError::Unauthorized),
    }
}

pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<User> {
    let token = bearer_token(headers).ok_or(StoreError::Unauthorized)?;
    state
        .store
        .session_user(&hash_token(token), Utc::now())
        .await?
        .ok_or(StoreError::Unauthorized)
}

/// The signed-in user.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = StoreError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        if let Some(user) = parts.extensions.get::<CurrentUser>() {
            return Ok(user.clone());
        }
        authenticate(state, &parts.headers).await.map(CurrentUser)
    }
}

/// Authorization policy for the admin router.
pub async fn require_admin(State(state): State<AppState>, mut request: Request, next: Next) -> Result<Response> {
    let user = authenticate(&state, request.headers()).await?;
    authorize(&user, Role::Admin)?;
    request.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(request).await)
}
