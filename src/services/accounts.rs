//! Registration, sign-in and the bootstrap administrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::{Validate, ValidationErrors};

use crate::auth::{hash_password, hash_token, verify_password, Session};
use crate::domain::aggregates::{normalize_email, Role, User};
use crate::domain::events::DomainEvent;
use crate::mail::{enqueue_best_effort, templates};
use crate::state::AppState;
use crate::{Result, StoreError};

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[serde(alias = "phoneNumber")]
    #[validate(length(min = 1))]
    pub phone_number: String,
    #[validate(length(min = 8))]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SessionToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

fn first_invalid_field(errors: &ValidationErrors) -> StoreError {
    let field = errors.field_errors().into_keys().min().unwrap_or("input");
    StoreError::validation(format!("Invalid {field}"))
}

/// Runs argon2 on the blocking pool.
async fn hash_off_thread(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| StoreError::Internal(format!("password hashing task failed: {e}")))?
}

pub async fn register(state: &AppState, request: RegisterRequest) -> Result<User> {
    request.validate().map_err(|e| first_invalid_field(&e))?;
    if state.store.find_user_by_email(&normalize_email(&request.email)).await?.is_some() {
        return Err(StoreError::validation("Email is already registered"));
    }

    let password_hash = hash_off_thread(request.password).await?;
    let user = User::register(request.name.trim(), &request.email, request.phone_number.trim(), password_hash, Role::User);
    state.store.insert_user(&user).await?;
    info!(user_id = %user.id, "customer registered");

    enqueue_best_effort(state.store.as_ref(), templates::welcome(&user, &state.config.mail.app_url)).await;
    state.events.publish(DomainEvent::CustomerRegistered { user_id: user.id }).await;
    Ok(user)
}

pub async fn login(state: &AppState, request: LoginRequest) -> Result<SessionToken> {
    let user = state.store.find_user_by_email(&normalize_email(&request.email)).await?.ok_or(StoreError::Unauthorized)?;

    let stored = user.password_hash.clone();
    let verified = tokio::task::spawn_blocking(move || verify_password(&request.password, &stored))
        .await
        .map_err(|e| StoreError::Internal(format!("password check task failed: {e}")))?;
    if !verified {
        return Err(StoreError::Unauthorized);
    }

    let (token, session) = Session::issue(user.id, state.config.session_ttl, Utc::now());
    state.store.insert_session(&session).await?;
    info!(user_id = %user.id, "signed in");
    Ok(SessionToken { token, expires_at: session.expires_at, user })
}

pub async fn logout(state: &AppState, token: &str) -> Result<()> {
    state.store.delete_session(&hash_token(token)).await
}

/// Creates the administrator named by `ADMIN_EMAIL` if it does not exist yet.
/// An existing account with that email is left as it is.
pub async fn bootstrap_admin(state: &AppState) -> Result<()> {
    let (Some(email), Some(password)) = (&state.config.admin_email, &state.config.admin_password) else {
        return Ok(());
    };

    match state.store.find_user_by_email(&normalize_email(email)).await? {
        Some(existing) if existing.is_admin() => Ok(()),
        Some(_) => {
            warn!(email = %email, "ADMIN_EMAIL belongs to a customer account, not promoting it");
            Ok(())
        }
        None => {
            let password_hash = hash_off_thread(password.clone()).await?;
            let admin = User::register("Administrator", email, "", password_hash, Role::Admin);
            state.store.insert_user(&admin).await?;
            info!(user_id = %admin.id, "bootstrap administrator created");
            Ok(())
        }
    }
}
