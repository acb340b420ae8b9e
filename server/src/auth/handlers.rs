//! Auth HTTP handlers.

use axum::{body::Bytes, extract::State, http::{HeaderMap, StatusCode}, Json};

use super::middleware::bearer_token;
use super::types::{AuthResponse, ExternalLoginRequest, LoginRequest, RegisterRequest};
use crate::api::body::json_or_default;
use crate::api::AppState;
use crate::db::IdentityProvider;
use crate::error::{DomainError, DomainResult};

/// POST /v1/auth/register
pub async fn register(
    State(state): State<AppState>,
    body: Bytes,
) -> DomainResult<(StatusCode, Json<AuthResponse>)> {
    let body: RegisterRequest = json_or_default(&body)?;
    let session = state.auth.register(body).await?;
    Ok((StatusCode::CREATED, Json(session.into())))
}

/// POST /v1/auth/login
pub async fn login(
    State(state): State<AppState>,
    body: Bytes,
) -> DomainResult<Json<AuthResponse>> {
    let body: LoginRequest = json_or_default(&body)?;
    Ok(Json(state.auth.login(body).await?.into()))
}

/// POST /v1/auth/logout
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> DomainResult<StatusCode> {
    let token = bearer_token(&headers).ok_or(DomainError::Unauthorized)?;
    state.auth.logout(token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/auth/google
pub async fn google(
    State(state): State<AppState>,
    body: Bytes,
) -> DomainResult<Json<AuthResponse>> {
    external(&state, IdentityProvider::Google, &body).await
}

/// POST /v1/auth/apple
pub async fn apple(
    State(state): State<AppState>,
    body: Bytes,
) -> DomainResult<Json<AuthResponse>> {
    external(&state, IdentityProvider::Apple, &body).await
}

async fn external(
    state: &AppState,
    provider: IdentityProvider,
    body: &Bytes,
) -> DomainResult<Json<AuthResponse>> {
    let body: ExternalLoginRequest = json_or_default(body)?;
    if body.id_token.trim().is_empty() {
        return Err(DomainError::validation("id_token", "required"));
    }
    Ok(Json(
        state.auth.login_external(provider, &body.id_token).await?.into(),
    ))
}
