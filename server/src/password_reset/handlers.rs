//! Forgot / reset password handlers, mounted under `/v1/auth`.

use axum::{body::Bytes, extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::api::body::json_or_default;
use crate::api::AppState;
use crate::error::DomainResult;

#[derive(Debug, Default, Deserialize)]
pub struct ForgotRequest {
    pub email: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResetRequest {
    pub token: String,
    #[serde(alias = "new_password")]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// POST /v1/auth/forgot
pub async fn forgot(
    State(state): State<AppState>,
    body: Bytes,
) -> DomainResult<Json<MessageResponse>> {
    let body: ForgotRequest = json_or_default(&body)?;
    state.password_reset.forgot(&body.email).await?;
    Ok(Json(MessageResponse {
        message: "If an account exists for that email, a reset link has been sent.",
    }))
}

/// POST /v1/auth/reset
pub async fn reset(
    State(state): State<AppState>,
    body: Bytes,
) -> DomainResult<Json<MessageResponse>> {
    let body: ResetRequest = json_or_default(&body)?;
    state.password_reset.reset(&body.token, &body.password).await?;
    Ok(Json(MessageResponse {
        message: "Password updated. Please sign in again.",
    }))
}
