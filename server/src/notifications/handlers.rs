//! Push token handlers.

use axum::{body::Bytes, extract::State, http::StatusCode};
use serde::Deserialize;

use crate::api::body::json_or_default;
use crate::api::AppState;
use crate::auth::AuthUser;
use crate::db::Platform;
use crate::error::{DomainError, DomainResult};

#[derive(Debug, Default, Deserialize)]
pub struct TokenBody {
    #[serde(default)]
    pub token: String,
    pub platform: Option<String>,
}

fn parse_platform(raw: Option<&str>) -> DomainResult<Platform> {
    match raw.map(|p| p.trim().to_ascii_lowercase()).as_deref() {
        Some("ios") => Ok(Platform::Ios),
        Some("android") => Ok(Platform::Android),
        _ => Err(DomainError::validation("platform", "must be ios or android")),
    }
}

/// POST /v1/notifications/token
pub async fn register_token(
    State(state): State<AppState>,
    auth: AuthUser,
    body: Bytes,
) -> DomainResult<StatusCode> {
    let body: TokenBody = json_or_default(&body)?;
    let platform = parse_platform(body.platform.as_deref())?;
    state
        .notifications
        .register_token(auth.id, &body.token, platform)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /v1/notifications/token
pub async fn delete_token(
    State(state): State<AppState>,
    auth: AuthUser,
    body: Bytes,
) -> DomainResult<StatusCode> {
    let body: TokenBody = json_or_default(&body)?;
    state.notifications.delete_token(auth.id, &body.token).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_platform() {
        assert_eq!(parse_platform(Some("iOS")).unwrap(), Platform::Ios);
        assert_eq!(parse_platform(Some(" android ")).unwrap(), Platform::Android);
        assert!(parse_platform(Some("web")).is_err());
        assert!(parse_platform(None).is_err());
    }
}
