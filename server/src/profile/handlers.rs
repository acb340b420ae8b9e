//! Current-user HTTP handlers.

use axum::{
    body::Bytes,
    extract::{Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, warn};

use super::avatar::{avatar_file_name, normalize_avatar, remove_avatar, store_avatar, AvatarError};
use super::types::{ProfileUpdateOutcome, SearchQuery, UpdateProfileBody, UserProfile};
use crate::api::body::json_or_default;
use crate::api::updated_at::{parse_optional_updated_at, parse_updated_at};
use crate::api::AppState;
use crate::auth::AuthUser;
use crate::db::{User, UserSummary};
use crate::error::{DomainError, DomainResult};

/// GET /v1/users/me
pub async fn get_me(State(state): State<AppState>, auth: AuthUser) -> DomainResult<Json<UserProfile>> {
    let user = state.profile.get(auth.id).await?;
    Ok(Json(user.into()))
}

/// DELETE /v1/users/me
///
/// 204 even when the account is already gone; the avatar file goes too.
pub async fn delete_me(State(state): State<AppState>, auth: AuthUser) -> DomainResult<StatusCode> {
    if let Some(avatar) = state
        .profile
        .delete_account(auth.id)
        .await?
        .and_then(|user| user.avatar_path)
    {
        discard_avatar(&state, &avatar).await;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/users/search?q=&limit=
pub async fn search_users(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<SearchQuery>,
) -> DomainResult<Json<Vec<UserSummary>>> {
    let users = state
        .profile
        .search_users(auth.id, query.q.as_deref().unwrap_or_default(), query.limit())
        .await?;
    Ok(Json(users))
}

/// PATCH /v1/users/me
///
/// 200 when applied or already in place, 409 with the current user when a
/// newer write won.
pub async fn update_me(
    State(state): State<AppState>,
    auth: AuthUser,
    body: Bytes,
) -> DomainResult<Response> {
    let body: UpdateProfileBody = json_or_default(&body)?;
    let display_name = body
        .display_name
        .ok_or_else(|| DomainError::validation("display_name", "required"))?;
    let updated_at =
        parse_optional_updated_at(body.updated_at.as_deref())?.unwrap_or_else(|| state.clock.now());

    let (user, outcome) = state
        .profile
        .update_display_name(auth.id, &display_name, updated_at)
        .await?;
    Ok(profile_response(user, outcome))
}

/// POST /v1/users/me/avatar
///
/// Multipart with an `avatar` file (512x512) and optional `updated_at`.
/// Each upload lands in its own file; the losing side of the guarded write
/// is deleted, so a rejected upload never changes the served image.
pub async fn upload_avatar(
    State(state): State<AppState>,
    auth: AuthUser,
    mut multipart: Multipart,
) -> DomainResult<Response> {
    let mut file = None;
    let mut updated_at = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| DomainError::validation("avatar", "invalid multipart body"))?
    {
        match field.name() {
            Some("avatar") => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|_| DomainError::validation("avatar", "avatar file is too large"))?;
                file = Some(data);
            }
            Some("updated_at") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|_| DomainError::InvalidUpdatedAt)?;
                if !raw.trim().is_empty() {
                    updated_at = Some(parse_updated_at(&raw)?);
                }
            }
            _ => {}
        }
    }

    let data = file.ok_or_else(|| DomainError::validation("avatar", "file is required"))?;
    let jpeg = tokio::task::spawn_blocking(move || normalize_avatar(&data))
        .await
        .map_err(|e| DomainError::Internal(format!("avatar task failed: {e}")))?
        .map_err(|e| match e {
            AvatarError::Encode(detail) => DomainError::Internal(detail),
            other => DomainError::validation("avatar", other.to_string()),
        })?;

    let file_name = avatar_file_name(auth.id);
    store_avatar(&state.config.avatar_dir, &file_name, &jpeg)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to store avatar");
            DomainError::Internal("failed to store avatar".into())
        })?;

    let updated_at = updated_at.unwrap_or_else(|| state.clock.now());
    let update = match state
        .profile
        .update_avatar(auth.id, &file_name, updated_at)
        .await
    {
        Ok(update) => update,
        Err(e) => {
            discard_avatar(&state, &file_name).await;
            return Err(e);
        }
    };

    match update.outcome {
        ProfileUpdateOutcome::Applied => {
            if let Some(previous) = update.replaced.as_deref().filter(|p| *p != file_name) {
                discard_avatar(&state, previous).await;
            }
        }
        ProfileUpdateOutcome::Noop | ProfileUpdateOutcome::Conflict => {
            discard_avatar(&state, &file_name).await;
        }
    }
    Ok(profile_response(update.user, update.outcome))
}

async fn discard_avatar(state: &AppState, file_name: &str) {
    if let Err(e) = remove_avatar(&state.config.avatar_dir, file_name).await {
        warn!(error = %e, file = file_name, "Failed to remove avatar file");
    }
}

fn profile_response(user: User, outcome: ProfileUpdateOutcome) -> Response {
    let status = match outcome {
        ProfileUpdateOutcome::Applied | ProfileUpdateOutcome::Noop => StatusCode::OK,
        ProfileUpdateOutcome::Conflict => StatusCode::CONFLICT,
    };
    (status, Json(UserProfile::from(user))).into_response()
}
