//! Friend HTTP handlers.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{
        header::{CACHE_CONTROL, ETAG, IF_NONE_MATCH},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;

use super::etag::connections_etag;
use super::types::{
    FriendConnection, FriendRequest, FriendRequestActionBody, FriendRequestOutcome,
    FriendsOverview, SendFriendRequestBody,
};
use crate::api::body::json_or_default;
use crate::api::updated_at::parse_optional_updated_at;
use crate::api::AppState;
use crate::auth::AuthUser;
use crate::error::{DomainError, DomainResult};

/// GET /v1/friends
pub async fn list_overview(
    State(state): State<AppState>,
    auth: AuthUser,
) -> DomainResult<Json<FriendsOverview>> {
    Ok(Json(state.friends.list_overview(auth.id).await?))
}

/// GET /v1/friends/connections
///
/// Answers `304 Not Modified` when `If-None-Match` carries the current tag.
pub async fn list_connections(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
) -> DomainResult<Response> {
    let connections = state.friends.list_connections(auth.id).await?;
    let latest = state.friends.latest_update(auth.id).await?;
    let etag = connections_etag(auth.id, &connections, latest);

    let etag_value =
        HeaderValue::from_str(&etag).map_err(|e| DomainError::Internal(e.to_string()))?;
    let cache_control = HeaderValue::from_static("private, max-age=0");

    if if_none_match_hits(&headers, &etag) {
        return Ok((
            StatusCode::NOT_MODIFIED,
            [(ETAG, etag_value), (CACHE_CONTROL, cache_control)],
        )
            .into_response());
    }

    Ok((
        [(ETAG, etag_value), (CACHE_CONTROL, cache_control)],
        Json(connections),
    )
        .into_response())
}

fn if_none_match_hits(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(IF_NONE_MATCH)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .any(|candidate| candidate == "*" || candidate == etag)
}

/// POST /v1/friends/requests
pub async fn create_request(
    State(state): State<AppState>,
    auth: AuthUser,
    body: Bytes,
) -> DomainResult<(StatusCode, Json<FriendRequest>)> {
    let body: SendFriendRequestBody = json_or_default(&body)?;
    let request = state.friends.create_request(auth.id, &body.username).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

/// POST /v1/friends/requests/{id}/accept
pub async fn accept_request(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(request_id): Path<Uuid>,
    body: Bytes,
) -> DomainResult<Response> {
    let body: FriendRequestActionBody = json_or_default(&body)?;
    let updated_at = parse_optional_updated_at(body.updated_at.as_deref())?;
    let outcome = state.friends.accept(auth.id, request_id, updated_at).await?;
    outcome_response(&state, auth.id, outcome).await
}

/// POST /v1/friends/requests/{id}/decline
pub async fn decline_request(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(request_id): Path<Uuid>,
    body: Bytes,
) -> DomainResult<Response> {
    let body: FriendRequestActionBody = json_or_default(&body)?;
    let updated_at = parse_optional_updated_at(body.updated_at.as_deref())?;
    let outcome = state.friends.decline(auth.id, request_id, updated_at).await?;
    outcome_response(&state, auth.id, outcome).await
}

/// POST /v1/friends/requests/{id}/cancel
pub async fn cancel_request(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(request_id): Path<Uuid>,
    body: Bytes,
) -> DomainResult<Response> {
    let body: FriendRequestActionBody = json_or_default(&body)?;
    let updated_at = parse_optional_updated_at(body.updated_at.as_deref())?;
    let outcome = state.friends.cancel(auth.id, request_id, updated_at).await?;
    outcome_response(&state, auth.id, outcome).await
}

/// 204 on success; on conflict, 409 with the caller's current connections.
async fn outcome_response(
    state: &AppState,
    user_id: Uuid,
    outcome: FriendRequestOutcome,
) -> DomainResult<Response> {
    match outcome {
        FriendRequestOutcome::Applied => Ok(StatusCode::NO_CONTENT.into_response()),
        FriendRequestOutcome::Conflict => {
            let connections: Vec<FriendConnection> =
                state.friends.list_connections(user_id).await?;
            Ok((StatusCode::CONFLICT, Json(connections)).into_response())
        }
    }
}

/// DELETE /v1/friends/{id}
pub async fn remove_friend(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(friend_id): Path<Uuid>,
) -> DomainResult<StatusCode> {
    state.friends.remove_friend(auth.id, friend_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
