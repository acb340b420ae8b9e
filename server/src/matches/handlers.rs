//! Match and stats HTTP handlers.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::stats::{HeadToHead, StatsSummary};
use super::types::{CreateMatchParams, Match, MatchCreateOutcome, MatchShape, ParticipantInput};
use crate::api::body::json_or_default;
use crate::api::updated_at::parse_optional_updated_at;
use crate::api::AppState;
use crate::auth::AuthUser;
use crate::clock::truncate_to_millis;
use crate::error::{DomainError, DomainResult};

/// Ranked entry in the compact `results` shape.
#[derive(Debug, Deserialize)]
pub struct ResultEntry {
    pub id: Uuid,
    pub rank: i32,
    pub elimination_turn: Option<i32>,
}

/// Body of `POST /v1/matches`.
///
/// `players` (seats with places, guests allowed) and `results` (user ids
/// with ranks) are the ranked shapes; otherwise `player_ids` + `winner_id`.
#[derive(Debug, Default, Deserialize)]
pub struct CreateMatchBody {
    #[serde(default)]
    pub players: Vec<ParticipantInput>,
    #[serde(default)]
    pub results: Vec<ResultEntry>,
    #[serde(default)]
    pub player_ids: Vec<Uuid>,
    pub winner_id: Option<Uuid>,
    pub format: Option<String>,
    pub client_match_id: Option<String>,
    pub client_ref: Option<String>,
    pub updated_at: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub played_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_duration_seconds: i32,
    #[serde(default)]
    pub turn_count: i32,
}

#[derive(Debug, Serialize)]
pub struct CreateMatchResponse {
    pub match_id: Uuid,
    #[serde(rename = "match")]
    pub recorded: Match,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats_summary: Option<StatsSummary>,
}

impl CreateMatchBody {
    fn into_params(self, now: DateTime<Utc>) -> DomainResult<CreateMatchParams> {
        let updated_at = parse_optional_updated_at(self.updated_at.as_deref())?
            .or(self.ended_at)
            .unwrap_or(now);

        let client_match_id = non_blank(self.client_match_id);
        let client_ref = non_blank(self.client_ref);
        let client_match_id = match (client_match_id, client_ref) {
            (Some(id), Some(alias)) if id != alias => {
                return Err(DomainError::validation(
                    "client_match_id",
                    "client_match_id must match client_ref",
                ));
            }
            (id, alias) => id.or(alias),
        };

        let mut total_duration_seconds = self.total_duration_seconds;
        if total_duration_seconds == 0 {
            if let (Some(started), Some(ended)) = (self.started_at, self.ended_at) {
                let diff = (ended - started).num_seconds();
                if diff > 0 {
                    total_duration_seconds = i32::try_from(diff).unwrap_or(i32::MAX);
                }
            }
        }

        let shape = if !self.players.is_empty() {
            MatchShape::Ranked(self.players)
        } else if !self.results.is_empty() {
            MatchShape::Ranked(
                self.results
                    .into_iter()
                    .zip(0..)
                    .map(|(r, seat_index)| ParticipantInput {
                        seat_index,
                        user_id: Some(r.id),
                        place: r.rank,
                        eliminated_turn_number: r.elimination_turn,
                        ..ParticipantInput::default()
                    })
                    .collect(),
            )
        } else {
            MatchShape::Legacy {
                player_ids: self.player_ids,
                winner_id: self.winner_id,
            }
        };

        Ok(CreateMatchParams {
            shape,
            format: self.format,
            client_match_id,
            updated_at: truncate_to_millis(updated_at),
            started_at: self.started_at,
            ended_at: self.ended_at,
            played_at: self.played_at,
            total_duration_seconds,
            turn_count: self.turn_count,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
}

/// POST /v1/matches
///
/// 201 with the match and refreshed stats, or 409 with the stored match when
/// the client match id was already used.
#[tracing::instrument(skip_all, fields(user_id = %auth.id))]
pub async fn create_match(
    State(state): State<AppState>,
    auth: AuthUser,
    body: Bytes,
) -> DomainResult<Response> {
    let body: CreateMatchBody = json_or_default(&body)?;
    let params = body.into_params(state.clock.now())?;

    let (recorded, outcome) = match state.matches.create_match(auth.id, params).await {
        Ok(result) => result,
        Err(DomainError::Validation(fields)) => {
            warn!(fields = ?fields, "Match validation failed");
            return Err(DomainError::Validation(fields));
        }
        Err(e) => return Err(e),
    };

    match outcome {
        MatchCreateOutcome::Conflict => Ok((
            StatusCode::CONFLICT,
            Json(CreateMatchResponse {
                match_id: recorded.id,
                recorded,
                stats_summary: None,
            }),
        )
            .into_response()),
        MatchCreateOutcome::Applied => {
            let summary = state.matches.stats_summary(auth.id).await?;
            Ok((
                StatusCode::CREATED,
                Json(CreateMatchResponse {
                    match_id: recorded.id,
                    recorded,
                    stats_summary: Some(summary),
                }),
            )
                .into_response())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

/// GET /v1/matches
pub async fn list_matches(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ListQuery>,
) -> DomainResult<Json<Vec<Match>>> {
    Ok(Json(state.matches.list_matches(auth.id, query.limit).await?))
}

/// GET /v1/matches/{id}
pub async fn get_match(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(match_id): Path<Uuid>,
) -> DomainResult<Json<Match>> {
    Ok(Json(state.matches.get_match(auth.id, match_id).await?))
}

/// GET /v1/stats/summary
pub async fn stats_summary(
    State(state): State<AppState>,
    auth: AuthUser,
) -> DomainResult<Json<StatsSummary>> {
    Ok(Json(state.matches.stats_summary(auth.id).await?))
}

/// GET /v1/stats/head-to-head/{id}
pub async fn head_to_head(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(opponent_id): Path<Uuid>,
) -> DomainResult<Json<HeadToHead>> {
    Ok(Json(state.matches.head_to_head(auth.id, opponent_id).await?))
}
