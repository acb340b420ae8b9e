//! Match queries.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, QueryBuilder};
use uuid::Uuid;

use super::models::UserSummary;
use super::{is_foreign_key_violation, unique_violation, PgStore};
use crate::error::{DomainError, DomainResult, StorageContext};
use crate::matches::types::{GameFormat, Match, MatchInsert, MatchPlayer, NewMatch};
use crate::store::MatchStore;

const MATCH_COLUMNS: &str = "m.id, m.created_by, m.client_ref, m.format, m.winner_id, \
     m.started_at, m.ended_at, m.played_at, m.total_duration_seconds, m.turn_count, \
     m.created_at, m.updated_at";

#[derive(FromRow)]
struct MatchRow {
    id: Uuid,
    created_by: Uuid,
    client_ref: Option<String>,
    format: GameFormat,
    winner_id: Option<Uuid>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    played_at: Option<DateTime<Utc>>,
    total_duration_seconds: i32,
    turn_count: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Participant with the registered user's public fields, when there is one.
#[derive(FromRow)]
struct ParticipantRow {
    match_id: Uuid,
    seat_index: i32,
    user_id: Option<Uuid>,
    guest_name: Option<String>,
    display_name: Option<String>,
    place: i32,
    eliminated_turn_number: Option<i32>,
    eliminated_during_seat_index: Option<i32>,
    total_turn_time_ms: Option<i64>,
    turns_taken: Option<i32>,
    username: Option<String>,
    user_display_name: Option<String>,
    avatar_path: Option<String>,
    avatar_updated_at: Option<DateTime<Utc>>,
    user_updated_at: Option<DateTime<Utc>>,
}

impl ParticipantRow {
    fn into_player(self) -> MatchPlayer {
        let user = match (self.user_id, self.username) {
            (Some(id), Some(username)) => Some(UserSummary {
                id,
                username,
                display_name: self.user_display_name,
                avatar_path: self.avatar_path,
                avatar_updated_at: self.avatar_updated_at,
                updated_at: self.user_updated_at,
            }),
            _ => None,
        };
        MatchPlayer {
            seat_index: self.seat_index,
            user,
            guest_name: self.guest_name,
            display_name: self.display_name,
            place: self.place,
            is_winner: self.place == 1,
            eliminated_turn_number: self.eliminated_turn_number,
            eliminated_during_seat_index: self.eliminated_during_seat_index,
            total_turn_time_ms: self.total_turn_time_ms,
            turns_taken: self.turns_taken,
        }
    }
}

impl PgStore {
    /// Attaches participants to match rows, preserving row order.
    async fn hydrate(&self, rows: Vec<MatchRow>) -> DomainResult<Vec<Match>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

        let participants = sqlx::query_as::<_, ParticipantRow>(
            "SELECT p.match_id, p.seat_index, p.user_id, p.guest_name, p.display_name, p.place,
                    p.eliminated_turn_number, p.eliminated_during_seat_index,
                    p.total_turn_time_ms, p.turns_taken,
                    u.username,
                    u.display_name AS user_display_name,
                    u.avatar_path,
                    u.avatar_updated_at,
                    u.updated_at AS user_updated_at
             FROM match_participants p
             LEFT JOIN users u ON u.id = p.user_id
             WHERE p.match_id = ANY($1)
             ORDER BY p.match_id, p.seat_index",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .storage("load match participants")?;

        let mut by_match: HashMap<Uuid, Vec<MatchPlayer>> = HashMap::new();
        for row in participants {
            by_match
                .entry(row.match_id)
                .or_default()
                .push(row.into_player());
        }

        Ok(rows
            .into_iter()
            .map(|row| Match {
                players: by_match.remove(&row.id).unwrap_or_default(),
                id: row.id,
                created_by: row.created_by,
                created_at: row.created_at,
                updated_at: row.updated_at,
                client_match_id: row.client_ref,
                format: row.format,
                winner_id: row.winner_id,
                started_at: row.started_at,
                ended_at: row.ended_at,
                played_at: row.played_at,
                total_duration_seconds: row.total_duration_seconds,
                turn_count: row.turn_count,
            })
            .collect())
    }

    async fn load_match(&self, match_id: Uuid) -> DomainResult<Option<Match>> {
        let row = sqlx::query_as::<_, MatchRow>(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches m WHERE m.id = $1"
        ))
        .bind(match_id)
        .fetch_optional(&self.pool)
        .await
        .storage("load match")?;

        Ok(self.hydrate(row.into_iter().collect()).await?.pop())
    }
}

#[async_trait]
impl MatchStore for PgStore {
    async fn find_by_client_ref(
        &self,
        created_by: Uuid,
        client_ref: &str,
    ) -> DomainResult<Option<Match>> {
        let row = sqlx::query_as::<_, MatchRow>(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches m WHERE m.created_by = $1 AND m.client_ref = $2"
        ))
        .bind(created_by)
        .bind(client_ref)
        .fetch_optional(&self.pool)
        .await
        .storage("find match by client ref")?;

        Ok(self.hydrate(row.into_iter().collect()).await?.pop())
    }

    async fn insert_match(&self, new: NewMatch) -> DomainResult<MatchInsert> {
        let mut tx = self.pool.begin().await.storage("begin match insert")?;

        let inserted = sqlx::query(
            "INSERT INTO matches (id, created_by, client_ref, format, winner_id, started_at,
                                  ended_at, played_at, total_duration_seconds, turn_count,
                                  created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(new.id)
        .bind(new.created_by)
        .bind(&new.client_ref)
        .bind(new.format)
        .bind(new.winner_id)
        .bind(new.started_at)
        .bind(new.ended_at)
        .bind(new.played_at)
        .bind(new.total_duration_seconds)
        .bind(new.turn_count)
        .bind(new.created_at)
        .bind(new.updated_at)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(e) if unique_violation(&e) == Some("matches_client_ref_uq") => {
                drop(tx);
                let client_ref = new.client_ref.as_deref().unwrap_or_default();
                return match self.find_by_client_ref(new.created_by, client_ref).await? {
                    Some(existing) => Ok(MatchInsert::Existing(existing)),
                    None => Err(DomainError::Internal(
                        "match replay vanished after unique violation".into(),
                    )),
                };
            }
            Err(e) if is_foreign_key_violation(&e) => {
                return Err(DomainError::validation("players", "unknown user"));
            }
            Err(e) => return Err(e).storage("insert match"),
        }

        if !new.participants.is_empty() {
            let mut builder = QueryBuilder::new(
                "INSERT INTO match_participants (match_id, seat_index, user_id, guest_name, \
                 display_name, place, eliminated_turn_number, eliminated_during_seat_index, \
                 total_turn_time_ms, turns_taken) ",
            );
            builder.push_values(&new.participants, |mut b, p| {
                b.push_bind(new.id)
                    .push_bind(p.seat_index)
                    .push_bind(p.user_id)
                    .push_bind(&p.guest_name)
                    .push_bind(&p.display_name)
                    .push_bind(p.place)
                    .push_bind(p.eliminated_turn_number)
                    .push_bind(p.eliminated_during_seat_index)
                    .push_bind(p.total_turn_time_ms)
                    .push_bind(p.turns_taken);
            });

            if let Err(e) = builder.build().execute(&mut *tx).await {
                if is_foreign_key_violation(&e) {
                    return Err(DomainError::validation("players", "unknown user"));
                }
                return Err(e).storage("insert match participants");
            }
        }

        tx.commit().await.storage("commit match insert")?;

        self.load_match(new.id)
            .await?
            .map(MatchInsert::Created)
            .ok_or_else(|| DomainError::Internal("inserted match not found".into()))
    }

    async fn get_for_user(&self, user_id: Uuid, match_id: Uuid) -> DomainResult<Option<Match>> {
        let row = sqlx::query_as::<_, MatchRow>(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches m
             WHERE m.id = $1
               AND (m.created_by = $2 OR EXISTS (
                   SELECT 1 FROM match_participants p
                   WHERE p.match_id = m.id AND p.user_id = $2
               ))"
        ))
        .bind(match_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .storage("get match")?;

        Ok(self.hydrate(row.into_iter().collect()).await?.pop())
    }

    async fn list_for_user(&self, user_id: Uuid, limit: Option<i64>) -> DomainResult<Vec<Match>> {
        let rows = sqlx::query_as::<_, MatchRow>(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches m
             WHERE EXISTS (
                 SELECT 1 FROM match_participants p
                 WHERE p.match_id = m.id AND p.user_id = $1
             )
             ORDER BY m.created_at DESC, m.id DESC
             LIMIT $2"
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .storage("list matches")?;

        self.hydrate(rows).await
    }
}
