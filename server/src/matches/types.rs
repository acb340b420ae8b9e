use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::UserSummary;

/// Game format tag.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "game_format", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum GameFormat {
    #[default]
    Commander,
    Brawl,
    Standard,
    Modern,
}

impl GameFormat {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Commander => "commander",
            Self::Brawl => "brawl",
            Self::Standard => "standard",
            Self::Modern => "modern",
        }
    }
}

impl fmt::Display for GameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown format name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFormat;

impl FromStr for GameFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "commander" => Ok(Self::Commander),
            "brawl" => Ok(Self::Brawl),
            "standard" => Ok(Self::Standard),
            "modern" => Ok(Self::Modern),
            _ => Err(UnknownFormat),
        }
    }
}

/// One seat in a ranked result list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ParticipantInput {
    #[serde(default)]
    pub seat_index: i32,
    pub user_id: Option<Uuid>,
    pub guest_name: Option<String>,
    pub display_name: Option<String>,
    pub place: i32,
    pub eliminated_turn_number: Option<i32>,
    pub eliminated_during_seat_index: Option<i32>,
    pub total_turn_time_ms: Option<i64>,
    pub turns_taken: Option<i32>,
}

/// The two accepted request shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchShape {
    /// Explicit placements; guests and non-friends allowed.
    Ranked(Vec<ParticipantInput>),
    /// Flat player list plus a winner; every player must be a friend.
    Legacy {
        player_ids: Vec<Uuid>,
        winner_id: Option<Uuid>,
    },
}

/// Input to `MatchService::create_match`.
#[derive(Debug, Clone)]
pub struct CreateMatchParams {
    pub shape: MatchShape,
    pub format: Option<String>,
    pub client_match_id: Option<String>,
    /// Stamped on the created row.
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub played_at: Option<DateTime<Utc>>,
    pub total_duration_seconds: i32,
    pub turn_count: i32,
}

/// Validated participant ready for storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewParticipant {
    pub seat_index: i32,
    pub user_id: Option<Uuid>,
    pub guest_name: Option<String>,
    pub display_name: Option<String>,
    pub place: i32,
    pub eliminated_turn_number: Option<i32>,
    pub eliminated_during_seat_index: Option<i32>,
    pub total_turn_time_ms: Option<i64>,
    pub turns_taken: Option<i32>,
}

/// Validated match ready for storage.
#[derive(Debug, Clone)]
pub struct NewMatch {
    pub id: Uuid,
    pub created_by: Uuid,
    pub client_ref: Option<String>,
    pub format: GameFormat,
    pub winner_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub played_at: Option<DateTime<Utc>>,
    pub total_duration_seconds: i32,
    pub turn_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub participants: Vec<NewParticipant>,
}

/// Stored match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Match {
    pub id: Uuid,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(serialize_with = "crate::api::updated_at::serialize")]
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_match_id: Option<String>,
    pub format: GameFormat,
    /// Registered place-1 participant; `None` when a guest won.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub played_at: Option<DateTime<Utc>>,
    pub total_duration_seconds: i32,
    pub turn_count: i32,
    pub players: Vec<MatchPlayer>,
}

impl Match {
    pub fn includes_user(&self, user_id: Uuid) -> bool {
        self.players.iter().any(|p| p.user_id() == Some(user_id))
    }

    pub fn place_of(&self, user_id: Uuid) -> Option<i32> {
        self.players
            .iter()
            .find(|p| p.user_id() == Some(user_id))
            .map(|p| p.place)
    }

    pub fn winner(&self) -> Option<&MatchPlayer> {
        self.players.iter().find(|p| p.place == 1)
    }
}

/// Participant as read back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchPlayer {
    pub seat_index: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub place: i32,
    pub is_winner: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eliminated_turn_number: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eliminated_during_seat_index: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_turn_time_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turns_taken: Option<i32>,
}

impl MatchPlayer {
    pub fn user_id(&self) -> Option<Uuid> {
        self.user.as_ref().map(|u| u.id)
    }
}

/// What the store did with an insert.
#[derive(Debug, Clone)]
pub enum MatchInsert {
    Created(Match),
    /// Same `(creator, client_ref)` won a concurrent race.
    Existing(Match),
}

/// Result of `create_match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchCreateOutcome {
    Applied,
    /// Already recorded under this client match ID.
    Conflict,
}
