//! Match creation, reads and stats.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use super::stats::{self, HeadToHead, StatsSummary};
use super::types::{
    CreateMatchParams, GameFormat, Match, MatchCreateOutcome, MatchInsert, MatchShape, NewMatch,
    NewParticipant, ParticipantInput,
};
use super::FriendshipChecker;
use crate::clock::{truncate_to_millis, Clock};
use crate::error::{DomainError, DomainResult};
use crate::store::{MatchStore, UserStore};

/// Default page size for match lists.
pub const DEFAULT_LIST_LIMIT: i64 = 25;
/// Largest page a client may request.
pub const MAX_LIST_LIMIT: i64 = 100;

const FORMAT_HINT: &str = "must be commander, brawl, standard, or modern";

pub struct MatchService {
    matches: Arc<dyn MatchStore>,
    users: Arc<dyn UserStore>,
    friends: Arc<dyn FriendshipChecker>,
    clock: Arc<dyn Clock>,
}

impl MatchService {
    pub fn new(
        matches: Arc<dyn MatchStore>,
        users: Arc<dyn UserStore>,
        friends: Arc<dyn FriendshipChecker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            matches,
            users,
            friends,
            clock,
        }
    }

    /// Records a finished game.
    ///
    /// A non-empty `client_match_id` already used by this creator returns the
    /// stored match with [`MatchCreateOutcome::Conflict`] and writes nothing.
    #[tracing::instrument(skip(self, params), fields(client_match_id = ?params.client_match_id))]
    pub async fn create_match(
        &self,
        creator_id: Uuid,
        params: CreateMatchParams,
    ) -> DomainResult<(Match, MatchCreateOutcome)> {
        let client_ref = params
            .client_match_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned);

        if let Some(client_ref) = client_ref.as_deref() {
            if let Some(existing) = self.matches.find_by_client_ref(creator_id, client_ref).await? {
                info!(match_id = %existing.id, "Match replay, returning stored match");
                return Ok((existing, MatchCreateOutcome::Conflict));
            }
        }

        let (participants, legacy) = match params.shape {
            MatchShape::Ranked(entries) => (ranked_participants(entries, params.format.as_deref())?, false),
            MatchShape::Legacy {
                player_ids,
                winner_id,
            } => (
                legacy_participants(creator_id, player_ids, winner_id, params.format.as_deref())?,
                true,
            ),
        };
        let format = parse_format(params.format.as_deref())?;

        if params.total_duration_seconds < 0 {
            return Err(DomainError::validation("total_duration_seconds", "must be >= 0"));
        }
        if params.turn_count < 0 {
            return Err(DomainError::validation("turn_count", "must be >= 0"));
        }

        if legacy {
            for user_id in participants.iter().filter_map(|p| p.user_id) {
                if user_id != creator_id && !self.friends.are_friends(creator_id, user_id).await? {
                    return Err(DomainError::Forbidden);
                }
            }
        }

        let winner_id = participants
            .iter()
            .find(|p| p.place == 1)
            .and_then(|p| p.user_id);

        let new = NewMatch {
            id: Uuid::now_v7(),
            created_by: creator_id,
            client_ref,
            format,
            winner_id,
            started_at: params.started_at,
            ended_at: params.ended_at,
            played_at: params.played_at,
            total_duration_seconds: params.total_duration_seconds,
            turn_count: params.turn_count,
            created_at: truncate_to_millis(self.clock.now()),
            updated_at: truncate_to_millis(params.updated_at),
            participants,
        };

        match self.matches.insert_match(new).await? {
            MatchInsert::Created(created) => {
                info!(match_id = %created.id, players = created.players.len(), "Match recorded");
                Ok((created, MatchCreateOutcome::Applied))
            }
            MatchInsert::Existing(existing) => {
                info!(match_id = %existing.id, "Match recorded concurrently, returning stored match");
                Ok((existing, MatchCreateOutcome::Conflict))
            }
        }
    }

    /// Newest first; `limit` is clamped to `1..=100`, default 25.
    pub async fn list_matches(&self, user_id: Uuid, limit: Option<i64>) -> DomainResult<Vec<Match>> {
        let limit = limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);
        self.matches.list_for_user(user_id, Some(limit)).await
    }

    pub async fn get_match(&self, user_id: Uuid, match_id: Uuid) -> DomainResult<Match> {
        self.matches
            .get_for_user(user_id, match_id)
            .await?
            .ok_or(DomainError::NotFound)
    }

    pub async fn stats_summary(&self, user_id: Uuid) -> DomainResult<StatsSummary> {
        let matches = self.matches.list_for_user(user_id, None).await?;
        Ok(stats::summarize(user_id, &matches))
    }

    pub async fn head_to_head(&self, user_id: Uuid, opponent_id: Uuid) -> DomainResult<HeadToHead> {
        let opponent = self
            .users
            .find_by_id(opponent_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        let matches = self.matches.list_for_user(user_id, None).await?;
        Ok(stats::head_to_head(user_id, opponent.summary(), &matches))
    }
}

fn parse_format(raw: Option<&str>) -> DomainResult<GameFormat> {
    match raw.map(str::trim) {
        None | Some("") => Ok(GameFormat::default()),
        Some(name) => name
            .parse()
            .map_err(|_| DomainError::validation("format", FORMAT_HINT)),
    }
}

fn ranked_participants(
    entries: Vec<ParticipantInput>,
    format: Option<&str>,
) -> DomainResult<Vec<NewParticipant>> {
    if entries.len() < 2 {
        return Err(DomainError::validation("players", "must have at least 2 players"));
    }
    if entries.iter().filter(|e| e.place == 1).count() != 1 {
        return Err(DomainError::validation(
            "players",
            "exactly one player must have place 1",
        ));
    }
    parse_format(format)?;

    let mut seen = HashSet::with_capacity(entries.len());
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let guest_name = trimmed(entry.guest_name);
        match (entry.user_id, &guest_name) {
            (Some(user_id), _) => {
                if !seen.insert(user_id) {
                    return Err(DomainError::validation("players", "player ids must be unique"));
                }
            }
            (None, Some(_)) => {}
            (None, None) => {
                return Err(DomainError::validation(
                    "players",
                    "each player needs a user_id or guest_name",
                ));
            }
        }
        if entry.place < 1 {
            return Err(DomainError::validation("players", "place must be >= 1"));
        }
        if entry.eliminated_turn_number.is_some_and(|t| t < 0)
            || entry.turns_taken.is_some_and(|t| t < 0)
            || entry.total_turn_time_ms.is_some_and(|t| t < 0)
        {
            return Err(DomainError::validation("players", "turn data must be >= 0"));
        }

        let user_id = entry.user_id;
        let display_name = trimmed(entry.display_name).or_else(|| {
            if user_id.is_none() {
                guest_name.clone()
            } else {
                None
            }
        });
        out.push(NewParticipant {
            seat_index: entry.seat_index,
            user_id,
            guest_name: if user_id.is_some() { None } else { guest_name },
            display_name,
            place: entry.place,
            eliminated_turn_number: entry.eliminated_turn_number,
            eliminated_during_seat_index: entry.eliminated_during_seat_index,
            total_turn_time_ms: entry.total_turn_time_ms,
            turns_taken: entry.turns_taken,
        });
    }
    Ok(out)
}

/// Flat list: de-duplicated, creator appended, winner at place 1 and
/// everyone else at place 2.
fn legacy_participants(
    creator_id: Uuid,
    player_ids: Vec<Uuid>,
    winner_id: Option<Uuid>,
    format: Option<&str>,
) -> DomainResult<Vec<NewParticipant>> {
    let mut players: Vec<Uuid> = Vec::with_capacity(player_ids.len() + 1);
    for id in player_ids.into_iter().chain(std::iter::once(creator_id)) {
        if !players.contains(&id) {
            players.push(id);
        }
    }

    if players.len() < 2 {
        return Err(DomainError::validation("players", "must have at least 2 players"));
    }
    let Some(winner_id) = winner_id else {
        return Err(DomainError::validation("winner_id", "required"));
    };
    parse_format(format)?;
    if !players.contains(&winner_id) {
        return Err(DomainError::validation(
            "winner_id",
            "winner must be one of the players",
        ));
    }

    Ok(players
        .into_iter()
        .zip(0..)
        .map(|(user_id, seat_index)| NewParticipant {
            seat_index,
            user_id: Some(user_id),
            guest_name: None,
            display_name: None,
            place: if user_id == winner_id { 1 } else { 2 },
            eliminated_turn_number: None,
            eliminated_during_seat_index: None,
            total_turn_time_ms: None,
            turns_taken: None,
        })
        .collect())
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::clock::ManualClock;
    use crate::db::NewUser;
    use crate::social::{FriendsService, NoopNotifier};
    use crate::store::memory::MemoryStore;
    use crate::store::FriendshipStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        service: MatchService,
        friends: Arc<FriendsService>,
    }

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(epoch()));
        let friends = Arc::new(FriendsService::new(
            store.clone(),
            store.clone(),
            Arc::new(NoopNotifier),
            clock.clone(),
        ));
        let service = MatchService::new(store.clone(), store.clone(), friends.clone(), clock);
        Fixture {
            store,
            service,
            friends,
        }
    }

    async fn user(store: &MemoryStore, name: &str) -> Uuid {
        store
            .create_user(NewUser {
                id: Uuid::now_v7(),
                email: format!("{name}@example.com"),
                username: name.to_string(),
                display_name: None,
                password_hash: None,
                created_at: epoch(),
            })
            .await
            .unwrap()
            .id
    }

    async fn befriend(f: &Fixture, a: Uuid, b: Uuid) {
        let friendship = f
            .store
            .create_request(Uuid::now_v7(), a, b, epoch())
            .await
            .unwrap();
        f.friends.accept(b, friendship.id, None).await.unwrap();
    }

    fn seat(user_id: Option<Uuid>, place: i32) -> ParticipantInput {
        ParticipantInput {
            user_id,
            place,
            ..ParticipantInput::default()
        }
    }

    fn guest(name: &str, place: i32) -> ParticipantInput {
        ParticipantInput {
            guest_name: Some(name.to_string()),
            place,
            ..ParticipantInput::default()
        }
    }

    fn ranked(entries: Vec<ParticipantInput>) -> CreateMatchParams {
        CreateMatchParams {
            shape: MatchShape::Ranked(entries),
            format: None,
            client_match_id: None,
            updated_at: epoch(),
            started_at: None,
            ended_at: None,
            played_at: None,
            total_duration_seconds: 0,
            turn_count: 0,
        }
    }

    fn legacy(player_ids: Vec<Uuid>, winner_id: Option<Uuid>) -> CreateMatchParams {
        CreateMatchParams {
            shape: MatchShape::Legacy {
                player_ids,
                winner_id,
            },
            ..ranked(Vec::new())
        }
    }

    fn field_of(err: &DomainError) -> Option<&str> {
        match err {
            DomainError::Validation(fields) => fields.keys().next().map(String::as_str),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_ranked_single_winner_with_tied_losers() {
        let f = fixture();
        let (a, b, c) = (
            user(&f.store, "alice").await,
            user(&f.store, "bob").await,
            user(&f.store, "carol").await,
        );

        let (created, outcome) = f
            .service
            .create_match(a, ranked(vec![seat(Some(a), 1), seat(Some(b), 2), seat(Some(c), 2)]))
            .await
            .unwrap();

        assert_eq!(outcome, MatchCreateOutcome::Applied);
        assert_eq!(created.winner_id, Some(a));
        assert_eq!(created.format, GameFormat::Commander);
        assert_eq!(created.players.len(), 3);
        assert_eq!(f.store.match_count(), 1);
    }

    #[tokio::test]
    async fn test_ranked_requires_exactly_one_winner() {
        let f = fixture();
        let (a, b) = (user(&f.store, "alice").await, user(&f.store, "bob").await);

        let two_winners = f
            .service
            .create_match(a, ranked(vec![seat(Some(a), 1), seat(Some(b), 1)]))
            .await
            .unwrap_err();
        assert_eq!(field_of(&two_winners), Some("players"));

        let no_winner = f
            .service
            .create_match(a, ranked(vec![seat(Some(a), 2), seat(Some(b), 3)]))
            .await
            .unwrap_err();
        assert_eq!(field_of(&no_winner), Some("players"));
        assert_eq!(f.store.match_count(), 0);
    }

    #[tokio::test]
    async fn test_ranked_needs_two_players() {
        let f = fixture();
        let a = user(&f.store, "alice").await;
        let err = f
            .service
            .create_match(a, ranked(vec![seat(Some(a), 1)]))
            .await
            .unwrap_err();
        assert_eq!(field_of(&err), Some("players"));
    }

    #[tokio::test]
    async fn test_guest_and_non_friend_allowed_in_ranked_mode() {
        let f = fixture();
        let (a, b) = (user(&f.store, "alice").await, user(&f.store, "bob").await);

        let (created, outcome) = f
            .service
            .create_match(
                a,
                ranked(vec![seat(Some(a), 2), seat(Some(b), 3), guest(" Dana ", 1)]),
            )
            .await
            .unwrap();

        assert_eq!(outcome, MatchCreateOutcome::Applied);
        assert_eq!(created.winner_id, None);
        let winner = created.winner().unwrap();
        assert_eq!(winner.guest_name.as_deref(), Some("Dana"));
        assert_eq!(winner.display_name.as_deref(), Some("Dana"));
    }

    #[tokio::test]
    async fn test_ranked_rejects_duplicates_and_empty_seats() {
        let f = fixture();
        let (a, b) = (user(&f.store, "alice").await, user(&f.store, "bob").await);

        let dup = f
            .service
            .create_match(a, ranked(vec![seat(Some(a), 1), seat(Some(b), 2), seat(Some(b), 3)]))
            .await
            .unwrap_err();
        assert_eq!(field_of(&dup), Some("players"));

        let empty = f
            .service
            .create_match(a, ranked(vec![seat(Some(a), 1), guest("   ", 2)]))
            .await
            .unwrap_err();
        assert_eq!(field_of(&empty), Some("players"));
    }

    #[tokio::test]
    async fn test_unknown_format_rejected() {
        let f = fixture();
        let (a, b) = (user(&f.store, "alice").await, user(&f.store, "bob").await);
        let mut params = ranked(vec![seat(Some(a), 1), seat(Some(b), 2)]);
        params.format = Some("vintage".into());

        let err = f.service.create_match(a, params).await.unwrap_err();
        assert_eq!(field_of(&err), Some("format"));
    }

    #[tokio::test]
    async fn test_negative_duration_rejected() {
        let f = fixture();
        let (a, b) = (user(&f.store, "alice").await, user(&f.store, "bob").await);
        let mut params = ranked(vec![seat(Some(a), 1), seat(Some(b), 2)]);
        params.total_duration_seconds = -1;

        let err = f.service.create_match(a, params).await.unwrap_err();
        assert_eq!(field_of(&err), Some("total_duration_seconds"));
    }

    #[tokio::test]
    async fn test_replay_returns_original_match() {
        let f = fixture();
        let (a, b, c) = (
            user(&f.store, "alice").await,
            user(&f.store, "bob").await,
            user(&f.store, "carol").await,
        );

        let mut first = ranked(vec![seat(Some(a), 1), seat(Some(b), 2)]);
        first.client_match_id = Some("  game-42 ".into());
        let (created, outcome) = f.service.create_match(a, first).await.unwrap();
        assert_eq!(outcome, MatchCreateOutcome::Applied);
        assert_eq!(created.client_match_id.as_deref(), Some("game-42"));

        // Different payload, same key: nothing changes.
        let mut second = ranked(vec![seat(Some(c), 1), seat(Some(b), 2)]);
        second.client_match_id = Some("game-42".into());
        second.format = Some("modern".into());
        let (replayed, outcome) = f.service.create_match(a, second).await.unwrap();

        assert_eq!(outcome, MatchCreateOutcome::Conflict);
        assert_eq!(replayed, created);
        assert_eq!(f.store.match_count(), 1);
    }

    #[tokio::test]
    async fn test_client_match_id_is_scoped_per_creator() {
        let f = fixture();
        let (a, b) = (user(&f.store, "alice").await, user(&f.store, "bob").await);

        let mut params = ranked(vec![seat(Some(a), 1), seat(Some(b), 2)]);
        params.client_match_id = Some("same".into());
        f.service.create_match(a, params.clone()).await.unwrap();
        let (_, outcome) = f.service.create_match(b, params).await.unwrap();

        assert_eq!(outcome, MatchCreateOutcome::Applied);
        assert_eq!(f.store.match_count(), 2);
    }

    #[tokio::test]
    async fn test_replay_skips_validation() {
        let f = fixture();
        let (a, b) = (user(&f.store, "alice").await, user(&f.store, "bob").await);

        let mut params = ranked(vec![seat(Some(a), 1), seat(Some(b), 2)]);
        params.client_match_id = Some("k".into());
        f.service.create_match(a, params).await.unwrap();

        let mut broken = ranked(Vec::new());
        broken.client_match_id = Some("k".into());
        let (_, outcome) = f.service.create_match(a, broken).await.unwrap();
        assert_eq!(outcome, MatchCreateOutcome::Conflict);
    }

    #[tokio::test]
    async fn test_concurrent_replays_record_once() {
        let f = fixture();
        let (a, b) = (user(&f.store, "alice").await, user(&f.store, "bob").await);
        let service = Arc::new(f.service);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            let mut params = ranked(vec![seat(Some(a), 1), seat(Some(b), 2)]);
            params.client_match_id = Some("race".into());
            handles.push(tokio::spawn(async move { service.create_match(a, params).await }));
        }

        let mut applied = 0;
        let mut ids = HashSet::new();
        for handle in handles {
            let (m, outcome) = handle.await.unwrap().unwrap();
            ids.insert(m.id);
            if outcome == MatchCreateOutcome::Applied {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
        assert_eq!(ids.len(), 1);
        assert_eq!(f.store.match_count(), 1);
    }

    #[tokio::test]
    async fn test_legacy_requires_friendship() {
        let f = fixture();
        let (a, b) = (user(&f.store, "alice").await, user(&f.store, "bob").await);

        let err = f
            .service
            .create_match(a, legacy(vec![b], Some(b)))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Forbidden));

        befriend(&f, a, b).await;
        let (created, outcome) = f
            .service
            .create_match(a, legacy(vec![b, b], Some(b)))
            .await
            .unwrap();
        assert_eq!(outcome, MatchCreateOutcome::Applied);
        assert_eq!(created.players.len(), 2);
        assert_eq!(created.winner_id, Some(b));
        assert_eq!(created.place_of(a), Some(2));
    }

    #[tokio::test]
    async fn test_legacy_winner_validation() {
        let f = fixture();
        let (a, b, c) = (
            user(&f.store, "alice").await,
            user(&f.store, "bob").await,
            user(&f.store, "carol").await,
        );
        befriend(&f, a, b).await;

        let missing = f
            .service
            .create_match(a, legacy(vec![b], None))
            .await
            .unwrap_err();
        assert_eq!(field_of(&missing), Some("winner_id"));

        let outsider = f
            .service
            .create_match(a, legacy(vec![b], Some(c)))
            .await
            .unwrap_err();
        assert_eq!(field_of(&outsider), Some("winner_id"));

        let alone = f
            .service
            .create_match(a, legacy(vec![a], Some(a)))
            .await
            .unwrap_err();
        assert_eq!(field_of(&alone), Some("players"));
    }

    #[tokio::test]
    async fn test_get_match_visibility() {
        let f = fixture();
        let (a, b, c) = (
            user(&f.store, "alice").await,
            user(&f.store, "bob").await,
            user(&f.store, "carol").await,
        );
        let (created, _) = f
            .service
            .create_match(a, ranked(vec![seat(Some(a), 1), seat(Some(b), 2)]))
            .await
            .unwrap();

        assert_eq!(f.service.get_match(b, created.id).await.unwrap().id, created.id);
        assert!(matches!(
            f.service.get_match(c, created.id).await,
            Err(DomainError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_list_matches_clamps_limit() {
        let f = fixture();
        let (a, b) = (user(&f.store, "alice").await, user(&f.store, "bob").await);
        for _ in 0..3 {
            f.service
                .create_match(a, ranked(vec![seat(Some(a), 1), seat(Some(b), 2)]))
                .await
                .unwrap();
        }

        assert_eq!(f.service.list_matches(a, Some(0)).await.unwrap().len(), 1);
        assert_eq!(f.service.list_matches(a, Some(2)).await.unwrap().len(), 2);
        assert_eq!(f.service.list_matches(b, None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_head_to_head_unknown_opponent() {
        let f = fixture();
        let a = user(&f.store, "alice").await;
        assert!(matches!(
            f.service.head_to_head(a, Uuid::now_v7()).await,
            Err(DomainError::NotFound)
        ));
    }
}
