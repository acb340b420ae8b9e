//! In-memory adapter for every persistence port.
//!
//! One mutex guards all state, so each port call is atomic just like the
//! single-statement SQL it stands in for.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    FriendshipStore, MatchStore, NotificationTokenStore, PasswordResetStore, ProfileStore,
    SessionStore, UserStore,
};
use crate::db::{
    IdentityProvider, NewUser, NotificationToken, PasswordResetToken, Platform, Session, User,
    UserStatus, UserSummary,
};
use crate::error::{DomainError, DomainResult};
use crate::matches::types::{Match, MatchInsert, MatchPlayer, NewMatch};
use crate::social::types::{
    FriendRequest, Friendship, FriendshipStatus, FriendshipTransition, FriendsOverview,
};

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    external: HashMap<(IdentityProvider, String), Uuid>,
    sessions: HashMap<String, Session>,
    friendships: HashMap<Uuid, Friendship>,
    matches: Vec<NewMatch>,
    resets: HashMap<Uuid, PasswordResetToken>,
    tokens: HashMap<String, NotificationToken>,
}

impl State {
    fn summary(&self, id: Uuid) -> Option<UserSummary> {
        self.users.get(&id).map(User::summary)
    }

    fn assemble(&self, stored: &NewMatch) -> Match {
        let mut players: Vec<MatchPlayer> = stored
            .participants
            .iter()
            .map(|p| MatchPlayer {
                seat_index: p.seat_index,
                user: p.user_id.and_then(|id| self.summary(id)),
                guest_name: p.guest_name.clone(),
                display_name: p.display_name.clone(),
                place: p.place,
                is_winner: p.place == 1,
                eliminated_turn_number: p.eliminated_turn_number,
                eliminated_during_seat_index: p.eliminated_during_seat_index,
                total_turn_time_ms: p.total_turn_time_ms,
                turns_taken: p.turns_taken,
            })
            .collect();
        players.sort_by_key(|p| p.seat_index);

        Match {
            id: stored.id,
            created_by: stored.created_by,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
            client_match_id: stored.client_ref.clone(),
            format: stored.format,
            winner_id: stored.winner_id,
            started_at: stored.started_at,
            ended_at: stored.ended_at,
            played_at: stored.played_at,
            total_duration_seconds: stored.total_duration_seconds,
            turn_count: stored.turn_count,
            players,
        }
    }

    fn same_pair(f: &Friendship, a: Uuid, b: Uuid) -> bool {
        (f.requester_id == a && f.addressee_id == b) || (f.requester_id == b && f.addressee_id == a)
    }
}

/// Process-local store used by tests.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flips a user to disabled.
    pub fn disable_user(&self, user_id: Uuid) {
        if let Some(user) = self.state().users.get_mut(&user_id) {
            user.status = UserStatus::Disabled;
        }
    }

    /// Raw friendship row, for assertions.
    pub fn friendship(&self, id: Uuid) -> Option<Friendship> {
        self.state().friendships.get(&id).cloned()
    }

    /// Number of stored matches, for assertions.
    pub fn match_count(&self) -> usize {
        self.state().matches.len()
    }

    /// Number of live sessions, for assertions.
    pub fn session_count(&self) -> usize {
        self.state().sessions.len()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, user: NewUser) -> DomainResult<User> {
        let mut state = self.state();
        if state
            .users
            .values()
            .any(|u| u.username.eq_ignore_ascii_case(&user.username))
        {
            return Err(DomainError::UsernameTaken);
        }
        if state
            .users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(DomainError::EmailTaken);
        }

        let created = User {
            id: user.id,
            email: user.email,
            username: user.username,
            display_name: user.display_name,
            password_hash: user.password_hash,
            avatar_path: None,
            avatar_updated_at: None,
            status: UserStatus::Active,
            last_login_at: None,
            created_at: user.created_at,
            updated_at: user.created_at,
        };
        state.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: Uuid) -> DomainResult<Option<User>> {
        Ok(self.state().users.get(&id).cloned())
    }

    async fn find_by_login(&self, login: &str) -> DomainResult<Option<User>> {
        let login = login.trim();
        Ok(self
            .state()
            .users
            .values()
            .find(|u| u.username.eq_ignore_ascii_case(login) || u.email.eq_ignore_ascii_case(login))
            .cloned())
    }

    async fn find_by_external(
        &self,
        provider: IdentityProvider,
        subject: &str,
    ) -> DomainResult<Option<User>> {
        let state = self.state();
        Ok(state
            .external
            .get(&(provider, subject.to_string()))
            .and_then(|id| state.users.get(id))
            .cloned())
    }

    async fn link_external(
        &self,
        user_id: Uuid,
        provider: IdentityProvider,
        subject: &str,
        _at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let mut state = self.state();
        let clash = state
            .external
            .iter()
            .any(|((p, s), owner)| {
                *p == provider && ((*owner == user_id && s != subject) || (s == subject && *owner != user_id))
            });
        if clash {
            return Err(DomainError::ExternalAccountExists);
        }
        state.external.insert((provider, subject.to_string()), user_id);
        Ok(())
    }

    async fn username_exists(&self, username: &str) -> DomainResult<bool> {
        Ok(self
            .state()
            .users
            .values()
            .any(|u| u.username.eq_ignore_ascii_case(username)))
    }

    async fn touch_last_login(&self, user_id: Uuid, at: DateTime<Utc>) -> DomainResult<()> {
        if let Some(user) = self.state().users.get_mut(&user_id) {
            user.last_login_at = Some(at);
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        exclude: Uuid,
        limit: i64,
    ) -> DomainResult<Vec<UserSummary>> {
        let needle = query.trim().to_lowercase();
        let state = self.state();
        let mut found: Vec<&User> = state
            .users
            .values()
            .filter(|u| u.id != exclude && u.status == UserStatus::Active)
            .filter(|u| {
                u.username.to_lowercase().contains(&needle)
                    || u.email.to_lowercase().contains(&needle)
            })
            .collect();
        found.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(found
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(0))
            .map(User::summary)
            .collect())
    }

    async fn delete_user(&self, id: Uuid) -> DomainResult<Option<User>> {
        let mut state = self.state();
        let Some(user) = state.users.remove(&id) else {
            return Ok(None);
        };
        state.external.retain(|_, owner| *owner != id);
        state.sessions.retain(|_, s| s.user_id != id);
        state.friendships.retain(|_, f| !f.involves(id));
        state.resets.retain(|_, r| r.user_id != id);
        state.tokens.retain(|_, t| t.user_id != id);
        state.matches.retain(|m| m.created_by != id);
        for stored in &mut state.matches {
            if stored.winner_id == Some(id) {
                stored.winner_id = None;
            }
            for seat in &mut stored.participants {
                if seat.user_id == Some(id) {
                    seat.user_id = None;
                }
            }
        }
        Ok(Some(user))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, session: Session) -> DomainResult<()> {
        self.state()
            .sessions
            .insert(session.token_hash.clone(), session);
        Ok(())
    }

    async fn find_active(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<Session>> {
        Ok(self
            .state()
            .sessions
            .get(token_hash)
            .filter(|s| s.expires_at > now)
            .cloned())
    }

    async fn revoke(&self, token_hash: &str) -> DomainResult<()> {
        self.state().sessions.remove(token_hash);
        Ok(())
    }
}

#[async_trait]
impl FriendshipStore for MemoryStore {
    async fn create_request(
        &self,
        id: Uuid,
        requester_id: Uuid,
        addressee_id: Uuid,
        at: DateTime<Utc>,
    ) -> DomainResult<Friendship> {
        let mut state = self.state();
        state.friendships.retain(|_, f| {
            !(State::same_pair(f, requester_id, addressee_id)
                && f.status == FriendshipStatus::Declined)
        });
        if state
            .friendships
            .values()
            .any(|f| State::same_pair(f, requester_id, addressee_id))
        {
            return Err(DomainError::FriendshipExists);
        }

        let friendship = Friendship {
            id,
            requester_id,
            addressee_id,
            status: FriendshipStatus::Pending,
            created_at: at,
            updated_at: at,
            responded_at: None,
        };
        state.friendships.insert(id, friendship.clone());
        Ok(friendship)
    }

    async fn transition(&self, t: &FriendshipTransition) -> DomainResult<bool> {
        let mut state = self.state();
        let Some(row) = state.friendships.get_mut(&t.request_id) else {
            return Ok(false);
        };
        let fresh = t.fresher_than.is_none_or(|ts| row.updated_at < ts);
        if row.status != FriendshipStatus::Pending || !t.role.matches(row, t.actor_id) || !fresh {
            return Ok(false);
        }
        row.status = t.to;
        row.updated_at = t.stamp;
        row.responded_at = Some(t.responded_at);
        Ok(true)
    }

    async fn find_for_party(
        &self,
        request_id: Uuid,
        user_id: Uuid,
    ) -> DomainResult<Option<Friendship>> {
        Ok(self
            .state()
            .friendships
            .get(&request_id)
            .filter(|f| f.involves(user_id))
            .cloned())
    }

    async fn remove_accepted(&self, user_id: Uuid, other_id: Uuid) -> DomainResult<bool> {
        let mut state = self.state();
        let before = state.friendships.len();
        state.friendships.retain(|_, f| {
            !(State::same_pair(f, user_id, other_id) && f.status == FriendshipStatus::Accepted)
        });
        Ok(state.friendships.len() < before)
    }

    async fn list_overview(&self, user_id: Uuid) -> DomainResult<FriendsOverview> {
        let state = self.state();
        let mut overview = FriendsOverview::default();

        for f in state.friendships.values().filter(|f| f.involves(user_id)) {
            let Some(other) = state.summary(f.counterpart(user_id)) else {
                continue;
            };
            match f.status {
                FriendshipStatus::Accepted => overview.friends.push(other),
                FriendshipStatus::Pending => {
                    let request = FriendRequest {
                        id: f.id,
                        user: other,
                        created_at: f.created_at,
                        updated_at: f.updated_at,
                        resolved_at: f.responded_at,
                    };
                    if f.addressee_id == user_id {
                        overview.incoming.push(request);
                    } else {
                        overview.outgoing.push(request);
                    }
                }
                FriendshipStatus::Declined => {}
            }
        }

        overview
            .friends
            .sort_by(|a, b| a.username.cmp(&b.username));
        overview
            .incoming
            .sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        overview
            .outgoing
            .sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(overview)
    }

    async fn are_friends(&self, a: Uuid, b: Uuid) -> DomainResult<bool> {
        Ok(self
            .state()
            .friendships
            .values()
            .any(|f| State::same_pair(f, a, b) && f.status == FriendshipStatus::Accepted))
    }

    async fn latest_update(&self, user_id: Uuid) -> DomainResult<Option<DateTime<Utc>>> {
        Ok(self
            .state()
            .friendships
            .values()
            .filter(|f| f.involves(user_id))
            .map(|f| f.updated_at)
            .max())
    }
}

#[async_trait]
impl MatchStore for MemoryStore {
    async fn find_by_client_ref(
        &self,
        created_by: Uuid,
        client_ref: &str,
    ) -> DomainResult<Option<Match>> {
        let state = self.state();
        Ok(state
            .matches
            .iter()
            .find(|m| m.created_by == created_by && m.client_ref.as_deref() == Some(client_ref))
            .map(|m| state.assemble(m)))
    }

    async fn insert_match(&self, new: NewMatch) -> DomainResult<MatchInsert> {
        let mut state = self.state();
        if let Some(client_ref) = new.client_ref.as_deref() {
            if let Some(existing) = state
                .matches
                .iter()
                .find(|m| m.created_by == new.created_by && m.client_ref.as_deref() == Some(client_ref))
            {
                return Ok(MatchInsert::Existing(state.assemble(existing)));
            }
        }
        let unknown = new
            .participants
            .iter()
            .filter_map(|p| p.user_id)
            .any(|id| !state.users.contains_key(&id));
        if unknown {
            return Err(DomainError::validation("players", "unknown user"));
        }

        let created = state.assemble(&new);
        state.matches.push(new);
        Ok(MatchInsert::Created(created))
    }

    async fn get_for_user(&self, user_id: Uuid, match_id: Uuid) -> DomainResult<Option<Match>> {
        let state = self.state();
        Ok(state
            .matches
            .iter()
            .find(|m| m.id == match_id)
            .map(|m| state.assemble(m))
            .filter(|m| m.created_by == user_id || m.includes_user(user_id)))
    }

    async fn list_for_user(&self, user_id: Uuid, limit: Option<i64>) -> DomainResult<Vec<Match>> {
        let state = self.state();
        let mut out: Vec<Match> = state
            .matches
            .iter()
            .filter(|m| m.participants.iter().any(|p| p.user_id == Some(user_id)))
            .map(|m| state.assemble(m))
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        if let Some(limit) = limit {
            out.truncate(usize::try_from(limit).unwrap_or(0));
        }
        Ok(out)
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn update_display_name(
        &self,
        user_id: Uuid,
        display_name: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> DomainResult<bool> {
        let mut state = self.state();
        match state.users.get_mut(&user_id) {
            Some(user) if user.updated_at < updated_at => {
                user.display_name = display_name.map(str::to_string);
                user.updated_at = updated_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_avatar(
        &self,
        user_id: Uuid,
        avatar_path: &str,
        updated_at: DateTime<Utc>,
    ) -> DomainResult<Option<Option<String>>> {
        let mut state = self.state();
        match state.users.get_mut(&user_id) {
            Some(user) if user.updated_at < updated_at => {
                let previous = user.avatar_path.replace(avatar_path.to_string());
                user.avatar_updated_at = Some(updated_at);
                user.updated_at = updated_at;
                Ok(Some(previous))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl PasswordResetStore for MemoryStore {
    async fn create_token(&self, token: PasswordResetToken) -> DomainResult<()> {
        self.state().resets.insert(token.id, token);
        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> DomainResult<Option<PasswordResetToken>> {
        Ok(self
            .state()
            .resets
            .values()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn invalidate_for_user(&self, user_id: Uuid, at: DateTime<Utc>) -> DomainResult<()> {
        for token in self
            .state()
            .resets
            .values_mut()
            .filter(|t| t.user_id == user_id && t.used_at.is_none())
        {
            token.used_at = Some(at);
        }
        Ok(())
    }

    async fn consume(
        &self,
        token_id: Uuid,
        user_id: Uuid,
        password_hash: &str,
        at: DateTime<Utc>,
    ) -> DomainResult<bool> {
        let mut state = self.state();
        match state.resets.get_mut(&token_id) {
            Some(token) if token.used_at.is_none() => token.used_at = Some(at),
            _ => return Ok(false),
        }
        if let Some(user) = state.users.get_mut(&user_id) {
            user.password_hash = Some(password_hash.to_string());
        }
        state.sessions.retain(|_, s| s.user_id != user_id);
        Ok(true)
    }
}

#[async_trait]
impl NotificationTokenStore for MemoryStore {
    async fn upsert_token(
        &self,
        user_id: Uuid,
        token: &str,
        platform: Platform,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let mut state = self.state();
        state
            .tokens
            .entry(token.to_string())
            .and_modify(|t| {
                t.user_id = user_id;
                t.platform = platform;
                t.updated_at = at;
            })
            .or_insert_with(|| NotificationToken {
                token: token.to_string(),
                user_id,
                platform,
                created_at: at,
                updated_at: at,
            });
        Ok(())
    }

    async fn delete_for_user(&self, user_id: Uuid, token: &str) -> DomainResult<bool> {
        let mut state = self.state();
        if state.tokens.get(token).is_some_and(|t| t.user_id == user_id) {
            state.tokens.remove(token);
            return Ok(true);
        }
        Ok(false)
    }

    async fn delete_token(&self, token: &str) -> DomainResult<()> {
        self.state().tokens.remove(token);
        Ok(())
    }

    async fn list_for_user(&self, user_id: Uuid) -> DomainResult<Vec<NotificationToken>> {
        let mut out: Vec<NotificationToken> = self
            .state()
            .tokens
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.token.cmp(&b.token));
        Ok(out)
    }
}
