//! Persistence ports.
//!
//! Every mutating method is a single atomic write (one statement or one
//! transaction). Conditional updates report whether they applied; callers
//! classify a miss with a follow-up read.

#[cfg(any(test, feature = "test-support"))]
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::{
    IdentityProvider, NewUser, NotificationToken, PasswordResetToken, Platform, Session, User,
    UserSummary,
};
use crate::error::DomainResult;
use crate::matches::types::{Match, MatchInsert, NewMatch};
use crate::social::types::{Friendship, FriendshipTransition, FriendsOverview};

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `UsernameTaken` or `EmailTaken` on a unique clash.
    async fn create_user(&self, user: NewUser) -> DomainResult<User>;

    async fn find_by_id(&self, id: Uuid) -> DomainResult<Option<User>>;

    /// Case-insensitive match on username or email.
    async fn find_by_login(&self, login: &str) -> DomainResult<Option<User>>;

    async fn find_by_external(
        &self,
        provider: IdentityProvider,
        subject: &str,
    ) -> DomainResult<Option<User>>;

    async fn link_external(
        &self,
        user_id: Uuid,
        provider: IdentityProvider,
        subject: &str,
        at: DateTime<Utc>,
    ) -> DomainResult<()>;

    async fn username_exists(&self, username: &str) -> DomainResult<bool>;

    async fn touch_last_login(&self, user_id: Uuid, at: DateTime<Utc>) -> DomainResult<()>;

    /// Active users whose username or email contains `query`
    /// (case-insensitive), excluding `exclude`, ordered by username.
    async fn search(
        &self,
        query: &str,
        exclude: Uuid,
        limit: i64,
    ) -> DomainResult<Vec<UserSummary>>;

    /// Deletes the user; sessions, links, friendships, tokens and created
    /// matches go with it, and their seats in other matches are detached.
    /// Returns the deleted row.
    async fn delete_user(&self, id: Uuid) -> DomainResult<Option<User>>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: Session) -> DomainResult<()>;

    /// Session with this hash that has not expired at `now`.
    async fn find_active(&self, token_hash: &str, now: DateTime<Utc>)
        -> DomainResult<Option<Session>>;

    async fn revoke(&self, token_hash: &str) -> DomainResult<()>;
}

#[async_trait]
pub trait FriendshipStore: Send + Sync {
    /// Purges a declined row between the pair and inserts a pending one.
    ///
    /// Fails with `FriendshipExists` if a pending or accepted row remains.
    async fn create_request(
        &self,
        id: Uuid,
        requester_id: Uuid,
        addressee_id: Uuid,
        at: DateTime<Utc>,
    ) -> DomainResult<Friendship>;

    /// Guarded transition; `true` iff exactly one row changed.
    async fn transition(&self, transition: &FriendshipTransition) -> DomainResult<bool>;

    /// Row by id where `user_id` is either party, in any status.
    async fn find_for_party(
        &self,
        request_id: Uuid,
        user_id: Uuid,
    ) -> DomainResult<Option<Friendship>>;

    /// Deletes the accepted row between the pair; `true` iff one existed.
    async fn remove_accepted(&self, user_id: Uuid, other_id: Uuid) -> DomainResult<bool>;

    async fn list_overview(&self, user_id: Uuid) -> DomainResult<FriendsOverview>;

    async fn are_friends(&self, a: Uuid, b: Uuid) -> DomainResult<bool>;

    /// Max `updated_at` over every row involving the user.
    async fn latest_update(&self, user_id: Uuid) -> DomainResult<Option<DateTime<Utc>>>;
}

#[async_trait]
pub trait MatchStore: Send + Sync {
    async fn find_by_client_ref(
        &self,
        created_by: Uuid,
        client_ref: &str,
    ) -> DomainResult<Option<Match>>;

    /// Inserts match and participants together. A clash on
    /// `(created_by, client_ref)` yields the stored match instead.
    async fn insert_match(&self, new: NewMatch) -> DomainResult<MatchInsert>;

    /// Visible when the user created it or played in it.
    async fn get_for_user(&self, user_id: Uuid, match_id: Uuid) -> DomainResult<Option<Match>>;

    /// Matches the user played in, newest first.
    async fn list_for_user(&self, user_id: Uuid, limit: Option<i64>) -> DomainResult<Vec<Match>>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Applies iff stored `updated_at < updated_at`.
    async fn update_display_name(
        &self,
        user_id: Uuid,
        display_name: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> DomainResult<bool>;

    /// Applies iff stored `updated_at < updated_at`; also stamps
    /// `avatar_updated_at`. `Some(previous)` when applied, carrying the
    /// path it replaced.
    async fn update_avatar(
        &self,
        user_id: Uuid,
        avatar_path: &str,
        updated_at: DateTime<Utc>,
    ) -> DomainResult<Option<Option<String>>>;
}

#[async_trait]
pub trait PasswordResetStore: Send + Sync {
    async fn create_token(&self, token: PasswordResetToken) -> DomainResult<()>;

    async fn find_by_hash(&self, token_hash: &str) -> DomainResult<Option<PasswordResetToken>>;

    /// Marks unused tokens of the user as used.
    async fn invalidate_for_user(&self, user_id: Uuid, at: DateTime<Utc>) -> DomainResult<()>;

    /// Marks the token used (only if unused), sets the password and revokes
    /// every session of the user, atomically. `false` if already used.
    async fn consume(
        &self,
        token_id: Uuid,
        user_id: Uuid,
        password_hash: &str,
        at: DateTime<Utc>,
    ) -> DomainResult<bool>;
}

#[async_trait]
pub trait NotificationTokenStore: Send + Sync {
    /// Insert or re-own by token value.
    async fn upsert_token(
        &self,
        user_id: Uuid,
        token: &str,
        platform: Platform,
        at: DateTime<Utc>,
    ) -> DomainResult<()>;

    /// Deletes the user's token; `true` iff it existed.
    async fn delete_for_user(&self, user_id: Uuid, token: &str) -> DomainResult<bool>;

    /// Deletes the token regardless of owner.
    async fn delete_token(&self, token: &str) -> DomainResult<()>;

    async fn list_for_user(&self, user_id: Uuid) -> DomainResult<Vec<NotificationToken>>;
}

/// Port bundle handed to the engines.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub friendships: Arc<dyn FriendshipStore>,
    pub matches: Arc<dyn MatchStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub password_resets: Arc<dyn PasswordResetStore>,
    pub notification_tokens: Arc<dyn NotificationTokenStore>,
}

impl Stores {
    /// Every port backed by the same adapter.
    pub fn from_adapter<T>(adapter: Arc<T>) -> Self
    where
        T: UserStore
            + SessionStore
            + FriendshipStore
            + MatchStore
            + ProfileStore
            + PasswordResetStore
            + NotificationTokenStore
            + 'static,
    {
        Self {
            users: adapter.clone(),
            sessions: adapter.clone(),
            friendships: adapter.clone(),
            matches: adapter.clone(),
            profiles: adapter.clone(),
            password_resets: adapter.clone(),
            notification_tokens: adapter,
        }
    }
}
