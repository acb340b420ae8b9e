//! Friendship Lifecycle Engine.
//!
//! `none -> pending -> {accepted | declined}`; a declined row is purged by the
//! next request between the same pair. Every transition is one guarded write.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use super::types::{
    ConnectionStatus, FriendConnection, FriendRequest, FriendRequestOutcome, FriendshipStatus,
    FriendshipTransition, FriendsOverview, PartyRole,
};
use super::FriendRequestNotifier;
use crate::clock::{truncate_to_millis, Clock};
use crate::error::{DomainError, DomainResult};
use crate::matches::FriendshipChecker;
use crate::store::{FriendshipStore, UserStore};

pub struct FriendsService {
    users: Arc<dyn UserStore>,
    friendships: Arc<dyn FriendshipStore>,
    notifier: Arc<dyn FriendRequestNotifier>,
    clock: Arc<dyn Clock>,
}

impl FriendsService {
    pub fn new(
        users: Arc<dyn UserStore>,
        friendships: Arc<dyn FriendshipStore>,
        notifier: Arc<dyn FriendRequestNotifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            friendships,
            notifier,
            clock,
        }
    }

    pub async fn list_overview(&self, user_id: Uuid) -> DomainResult<FriendsOverview> {
        self.friendships.list_overview(user_id).await
    }

    /// Accepted, then incoming, then outgoing.
    pub async fn list_connections(&self, user_id: Uuid) -> DomainResult<Vec<FriendConnection>> {
        let overview = self.friendships.list_overview(user_id).await?;
        Ok(flatten(overview))
    }

    pub async fn latest_update(&self, user_id: Uuid) -> DomainResult<Option<DateTime<Utc>>> {
        self.friendships.latest_update(user_id).await
    }

    /// Sends a request to the user with this username (or email).
    #[tracing::instrument(skip(self))]
    pub async fn create_request(
        &self,
        requester_id: Uuid,
        addressee_username: &str,
    ) -> DomainResult<FriendRequest> {
        let login = addressee_username.trim();
        if login.is_empty() {
            return Err(DomainError::validation("username", "required"));
        }

        let target = self
            .users
            .find_by_login(login)
            .await?
            .ok_or(DomainError::NotFound)?;
        if target.id == requester_id {
            return Err(DomainError::validation("username", "cannot friend yourself"));
        }
        if target.is_disabled() {
            return Err(DomainError::Forbidden);
        }

        let now = truncate_to_millis(self.clock.now());
        let friendship = self
            .friendships
            .create_request(Uuid::now_v7(), requester_id, target.id, now)
            .await?;

        info!(
            friendship_id = %friendship.id,
            addressee_id = %target.id,
            "Friend request created"
        );

        self.spawn_notification(requester_id, target.id);

        Ok(FriendRequest {
            id: friendship.id,
            user: target.summary(),
            created_at: friendship.created_at,
            updated_at: friendship.updated_at,
            resolved_at: None,
        })
    }

    /// Pushes to the addressee in the background; failures are only logged.
    fn spawn_notification(&self, requester_id: Uuid, addressee_id: Uuid) {
        let users = Arc::clone(&self.users);
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(
            async move {
                let result = match users.find_by_id(requester_id).await {
                    Ok(Some(requester)) => {
                        notifier
                            .friend_request_created(addressee_id, &requester.summary())
                            .await
                    }
                    Ok(None) => Err(DomainError::NotFound),
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    warn!(error = %e, %addressee_id, "Failed to send friend request notification");
                }
            }
            .in_current_span(),
        );
    }

    /// Addressee accepts a pending request.
    pub async fn accept(
        &self,
        addressee_id: Uuid,
        request_id: Uuid,
        updated_at: Option<DateTime<Utc>>,
    ) -> DomainResult<FriendRequestOutcome> {
        self.resolve(
            addressee_id,
            request_id,
            PartyRole::Addressee,
            FriendshipStatus::Accepted,
            updated_at,
        )
        .await
    }

    /// Addressee declines a pending request.
    pub async fn decline(
        &self,
        addressee_id: Uuid,
        request_id: Uuid,
        updated_at: Option<DateTime<Utc>>,
    ) -> DomainResult<FriendRequestOutcome> {
        self.resolve(
            addressee_id,
            request_id,
            PartyRole::Addressee,
            FriendshipStatus::Declined,
            updated_at,
        )
        .await
    }

    /// Requester withdraws a pending request. Stored as declined.
    pub async fn cancel(
        &self,
        requester_id: Uuid,
        request_id: Uuid,
        updated_at: Option<DateTime<Utc>>,
    ) -> DomainResult<FriendRequestOutcome> {
        self.resolve(
            requester_id,
            request_id,
            PartyRole::Requester,
            FriendshipStatus::Declined,
            updated_at,
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn resolve(
        &self,
        actor_id: Uuid,
        request_id: Uuid,
        role: PartyRole,
        to: FriendshipStatus,
        updated_at: Option<DateTime<Utc>>,
    ) -> DomainResult<FriendRequestOutcome> {
        let now = truncate_to_millis(self.clock.now());
        let watermark = updated_at.map(truncate_to_millis);

        let transition = FriendshipTransition {
            request_id,
            actor_id,
            role,
            to,
            fresher_than: watermark,
            stamp: watermark.unwrap_or(now),
            responded_at: now,
        };

        if self.friendships.transition(&transition).await? {
            info!(request_id = %request_id, status = ?to, "Friend request resolved");
            return Ok(FriendRequestOutcome::Applied);
        }

        // Zero rows: a row the actor can act on means stale or already resolved.
        match self.friendships.find_for_party(request_id, actor_id).await? {
            Some(row) if role.matches(&row, actor_id) => Ok(FriendRequestOutcome::Conflict),
            _ => Err(DomainError::NotFound),
        }
    }

    /// Ends an accepted friendship with `friend_id`.
    #[tracing::instrument(skip(self))]
    pub async fn remove_friend(&self, user_id: Uuid, friend_id: Uuid) -> DomainResult<()> {
        if self.friendships.remove_accepted(user_id, friend_id).await? {
            info!(friend_id = %friend_id, "Friend removed");
            Ok(())
        } else {
            Err(DomainError::NotFound)
        }
    }

    pub async fn are_friends(&self, a: Uuid, b: Uuid) -> DomainResult<bool> {
        self.friendships.are_friends(a, b).await
    }
}

#[async_trait]
impl FriendshipChecker for FriendsService {
    async fn are_friends(&self, a: Uuid, b: Uuid) -> DomainResult<bool> {
        Self::are_friends(self, a, b).await
    }
}

fn flatten(overview: FriendsOverview) -> Vec<FriendConnection> {
    let total = overview.friends.len() + overview.incoming.len() + overview.outgoing.len();
    let mut out = Vec::with_capacity(total);

    out.extend(overview.friends.into_iter().map(|user| FriendConnection {
        user,
        status: ConnectionStatus::Accepted,
        request_id: None,
        created_at: None,
        updated_at: None,
    }));

    for (requests, status) in [
        (overview.incoming, ConnectionStatus::Incoming),
        (overview.outgoing, ConnectionStatus::Outgoing),
    ] {
        out.extend(requests.into_iter().map(|req| FriendConnection {
            user: req.user,
            status,
            request_id: Some(req.id),
            created_at: Some(req.created_at),
            updated_at: Some(req.updated_at),
        }));
    }

    out
}
