//! Friendship queries.
//!
//! Pending and accepted rows are unique per unordered pair
//! (`friendships_pair_uq`). Declined rows are purged when a new request is
//! sent, inside the same transaction as the insert.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use super::models::UserSummary;
use super::{unique_violation, PgStore};
use crate::error::{DomainError, DomainResult, StorageContext};
use crate::social::types::{
    FriendRequest, Friendship, FriendshipStatus, FriendshipTransition, FriendsOverview, PartyRole,
};
use crate::store::FriendshipStore;

const FRIENDSHIP_COLUMNS: &str =
    "id, requester_id, addressee_id, status, created_at, updated_at, responded_at";

const PAIR_CLAUSE: &str = "((requester_id = $1 AND addressee_id = $2) \
     OR (requester_id = $2 AND addressee_id = $1))";

/// Friendship joined with the other party.
#[derive(FromRow)]
struct OverviewRow {
    id: Uuid,
    addressee_id: Uuid,
    status: FriendshipStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    responded_at: Option<DateTime<Utc>>,
    other_id: Uuid,
    other_username: String,
    other_display_name: Option<String>,
    other_avatar_path: Option<String>,
    other_avatar_updated_at: Option<DateTime<Utc>>,
    other_updated_at: DateTime<Utc>,
}

impl OverviewRow {
    fn other(&self) -> UserSummary {
        UserSummary {
            id: self.other_id,
            username: self.other_username.clone(),
            display_name: self.other_display_name.clone(),
            avatar_path: self.other_avatar_path.clone(),
            avatar_updated_at: self.other_avatar_updated_at,
            updated_at: Some(self.other_updated_at),
        }
    }
}

#[async_trait]
impl FriendshipStore for PgStore {
    async fn create_request(
        &self,
        id: Uuid,
        requester_id: Uuid,
        addressee_id: Uuid,
        at: DateTime<Utc>,
    ) -> DomainResult<Friendship> {
        let mut tx = self.pool.begin().await.storage("begin friend request")?;

        sqlx::query(&format!(
            "DELETE FROM friendships WHERE {PAIR_CLAUSE} AND status = 'declined'"
        ))
        .bind(requester_id)
        .bind(addressee_id)
        .execute(&mut *tx)
        .await
        .storage("purge declined friendship")?;

        let inserted = sqlx::query_as::<_, Friendship>(&format!(
            "INSERT INTO friendships (id, requester_id, addressee_id, status, created_at, updated_at)
             VALUES ($1, $2, $3, 'pending', $4, $4)
             RETURNING {FRIENDSHIP_COLUMNS}"
        ))
        .bind(id)
        .bind(requester_id)
        .bind(addressee_id)
        .bind(at)
        .fetch_one(&mut *tx)
        .await;

        let friendship = match inserted {
            Ok(friendship) => friendship,
            Err(e) if unique_violation(&e) == Some("friendships_pair_uq") => {
                return Err(DomainError::FriendshipExists);
            }
            Err(e) => return Err(e).storage("insert friend request"),
        };

        tx.commit().await.storage("commit friend request")?;
        Ok(friendship)
    }

    async fn transition(&self, t: &FriendshipTransition) -> DomainResult<bool> {
        let party_column = match t.role {
            PartyRole::Requester => "requester_id",
            PartyRole::Addressee => "addressee_id",
        };

        let result = sqlx::query(&format!(
            "UPDATE friendships
             SET status = $3, updated_at = $4, responded_at = $5
             WHERE id = $1
               AND {party_column} = $2
               AND status = 'pending'
               AND ($6::timestamptz IS NULL OR updated_at < $6)"
        ))
        .bind(t.request_id)
        .bind(t.actor_id)
        .bind(t.to)
        .bind(t.stamp)
        .bind(t.responded_at)
        .bind(t.fresher_than)
        .execute(&self.pool)
        .await
        .storage("transition friend request")?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_for_party(
        &self,
        request_id: Uuid,
        user_id: Uuid,
    ) -> DomainResult<Option<Friendship>> {
        sqlx::query_as::<_, Friendship>(&format!(
            "SELECT {FRIENDSHIP_COLUMNS} FROM friendships
             WHERE id = $1 AND (requester_id = $2 OR addressee_id = $2)"
        ))
        .bind(request_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .storage("find friend request")
    }

    async fn remove_accepted(&self, user_id: Uuid, other_id: Uuid) -> DomainResult<bool> {
        let result = sqlx::query(&format!(
            "DELETE FROM friendships WHERE {PAIR_CLAUSE} AND status = 'accepted'"
        ))
        .bind(user_id)
        .bind(other_id)
        .execute(&self.pool)
        .await
        .storage("remove friend")?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_overview(&self, user_id: Uuid) -> DomainResult<FriendsOverview> {
        let rows = sqlx::query_as::<_, OverviewRow>(
            "SELECT f.id, f.addressee_id, f.status, f.created_at, f.updated_at, f.responded_at,
                    u.id AS other_id,
                    u.username AS other_username,
                    u.display_name AS other_display_name,
                    u.avatar_path AS other_avatar_path,
                    u.avatar_updated_at AS other_avatar_updated_at,
                    u.updated_at AS other_updated_at
             FROM friendships f
             JOIN users u ON u.id = CASE
                 WHEN f.requester_id = $1 THEN f.addressee_id
                 ELSE f.requester_id
             END
             WHERE (f.requester_id = $1 OR f.addressee_id = $1)
               AND f.status <> 'declined'
             ORDER BY f.created_at DESC, f.id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .storage("list friendships")?;

        let mut overview = FriendsOverview::default();
        for row in rows {
            let other = row.other();
            match row.status {
                FriendshipStatus::Accepted => overview.friends.push(other),
                FriendshipStatus::Pending => {
                    let request = FriendRequest {
                        id: row.id,
                        user: other,
                        created_at: row.created_at,
                        updated_at: row.updated_at,
                        resolved_at: row.responded_at,
                    };
                    if row.addressee_id == user_id {
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

        Ok(overview)
    }

    async fn are_friends(&self, a: Uuid, b: Uuid) -> DomainResult<bool> {
        sqlx::query_scalar(&format!(
            "SELECT EXISTS(SELECT 1 FROM friendships WHERE {PAIR_CLAUSE} AND status = 'accepted')"
        ))
        .bind(a)
        .bind(b)
        .fetch_one(&self.pool)
        .await
        .storage("check friendship")
    }

    async fn latest_update(&self, user_id: Uuid) -> DomainResult<Option<DateTime<Utc>>> {
        sqlx::query_scalar(
            "SELECT MAX(updated_at) FROM friendships
             WHERE requester_id = $1 OR addressee_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .storage("latest friendship update")
    }
}
