use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::db::UserSummary;

/// Friendship status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "friendship_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FriendshipStatus {
    Pending,
    Accepted,
    Declined,
}

/// Friendship record from database
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Friendship {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub addressee_id: Uuid,
    pub status: FriendshipStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl Friendship {
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.requester_id == user_id || self.addressee_id == user_id
    }

    pub fn counterpart(&self, user_id: Uuid) -> Uuid {
        if self.requester_id == user_id {
            self.addressee_id
        } else {
            self.requester_id
        }
    }
}

/// Side of a friend request the actor must be on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartyRole {
    Requester,
    Addressee,
}

impl PartyRole {
    pub fn matches(self, friendship: &Friendship, user_id: Uuid) -> bool {
        match self {
            Self::Requester => friendship.requester_id == user_id,
            Self::Addressee => friendship.addressee_id == user_id,
        }
    }
}

/// One guarded transition of a pending request.
///
/// Applies only while the row is pending, the actor holds `role`, and
/// (when `fresher_than` is set) the stored `updated_at` is strictly older.
#[derive(Debug, Clone)]
pub struct FriendshipTransition {
    pub request_id: Uuid,
    pub actor_id: Uuid,
    pub role: PartyRole,
    pub to: FriendshipStatus,
    pub fresher_than: Option<DateTime<Utc>>,
    /// New `updated_at`.
    pub stamp: DateTime<Utc>,
    /// New `responded_at`.
    pub responded_at: DateTime<Utc>,
}

/// Result of accept/decline/cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FriendRequestOutcome {
    Applied,
    /// Already resolved or superseded; re-fetch and show current state.
    Conflict,
}

/// A pending request seen from one side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FriendRequest {
    pub id: Uuid,
    pub user: UserSummary,
    pub created_at: DateTime<Utc>,
    #[serde(serialize_with = "crate::api::updated_at::serialize")]
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Friends plus pending requests in both directions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FriendsOverview {
    pub friends: Vec<UserSummary>,
    #[serde(rename = "incoming_requests")]
    pub incoming: Vec<FriendRequest>,
    #[serde(rename = "outgoing_requests")]
    pub outgoing: Vec<FriendRequest>,
}

/// Connection tag from the viewing user's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Accepted,
    Incoming,
    Outgoing,
}

/// Flattened entry of [`FriendsOverview`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FriendConnection {
    pub user: UserSummary,
    pub status: ConnectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "crate::api::updated_at::serialize_option"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Request to send a friend request
#[derive(Debug, Default, Deserialize)]
pub struct SendFriendRequestBody {
    /// Username or email of the person to add
    #[serde(default)]
    pub username: String,
}

/// Optional watermark for accept/decline/cancel
#[derive(Debug, Default, Deserialize)]
pub struct FriendRequestActionBody {
    pub updated_at: Option<String>,
}
