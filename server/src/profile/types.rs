use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::User;

/// Result of a guarded profile write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileUpdateOutcome {
    Applied,
    /// Already in the requested state with the same `updated_at`.
    Noop,
    /// Another write won; re-fetch before retrying.
    Conflict,
}

/// Result of [`ProfileService::update_avatar`](super::ProfileService::update_avatar).
#[derive(Debug, Clone)]
pub struct AvatarUpdate {
    pub user: User,
    pub outcome: ProfileUpdateOutcome,
    /// File the applied write displaced.
    pub replaced: Option<String>,
}

/// The signed-in user as returned by `/v1/users/me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(serialize_with = "crate::api::updated_at::serialize")]
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        let avatar_url = user.avatar_path.as_deref().map(|path| {
            let version = user.avatar_updated_at.unwrap_or(user.updated_at);
            format!("/avatars/{path}?v={}", version.timestamp())
        });
        Self {
            id: user.id,
            email: user.email,
            username: user.username,
            display_name: user.display_name,
            avatar_url,
            avatar_updated_at: user.avatar_updated_at,
            created_at: user.created_at,
            updated_at: user.updated_at,
            last_login_at: user.last_login_at,
        }
    }
}

/// Query of `GET /v1/users/search`. An unparsable `limit` means the default.
#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub limit: Option<String>,
}

impl SearchQuery {
    pub fn limit(&self) -> Option<i64> {
        self.limit.as_deref().and_then(|l| l.trim().parse().ok())
    }
}

/// Body of `PATCH /v1/users/me`.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileBody {
    pub display_name: Option<String>,
    pub updated_at: Option<String>,
}
