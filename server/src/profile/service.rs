use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use super::types::{AvatarUpdate, ProfileUpdateOutcome};
use crate::clock::truncate_to_millis;
use crate::db::{User, UserSummary};
use crate::error::{DomainError, DomainResult};
use crate::store::{ProfileStore, UserStore};

/// Maximum display name length, in characters.
pub const MAX_DISPLAY_NAME_CHARS: usize = 48;

const DEFAULT_SEARCH_LIMIT: i64 = 20;
const MAX_SEARCH_LIMIT: i64 = 50;

pub struct ProfileService {
    profiles: Arc<dyn ProfileStore>,
    users: Arc<dyn UserStore>,
}

impl ProfileService {
    pub fn new(profiles: Arc<dyn ProfileStore>, users: Arc<dyn UserStore>) -> Self {
        Self { profiles, users }
    }

    pub async fn get(&self, user_id: Uuid) -> DomainResult<User> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or(DomainError::NotFound)
    }

    /// Friend lookup by username or email fragment. Out-of-range limits
    /// fall back to the default of 20.
    pub async fn search_users(
        &self,
        user_id: Uuid,
        query: &str,
        limit: Option<i64>,
    ) -> DomainResult<Vec<UserSummary>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let limit = limit
            .filter(|l| (1..=MAX_SEARCH_LIMIT).contains(l))
            .unwrap_or(DEFAULT_SEARCH_LIMIT);
        self.users.search(query, user_id, limit).await
    }

    /// Removes the account. `None` when it was already gone.
    #[tracing::instrument(skip(self))]
    pub async fn delete_account(&self, user_id: Uuid) -> DomainResult<Option<User>> {
        let deleted = self.users.delete_user(user_id).await?;
        if deleted.is_some() {
            info!("Account deleted");
        }
        Ok(deleted)
    }

    /// Sets (or, when blank, clears) the display name.
    #[tracing::instrument(skip(self))]
    pub async fn update_display_name(
        &self,
        user_id: Uuid,
        display_name: &str,
        updated_at: DateTime<Utc>,
    ) -> DomainResult<(User, ProfileUpdateOutcome)> {
        let name = display_name.trim();
        if name.chars().count() > MAX_DISPLAY_NAME_CHARS {
            return Err(DomainError::validation(
                "display_name",
                "must be 48 characters or less",
            ));
        }
        if name.chars().any(char::is_control) {
            return Err(DomainError::validation(
                "display_name",
                "contains invalid characters",
            ));
        }
        let name = (!name.is_empty()).then_some(name);
        let ts = truncate_to_millis(updated_at);

        let applied = self.profiles.update_display_name(user_id, name, ts).await?;
        self.classify(user_id, applied, ts, |user| user.display_name.as_deref() == name)
            .await
    }

    /// Points the avatar at a stored image.
    #[tracing::instrument(skip(self))]
    pub async fn update_avatar(
        &self,
        user_id: Uuid,
        avatar_path: &str,
        updated_at: DateTime<Utc>,
    ) -> DomainResult<AvatarUpdate> {
        let avatar_path = avatar_path.trim();
        if avatar_path.is_empty() {
            return Err(DomainError::validation("avatar", "file is required"));
        }
        let ts = truncate_to_millis(updated_at);

        let replaced = self.profiles.update_avatar(user_id, avatar_path, ts).await?;
        let (user, outcome) = self
            .classify(user_id, replaced.is_some(), ts, |user| {
                user.avatar_path.as_deref() == Some(avatar_path)
            })
            .await?;
        Ok(AvatarUpdate {
            user,
            outcome,
            replaced: replaced.flatten(),
        })
    }

    /// Turns the conditional write's result into an outcome plus the
    /// current row.
    async fn classify(
        &self,
        user_id: Uuid,
        applied: bool,
        ts: DateTime<Utc>,
        holds_requested_value: impl FnOnce(&User) -> bool + Send,
    ) -> DomainResult<(User, ProfileUpdateOutcome)> {
        let user = self.get(user_id).await?;
        let outcome = if applied {
            info!("Profile updated");
            ProfileUpdateOutcome::Applied
        } else if user.updated_at == ts && holds_requested_value(&user) {
            ProfileUpdateOutcome::Noop
        } else {
            ProfileUpdateOutcome::Conflict
        };
        Ok((user, outcome))
    }
}
