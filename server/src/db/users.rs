//! User, session and profile queries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::{IdentityProvider, NewUser, Session, User, UserSummary};
use super::{unique_violation, PgStore};
use crate::error::{DomainError, DomainResult, StorageContext};
use crate::store::{ProfileStore, SessionStore, UserStore};

const USER_COLUMNS: &str = "id, email, username, display_name, password_hash, \
     avatar_path, avatar_updated_at, status, last_login_at, created_at, updated_at";

#[async_trait]
impl UserStore for PgStore {
    async fn create_user(&self, user: NewUser) -> DomainResult<User> {
        let result = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (id, email, username, display_name, password_hash, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $6)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.display_name)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(created) => Ok(created),
            Err(e) => match unique_violation(&e) {
                Some("users_username_lower_uq") => Err(DomainError::UsernameTaken),
                Some("users_email_lower_uq") => Err(DomainError::EmailTaken),
                _ => Err(e).storage("create user"),
            },
        }
    }

    async fn find_by_id(&self, id: Uuid) -> DomainResult<Option<User>> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .storage("find user by id")
    }

    async fn find_by_login(&self, login: &str) -> DomainResult<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE lower(username) = lower($1) OR lower(email) = lower($1)
             LIMIT 1"
        ))
        .bind(login.trim())
        .fetch_optional(&self.pool)
        .await
        .storage("find user by login")
    }

    async fn find_by_external(
        &self,
        provider: IdentityProvider,
        subject: &str,
    ) -> DomainResult<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE id = (
                 SELECT user_id FROM external_accounts WHERE provider = $1 AND subject = $2
             )"
        ))
        .bind(provider)
        .bind(subject)
        .fetch_optional(&self.pool)
        .await
        .storage("find user by external identity")
    }

    async fn link_external(
        &self,
        user_id: Uuid,
        provider: IdentityProvider,
        subject: &str,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let inserted = sqlx::query(
            "INSERT INTO external_accounts (provider, subject, user_id, created_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT DO NOTHING",
        )
        .bind(provider)
        .bind(subject)
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .storage("link external identity")?
        .rows_affected();

        if inserted == 1 {
            return Ok(());
        }

        // Relinking the same identity to the same user is fine.
        let already_linked: bool = sqlx::query_scalar(
            "SELECT EXISTS(
                 SELECT 1 FROM external_accounts
                 WHERE provider = $1 AND subject = $2 AND user_id = $3
             )",
        )
        .bind(provider)
        .bind(subject)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .storage("check external identity")?;

        if already_linked {
            Ok(())
        } else {
            Err(DomainError::ExternalAccountExists)
        }
    }

    async fn username_exists(&self, username: &str) -> DomainResult<bool> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE lower(username) = lower($1))")
            .bind(username)
            .fetch_one(&self.pool)
            .await
            .storage("check username")
    }

    async fn touch_last_login(&self, user_id: Uuid, at: DateTime<Utc>) -> DomainResult<()> {
        sqlx::query("UPDATE users SET last_login_at = $2 WHERE id = $1")
            .bind(user_id)
            .bind(at)
            .execute(&self.pool)
            .await
            .storage("update last login")?;
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        exclude: Uuid,
        limit: i64,
    ) -> DomainResult<Vec<UserSummary>> {
        sqlx::query_as::<_, UserSummary>(
            r"SELECT id, username, display_name, avatar_path, avatar_updated_at, updated_at
              FROM users
              WHERE status = 'active'
                AND id <> $2
                AND (username ILIKE $1 ESCAPE '\' OR email ILIKE $1 ESCAPE '\')
              ORDER BY username ASC
              LIMIT $3",
        )
        .bind(format!("%{}%", escape_like(query.trim())))
        .bind(exclude)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .storage("search users")
    }

    async fn delete_user(&self, id: Uuid) -> DomainResult<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            "DELETE FROM users WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .storage("delete user")
    }
}

/// Escapes `LIKE` wildcards so user input matches literally.
fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl SessionStore for PgStore {
    async fn create_session(&self, session: Session) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO sessions (id, user_id, token_hash, expires_at, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(&session.token_hash)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(&self.pool)
        .await
        .storage("create session")?;
        Ok(())
    }

    async fn find_active(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<Session>> {
        sqlx::query_as::<_, Session>(
            "SELECT id, user_id, token_hash, expires_at, created_at
             FROM sessions
             WHERE token_hash = $1 AND expires_at > $2",
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .storage("find session")
    }

    async fn revoke(&self, token_hash: &str) -> DomainResult<()> {
        sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.pool)
            .await
            .storage("revoke session")?;
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for PgStore {
    async fn update_display_name(
        &self,
        user_id: Uuid,
        display_name: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> DomainResult<bool> {
        let result = sqlx::query(
            "UPDATE users SET display_name = $2, updated_at = $3
             WHERE id = $1 AND updated_at < $3",
        )
        .bind(user_id)
        .bind(display_name)
        .bind(updated_at)
        .execute(&self.pool)
        .await
        .storage("update display name")?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_avatar(
        &self,
        user_id: Uuid,
        avatar_path: &str,
        updated_at: DateTime<Utc>,
    ) -> DomainResult<Option<Option<String>>> {
        // The locked sub-select reads the path being replaced in the same
        // statement as the guarded write.
        let previous: Option<(Option<String>,)> = sqlx::query_as(
            "UPDATE users AS u
             SET avatar_path = $2, avatar_updated_at = $3, updated_at = $3
             FROM (SELECT id, avatar_path FROM users WHERE id = $1 FOR UPDATE) AS prev
             WHERE u.id = prev.id AND u.updated_at < $3
             RETURNING prev.avatar_path",
        )
        .bind(user_id)
        .bind(avatar_path)
        .bind(updated_at)
        .fetch_optional(&self.pool)
        .await
        .storage("update avatar")?;
        Ok(previous.map(|(path,)| path))
    }
}

#[cfg(test)]
mod tests {
    use super::escape_like;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("bob"), "bob");
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }
}
