//! Password reset and push token queries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::{NotificationToken, PasswordResetToken, Platform};
use super::PgStore;
use crate::error::{DomainResult, StorageContext};
use crate::store::{NotificationTokenStore, PasswordResetStore};

#[async_trait]
impl PasswordResetStore for PgStore {
    async fn create_token(&self, token: PasswordResetToken) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO password_reset_tokens
                 (id, user_id, token_hash, email, created_by, created_at, expires_at, used_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(&token.email)
        .bind(token.created_by)
        .bind(token.created_at)
        .bind(token.expires_at)
        .bind(token.used_at)
        .execute(&self.pool)
        .await
        .storage("create reset token")?;
        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> DomainResult<Option<PasswordResetToken>> {
        sqlx::query_as::<_, PasswordResetToken>(
            "SELECT id, user_id, token_hash, email, created_by, created_at, expires_at, used_at
             FROM password_reset_tokens
             WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .storage("find reset token")
    }

    async fn invalidate_for_user(&self, user_id: Uuid, at: DateTime<Utc>) -> DomainResult<()> {
        sqlx::query(
            "UPDATE password_reset_tokens SET used_at = $2
             WHERE user_id = $1 AND used_at IS NULL",
        )
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .storage("invalidate reset tokens")?;
        Ok(())
    }

    async fn consume(
        &self,
        token_id: Uuid,
        user_id: Uuid,
        password_hash: &str,
        at: DateTime<Utc>,
    ) -> DomainResult<bool> {
        let mut tx = self.pool.begin().await.storage("begin password reset")?;

        let claimed = sqlx::query(
            "UPDATE password_reset_tokens SET used_at = $2
             WHERE id = $1 AND used_at IS NULL",
        )
        .bind(token_id)
        .bind(at)
        .execute(&mut *tx)
        .await
        .storage("claim reset token")?
        .rows_affected();

        if claimed != 1 {
            return Ok(false);
        }

        sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(user_id)
            .bind(password_hash)
            .execute(&mut *tx)
            .await
            .storage("set password")?;

        sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .storage("revoke sessions")?;

        tx.commit().await.storage("commit password reset")?;
        Ok(true)
    }
}

#[async_trait]
impl NotificationTokenStore for PgStore {
    async fn upsert_token(
        &self,
        user_id: Uuid,
        token: &str,
        platform: Platform,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO notification_tokens (token, user_id, platform, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $4)
             ON CONFLICT (token) DO UPDATE
             SET user_id = EXCLUDED.user_id,
                 platform = EXCLUDED.platform,
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(token)
        .bind(user_id)
        .bind(platform)
        .bind(at)
        .execute(&self.pool)
        .await
        .storage("upsert push token")?;
        Ok(())
    }

    async fn delete_for_user(&self, user_id: Uuid, token: &str) -> DomainResult<bool> {
        let result = sqlx::query("DELETE FROM notification_tokens WHERE token = $1 AND user_id = $2")
            .bind(token)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .storage("delete push token")?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_token(&self, token: &str) -> DomainResult<()> {
        sqlx::query("DELETE FROM notification_tokens WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .storage("drop unregistered push token")?;
        Ok(())
    }

    async fn list_for_user(&self, user_id: Uuid) -> DomainResult<Vec<NotificationToken>> {
        sqlx::query_as::<_, NotificationToken>(
            "SELECT token, user_id, platform, created_at, updated_at
             FROM notification_tokens
             WHERE user_id = $1
             ORDER BY token",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .storage("list push tokens")
    }
}
