use std::sync::Arc;

use chrono::TimeDelta;
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::password::{hash_password, validate_password};
use crate::auth::tokens::{generate_token, hash_token};
use crate::clock::Clock;
use crate::db::{PasswordResetToken, User};
use crate::email::{Mailer, PasswordResetEmail};
use crate::error::{DomainError, DomainResult};
use crate::store::{PasswordResetStore, UserStore};

pub struct PasswordResetService {
    users: Arc<dyn UserStore>,
    resets: Arc<dyn PasswordResetStore>,
    mailer: Option<Arc<dyn Mailer>>,
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
}

impl PasswordResetService {
    pub fn new(
        users: Arc<dyn UserStore>,
        resets: Arc<dyn PasswordResetStore>,
        mailer: Option<Arc<dyn Mailer>>,
        clock: Arc<dyn Clock>,
        ttl: TimeDelta,
    ) -> Self {
        Self {
            users,
            resets,
            mailer,
            clock,
            ttl,
        }
    }

    /// Emails a reset link when the address belongs to an active account.
    ///
    /// Unknown addresses and delivery failures are indistinguishable from
    /// success to the caller.
    #[tracing::instrument(skip_all)]
    pub async fn forgot(&self, email: &str) -> DomainResult<()> {
        let mailer = self
            .mailer
            .as_ref()
            .ok_or(DomainError::NotConfigured("email delivery"))?;

        let email = email.trim().to_lowercase();
        if email.is_empty() {
            return Err(DomainError::validation("email", "required"));
        }
        let Some(user) = self
            .users
            .find_by_login(&email)
            .await?
            .filter(|u| u.email == email && !u.is_disabled())
        else {
            info!("Password reset requested for unknown address");
            return Ok(());
        };

        let token = self.issue(&user, None).await?;
        let message = PasswordResetEmail {
            to: user.email.clone(),
            username: user.username.clone(),
            token,
            expires_in_minutes: self.ttl.num_minutes(),
        };
        if let Err(e) = mailer.send_password_reset(&message).await {
            error!(user_id = %user.id, error = %e, "Failed to send password reset email");
        }
        Ok(())
    }

    /// Replaces any outstanding token with a new one and returns it raw.
    ///
    /// `created_by` is `None` for self-service requests.
    pub async fn issue(&self, user: &User, created_by: Option<Uuid>) -> DomainResult<String> {
        let now = self.clock.now();
        self.resets.invalidate_for_user(user.id, now).await?;

        let token = generate_token();
        self.resets
            .create_token(PasswordResetToken {
                id: Uuid::now_v7(),
                user_id: user.id,
                token_hash: hash_token(&token),
                email: user.email.clone(),
                created_by,
                created_at: now,
                expires_at: now + self.ttl,
                used_at: None,
            })
            .await?;
        info!(user_id = %user.id, created_by = ?created_by, "Password reset token issued");
        Ok(token)
    }

    /// Sets a new password and revokes every session of the user.
    ///
    /// The token is claimed with a conditional write, so of two concurrent
    /// resets exactly one succeeds.
    #[tracing::instrument(skip_all)]
    pub async fn reset(&self, token: &str, new_password: &str) -> DomainResult<()> {
        validate_password(new_password)?;
        let token = token.trim();
        if token.is_empty() {
            return Err(DomainError::ResetTokenInvalid);
        }

        let stored = self
            .resets
            .find_by_hash(&hash_token(token))
            .await?
            .ok_or(DomainError::ResetTokenInvalid)?;
        if stored.used_at.is_some() {
            return Err(DomainError::ResetTokenInvalid);
        }
        let now = self.clock.now();
        if stored.expires_at <= now {
            return Err(DomainError::ResetTokenExpired);
        }

        let password_hash = hash_password(new_password)?;
        if !self
            .resets
            .consume(stored.id, stored.user_id, &password_hash, now)
            .await?
        {
            return Err(DomainError::ResetTokenInvalid);
        }
        info!(user_id = %stored.user_id, "Password reset completed");
        Ok(())
    }
}
