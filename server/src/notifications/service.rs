use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::fcm::friend_request_message;
use super::{PushOutcome, PushSender};
use crate::clock::Clock;
use crate::db::{Platform, UserSummary};
use crate::error::{DomainError, DomainResult};
use crate::social::FriendRequestNotifier;
use crate::store::NotificationTokenStore;

/// FCM registration tokens are well under this.
const MAX_TOKEN_LEN: usize = 4096;

pub struct NotificationService {
    tokens: Arc<dyn NotificationTokenStore>,
    sender: Option<Arc<dyn PushSender>>,
    clock: Arc<dyn Clock>,
}

impl NotificationService {
    pub fn new(
        tokens: Arc<dyn NotificationTokenStore>,
        sender: Option<Arc<dyn PushSender>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tokens,
            sender,
            clock,
        }
    }

    /// Registers a device token; a token seen before moves to this user.
    pub async fn register_token(
        &self,
        user_id: Uuid,
        token: &str,
        platform: Platform,
    ) -> DomainResult<()> {
        let token = validate_token(token)?;
        self.tokens
            .upsert_token(user_id, token, platform, self.clock.now())
            .await?;
        info!(user_id = %user_id, platform = ?platform, "Push token registered");
        Ok(())
    }

    /// Idempotent: deleting an unknown token succeeds.
    pub async fn delete_token(&self, user_id: Uuid, token: &str) -> DomainResult<()> {
        let token = validate_token(token)?;
        if self.tokens.delete_for_user(user_id, token).await? {
            info!(user_id = %user_id, "Push token deleted");
        }
        Ok(())
    }
}

fn validate_token(token: &str) -> DomainResult<&str> {
    let token = token.trim();
    if token.is_empty() {
        return Err(DomainError::validation("token", "required"));
    }
    if token.len() > MAX_TOKEN_LEN {
        return Err(DomainError::validation("token", "too long"));
    }
    Ok(token)
}

#[async_trait]
impl FriendRequestNotifier for NotificationService {
    async fn friend_request_created(
        &self,
        addressee_id: Uuid,
        requester: &UserSummary,
    ) -> DomainResult<()> {
        let Some(sender) = self.sender.as_ref() else {
            debug!("Push delivery not configured, skipping");
            return Ok(());
        };

        for device in self.tokens.list_for_user(addressee_id).await? {
            let message = friend_request_message(&device.token, device.platform, requester);
            match sender.send(&message).await {
                Ok(PushOutcome::Delivered) => {}
                Ok(PushOutcome::Unregistered) => {
                    info!(user_id = %addressee_id, "Dropping unregistered push token");
                    self.tokens.delete_token(&device.token).await?;
                }
                Err(e) => {
                    warn!(user_id = %addressee_id, error = %e, "Push delivery failed");
                }
            }
        }
        Ok(())
    }
}
