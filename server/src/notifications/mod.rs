//! Push notifications.
//!
//! Device token registry plus friend request fan-out over FCM.

pub mod fcm;
pub mod handlers;
pub mod service;

use async_trait::async_trait;
use axum::{routing::post, Router};

use crate::api::AppState;

pub use fcm::FcmSender;
pub use service::NotificationService;

/// Errors from the push transport.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("FCM credentials error: {0}")]
    Credentials(String),

    #[error("FCM request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("FCM API error (status {status}): {body}")]
    Api { status: u16, body: String },
}

/// How the push provider answered a single send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// The device token is no longer valid and should be forgotten.
    Unregistered,
}

/// Transport for a single push message.
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, message: &fcm::FcmMessage) -> Result<PushOutcome, PushError>;
}

/// Mounted at `/v1/notifications`.
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/token",
        post(handlers::register_token).delete(handlers::delete_token),
    )
}
