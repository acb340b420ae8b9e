pub mod etag;
pub mod friends;
pub mod handlers;
pub mod types;

use async_trait::async_trait;
use axum::{
    routing::{delete, get, post},
    Router,
};
use uuid::Uuid;

use crate::api::AppState;
use crate::db::UserSummary;
use crate::error::DomainResult;

pub use friends::FriendsService;

/// Side effect fired after a friend request is created. Failures are logged
/// by the caller and never surface to the requester.
#[async_trait]
pub trait FriendRequestNotifier: Send + Sync {
    async fn friend_request_created(
        &self,
        addressee_id: Uuid,
        requester: &UserSummary,
    ) -> DomainResult<()>;
}

/// Notifier that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl FriendRequestNotifier for NoopNotifier {
    async fn friend_request_created(&self, _: Uuid, _: &UserSummary) -> DomainResult<()> {
        Ok(())
    }
}

/// Create the social router with friend management endpoints
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/friends", get(handlers::list_overview))
        .route("/friends/connections", get(handlers::list_connections))
        // Friend requests
        .route("/friends/requests", post(handlers::create_request))
        .route("/friends/requests/{id}/accept", post(handlers::accept_request))
        .route("/friends/requests/{id}/decline", post(handlers::decline_request))
        .route("/friends/requests/{id}/cancel", post(handlers::cancel_request))
        .route("/friends/{id}", delete(handlers::remove_friend))
}
