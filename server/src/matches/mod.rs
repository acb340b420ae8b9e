//! Match Recording Engine
//!
//! Idempotent match creation, read projections and stats aggregation.

pub mod handlers;
pub mod service;
pub mod stats;
pub mod types;

use async_trait::async_trait;
use axum::{routing::get, Router};
use uuid::Uuid;

use crate::api::AppState;
use crate::error::DomainResult;

pub use service::MatchService;

/// Accepted-friendship check consulted by legacy-mode match creation.
#[async_trait]
pub trait FriendshipChecker: Send + Sync {
    async fn are_friends(&self, a: Uuid, b: Uuid) -> DomainResult<bool>;
}

/// Match routes, nested under `/v1/matches`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_matches).post(handlers::create_match))
        .route("/{id}", get(handlers::get_match))
}

/// Stats routes, nested under `/v1/stats`.
pub fn stats_router() -> Router<AppState> {
    Router::new()
        .route("/summary", get(handlers::stats_summary))
        .route("/head-to-head/{id}", get(handlers::head_to_head))
}
