//! Profile Update Engine
//!
//! Display name and avatar writes guarded by the row's `updated_at`.

pub mod avatar;
pub mod handlers;
pub mod service;
pub mod types;

use axum::{
    routing::{get, post},
    Router,
};

use crate::api::AppState;

pub use service::ProfileService;
pub use types::{ProfileUpdateOutcome, UserProfile};

/// Current-user and user lookup routes, nested under `/v1/users`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/me",
            get(handlers::get_me)
                .patch(handlers::update_me)
                .delete(handlers::delete_me),
        )
        .route("/me/avatar", post(handlers::upload_avatar))
        .route("/search", get(handlers::search_users))
}
