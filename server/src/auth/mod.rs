//! Authentication
//!
//! Local accounts, Google/Apple sign-in and opaque bearer sessions.

mod handlers;
pub mod id_tokens;
mod middleware;
pub mod password;
pub mod service;
pub mod tokens;
pub mod types;

use axum::{middleware as axum_middleware, routing::post, Router};

use crate::api::AppState;
use crate::password_reset;
use crate::ratelimit::{rate_limit_by_ip, with_category, RateLimitCategory};

pub use id_tokens::{ExternalClaims, IdTokenVerifier, JwksVerifier};
pub use middleware::{bearer_token, require_auth, AuthUser};
pub use service::AuthService;

/// Create authentication router.
///
/// Public, rate limited per IP:
/// - POST /login, /google, /apple
/// - POST /register
/// - POST /forgot, /reset
///
/// Protected:
/// - POST /logout
pub fn router(state: AppState) -> Router<AppState> {
    let login_routes = Router::new()
        .route("/login", post(handlers::login))
        .route("/google", post(handlers::google))
        .route("/apple", post(handlers::apple))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit_by_ip,
        ))
        .layer(axum_middleware::from_fn(with_category(
            RateLimitCategory::AuthLogin,
        )));

    let register_route = Router::new()
        .route("/register", post(handlers::register))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit_by_ip,
        ))
        .layer(axum_middleware::from_fn(with_category(
            RateLimitCategory::AuthRegister,
        )));

    let reset_routes = Router::new()
        .route("/forgot", post(password_reset::handlers::forgot))
        .route("/reset", post(password_reset::handlers::reset))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit_by_ip,
        ))
        .layer(axum_middleware::from_fn(with_category(
            RateLimitCategory::AuthPasswordReset,
        )));

    let protected_routes = Router::new()
        .route("/logout", post(handlers::logout))
        .layer(axum_middleware::from_fn_with_state(state, require_auth));

    login_routes
        .merge(register_route)
        .merge(reset_routes)
        .merge(protected_routes)
}
