//! API Router and Application State
//!
//! Central routing configuration and shared state.

pub mod body;
pub mod updated_at;

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use sqlx::PgPool;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::error;

use crate::{
    auth::{self, AuthService, IdTokenVerifier},
    clock::Clock,
    config::Config,
    email::Mailer,
    matches::{self, MatchService},
    notifications::{self, NotificationService, PushSender},
    password_reset::PasswordResetService,
    profile::{self, avatar::MAX_AVATAR_BYTES, ProfileService},
    ratelimit::{rate_limit_by_user, with_category, RateLimitCategory, RateLimiter},
    social::{self, FriendsService},
    store::Stores,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// `None` when running on the in-memory store
    pub db: Option<PgPool>,
    pub clock: Arc<dyn Clock>,
    pub auth: Arc<AuthService>,
    pub friends: Arc<FriendsService>,
    pub matches: Arc<MatchService>,
    pub profile: Arc<ProfileService>,
    pub password_reset: Arc<PasswordResetService>,
    pub notifications: Arc<NotificationService>,
    /// Rate limiter (optional)
    pub rate_limiter: Option<Arc<RateLimiter>>,
}

/// Outbound collaborators, each optional except ID token verification.
pub struct Integrations {
    pub id_tokens: Arc<dyn IdTokenVerifier>,
    pub mailer: Option<Arc<dyn Mailer>>,
    pub push: Option<Arc<dyn PushSender>>,
}

impl AppState {
    /// Wires every engine to the given ports.
    #[must_use]
    pub fn new(
        config: Config,
        db: Option<PgPool>,
        stores: Stores,
        clock: Arc<dyn Clock>,
        integrations: Integrations,
        rate_limiter: Option<RateLimiter>,
    ) -> Self {
        let notifications = Arc::new(NotificationService::new(
            stores.notification_tokens.clone(),
            integrations.push,
            clock.clone(),
        ));
        let friends = Arc::new(FriendsService::new(
            stores.users.clone(),
            stores.friendships.clone(),
            notifications.clone(),
            clock.clone(),
        ));
        let matches = Arc::new(MatchService::new(
            stores.matches.clone(),
            stores.users.clone(),
            friends.clone(),
            clock.clone(),
        ));
        let auth = Arc::new(AuthService::new(
            stores.users.clone(),
            stores.sessions.clone(),
            integrations.id_tokens,
            clock.clone(),
            config.session_ttl(),
        ));
        let profile = Arc::new(ProfileService::new(
            stores.profiles.clone(),
            stores.users.clone(),
        ));
        let password_reset = Arc::new(PasswordResetService::new(
            stores.users,
            stores.password_resets,
            integrations.mailer,
            clock.clone(),
            config.password_reset_ttl(),
        ));

        Self {
            config: Arc::new(config),
            db,
            clock,
            auth,
            friends,
            matches,
            profile,
            password_reset,
            notifications,
            rate_limiter: rate_limiter.map(Arc::new),
        }
    }
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let social_routes = social::router()
        .layer(from_fn_with_state(state.clone(), rate_limit_by_user))
        .layer(from_fn(with_category(RateLimitCategory::Social)));

    let write_routes = Router::new()
        .nest(
            "/users",
            profile::router().layer(DefaultBodyLimit::max(MAX_AVATAR_BYTES + 64 * 1024)),
        )
        .nest("/matches", matches::router())
        .nest("/stats", matches::stats_router())
        .nest("/notifications", notifications::router())
        .layer(from_fn_with_state(state.clone(), rate_limit_by_user))
        .layer(from_fn(with_category(RateLimitCategory::Write)));

    let protected_routes = Router::new()
        .merge(social_routes)
        .merge(write_routes)
        .layer(from_fn_with_state(state.clone(), auth::require_auth));

    let avatars = ServeDir::new(&state.config.avatar_dir);

    Router::new()
        .route("/health", get(health_check))
        .nest(
            "/v1",
            Router::new()
                .nest("/auth", auth::router(state.clone()))
                .merge(protected_routes),
        )
        .nest_service("/avatars", avatars)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
    rate_limiting: bool,
}

/// Liveness plus a database ping when one is attached.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = match &state.db {
        None => "memory",
        Some(pool) => match sqlx::query("SELECT 1").execute(pool).await {
            Ok(_) => "ok",
            Err(e) => {
                error!(error = %e, "Health check database ping failed");
                "unavailable"
            }
        },
    };
    let status = if database == "unavailable" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (
        status,
        Json(HealthResponse {
            status: if status.is_success() { "ok" } else { "degraded" },
            database,
            rate_limiting: state.rate_limiter.is_some(),
        }),
    )
}
