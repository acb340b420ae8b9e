//! Leader Server - Main Entry Point

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};

use leader_server::{
    api::{self, AppState, Integrations},
    auth::JwksVerifier,
    clock::SystemClock,
    config, db,
    email::{Mailer, SmtpMailer},
    notifications::{FcmSender, PushSender},
    ratelimit::{RateLimitConfig, RateLimiter},
    store::Stores,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "leader_server=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Leader Server"
    );

    // Initialize database
    let db_pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&db_pool).await?;
    let stores = Stores::from_adapter(Arc::new(db::PgStore::new(db_pool.clone())));

    // Email is optional; password reset answers 503 without it
    let mailer: Option<Arc<dyn Mailer>> = if config.has_smtp() {
        let mailer = SmtpMailer::new(&config)?;
        info!("SMTP mailer configured");
        Some(Arc::new(mailer))
    } else {
        info!("SMTP not configured, password reset disabled");
        None
    };

    // Push is optional; friend requests are still stored without it
    let push: Option<Arc<dyn PushSender>> = match (&config.fcm_project_id, &config.fcm_credentials_path) {
        (Some(project_id), Some(path)) => match FcmSender::from_credentials_file(project_id, path) {
            Ok(sender) => {
                info!(project_id = %project_id, "FCM push configured");
                Some(Arc::new(sender))
            }
            Err(e) => {
                warn!(error = %e, "FCM initialization failed. Push notifications disabled.");
                None
            }
        },
        _ => None,
    };

    let id_tokens = Arc::new(JwksVerifier::new(
        config.google_client_id.clone(),
        config.apple_service_id.clone(),
    ));

    // Initialize rate limiter (optional)
    let rl_config = RateLimitConfig::from_env();
    let rate_limiter = if rl_config.enabled {
        info!("Rate limiter initialized");
        Some(RateLimiter::new(rl_config))
    } else {
        info!("Rate limiting disabled by configuration");
        None
    };

    // Build application state
    let bind_address = config.bind_address.clone();
    let state = AppState::new(
        config,
        Some(db_pool),
        stores,
        Arc::new(SystemClock),
        Integrations {
            id_tokens,
            mailer,
            push,
        },
        rate_limiter,
    );

    // Build router
    let app = api::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!(address = %bind_address, "Server listening");

    // Graceful shutdown handler
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await?;

    info!("Server shutdown complete");

    Ok(())
}
