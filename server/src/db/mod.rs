//! Database Layer
//!
//! `PostgreSQL` pool, migrations and the [`PgStore`] adapter behind every
//! persistence port. Queries are runtime-checked (no compile-time
//! `DATABASE_URL` required).
//!
//! Constraint names the adapter maps to domain errors:
//! - `users_username_lower_uq` = `UsernameTaken`
//! - `users_email_lower_uq` = `EmailTaken`
//! - `friendships_pair_uq` = `FriendshipExists`
//! - `matches_client_ref_uq` = replay of an earlier insert

mod friendships;
mod matches;
mod models;
mod tokens;
mod users;


use std::time::Duration;

use anyhow::Result;
pub use models::*;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Create `PostgreSQL` connection pool with health configuration.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        // Keep minimum connections warm to prevent cold-start latency
        .min_connections(2)
        .max_connections(20)
        // Prevent hanging requests on pool exhaustion
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .test_before_acquire(true)
        .connect(database_url)
        .await?;

    info!("Connected to PostgreSQL");
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations completed");
    Ok(())
}

/// `PostgreSQL` implementation of every store port.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Name of the unique constraint a write tripped over, if any.
fn unique_violation(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => db_err.constraint(),
        _ => None,
    }
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation())
}
