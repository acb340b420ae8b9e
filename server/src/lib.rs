//! Leader Server
//!
//! Backend for a card-game social app: accounts, friends, recorded
//! matches and per-user stats. Concurrent edits from several devices are
//! resolved with optimistic `updated_at` watermarks.

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod email;
pub mod error;
pub mod matches;
pub mod notifications;
pub mod password_reset;
pub mod profile;
pub mod ratelimit;
pub mod social;
pub mod store;
