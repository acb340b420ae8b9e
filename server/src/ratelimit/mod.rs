//! Rate limiting.
//!
//! In-process sliding windows keyed by category and client identity
//! (normalized IP or user id).

pub mod config;
pub mod error;
pub mod ip;
pub mod limiter;
pub mod middleware;
pub mod types;

pub use config::*;
pub use error::*;
pub use ip::*;
pub use limiter::*;
pub use middleware::{rate_limit_by_ip, rate_limit_by_user, with_category};
pub use types::*;
