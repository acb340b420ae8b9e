//! Password reset by emailed single-use token.

pub mod handlers;
pub mod service;

pub use service::PasswordResetService;
