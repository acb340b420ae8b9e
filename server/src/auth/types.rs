//! Auth request/response bodies.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::db::User;
use crate::profile::UserProfile;

/// Username rule, mirrored by the `users_username_format` check constraint.
pub static USERNAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]{3,24}$").unwrap());

/// Registration request.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    /// 3-24 letters, digits or underscores.
    #[validate(regex(
        path = *USERNAME_REGEX,
        message = "must be 3-24 letters, digits or underscores"
    ))]
    pub username: String,
    pub password: String,
    #[validate(length(max = 48, message = "must be 48 characters or less"))]
    pub display_name: Option<String>,
}

/// Login by email or username.
#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    #[serde(alias = "email", alias = "username")]
    pub login: String,
    pub password: String,
}

/// Google / Apple sign-in.
#[derive(Debug, Default, Deserialize)]
pub struct ExternalLoginRequest {
    pub id_token: String,
}

/// A freshly issued session.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    /// Raw bearer token; never stored.
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

/// Session response returned by register, login and external login.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
}

impl From<IssuedSession> for AuthResponse {
    fn from(session: IssuedSession) -> Self {
        Self {
            token: session.token,
            token_type: "Bearer",
            expires_at: session.expires_at,
            user: session.user.into(),
        }
    }
}
