//! Rate limiting types.

/// Categories for rate limiting with different thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitCategory {
    /// Login attempts (email/username and external identity)
    AuthLogin,
    /// Registration attempts
    AuthRegister,
    /// Forgot/reset password requests
    AuthPasswordReset,
    /// Friend requests and their transitions
    Social,
    /// Match recording, profile and token writes
    Write,
}

impl RateLimitCategory {
    /// Returns the string identifier for this category (used in logs).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthLogin => "auth_login",
            Self::AuthRegister => "auth_register",
            Self::AuthPasswordReset => "auth_pwd_reset",
            Self::Social => "social",
            Self::Write => "write",
        }
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Maximum requests allowed in the window
    pub limit: u32,
    /// Remaining requests in the current window
    pub remaining: u32,
    /// Seconds to wait before retrying (0 if allowed)
    pub retry_after: u64,
}

impl RateLimitResult {
    pub(crate) const fn unlimited() -> Self {
        Self {
            allowed: true,
            limit: 0,
            remaining: 0,
            retry_after: 0,
        }
    }
}

/// Normalized IP address stored in request extensions.
///
/// IPv4 addresses are stored as-is.
/// IPv6 addresses are normalized to /64 prefix for rate limiting.
#[derive(Debug, Clone)]
pub struct NormalizedIp(pub String);
