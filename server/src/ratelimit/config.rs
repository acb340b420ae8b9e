//! Rate limiting configuration.

use std::collections::HashSet;
use std::time::Duration;

use crate::ratelimit::RateLimitCategory;

/// Configuration for the rate limiting system.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled
    pub enabled: bool,
    /// Whether to trust X-Forwarded-For headers
    pub trust_proxy: bool,
    /// Identities (normalized IPs) that bypass rate limiting
    pub allowlist: HashSet<String>,
    pub limits: RateLimits,
}

/// Rate limits for each category.
#[derive(Debug, Clone)]
pub struct RateLimits {
    pub auth_login: LimitConfig,
    pub auth_register: LimitConfig,
    pub auth_password_reset: LimitConfig,
    pub social: LimitConfig,
    pub write: LimitConfig,
}

/// Configuration for a single rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitConfig {
    /// Maximum requests allowed in the window
    pub requests: u32,
    /// Window duration in seconds
    pub window_secs: u64,
}

impl LimitConfig {
    pub const fn window(self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trust_proxy: false,
            allowlist: HashSet::new(),
            limits: RateLimits::default(),
        }
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            auth_login: LimitConfig { requests: 10, window_secs: 300 },
            auth_register: LimitConfig { requests: 5, window_secs: 60 },
            auth_password_reset: LimitConfig { requests: 3, window_secs: 60 },
            social: LimitConfig { requests: 30, window_secs: 60 },
            write: LimitConfig { requests: 60, window_secs: 60 },
        }
    }
}

impl RateLimits {
    pub const fn get(&self, category: RateLimitCategory) -> LimitConfig {
        match category {
            RateLimitCategory::AuthLogin => self.auth_login,
            RateLimitCategory::AuthRegister => self.auth_register,
            RateLimitCategory::AuthPasswordReset => self.auth_password_reset,
            RateLimitCategory::Social => self.social,
            RateLimitCategory::Write => self.write,
        }
    }
}

impl RateLimitConfig {
    /// Creates configuration from environment variables.
    ///
    /// - `RATE_LIMIT_ENABLED` (default: true)
    /// - `RATE_LIMIT_TRUST_PROXY` (default: false)
    /// - `RATE_LIMIT_ALLOWLIST`: comma-separated IPs
    /// - `RATE_LIMIT_AUTH_LOGIN`, `RATE_LIMIT_AUTH_REGISTER`,
    ///   `RATE_LIMIT_AUTH_PASSWORD_RESET`, `RATE_LIMIT_SOCIAL`,
    ///   `RATE_LIMIT_WRITE`: "requests,window_secs"
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("RATE_LIMIT_ENABLED") {
            config.enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("RATE_LIMIT_TRUST_PROXY") {
            config.trust_proxy = val.parse().unwrap_or(false);
        }
        if let Ok(val) = std::env::var("RATE_LIMIT_ALLOWLIST") {
            config.allowlist = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        let limits = &mut config.limits;
        for (var, slot) in [
            ("RATE_LIMIT_AUTH_LOGIN", &mut limits.auth_login),
            ("RATE_LIMIT_AUTH_REGISTER", &mut limits.auth_register),
            ("RATE_LIMIT_AUTH_PASSWORD_RESET", &mut limits.auth_password_reset),
            ("RATE_LIMIT_SOCIAL", &mut limits.social),
            ("RATE_LIMIT_WRITE", &mut limits.write),
        ] {
            if let Some(limit) = std::env::var(var).ok().as_deref().and_then(parse_limit_config) {
                *slot = limit;
            }
        }

        config
    }
}

/// Parses a limit config from "requests,window_secs" format.
fn parse_limit_config(val: &str) -> Option<LimitConfig> {
    let (requests, window_secs) = val.split_once(',')?;
    Some(LimitConfig {
        requests: requests.trim().parse().ok()?,
        window_secs: window_secs.trim().parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = RateLimits::default();
        assert_eq!(
            limits.get(RateLimitCategory::AuthLogin),
            LimitConfig { requests: 10, window_secs: 300 }
        );
        assert_eq!(limits.get(RateLimitCategory::Write).requests, 60);
        assert!(RateLimitConfig::default().enabled);
    }

    #[test]
    fn test_parse_limit_config() {
        let limit = parse_limit_config(" 20 , 120 ").unwrap();
        assert_eq!(limit.requests, 20);
        assert_eq!(limit.window(), Duration::from_secs(120));

        assert!(parse_limit_config("10").is_none());
        assert!(parse_limit_config("10,60,extra").is_none());
        assert!(parse_limit_config("abc,60").is_none());
    }
}
