//! Sliding-window rate limiter held in process memory.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use tracing::debug;

use crate::ratelimit::{RateLimitCategory, RateLimitConfig, RateLimitResult};

/// Windows are swept for empty entries once the map grows past this.
const SWEEP_THRESHOLD: usize = 10_000;

type WindowKey = (RateLimitCategory, String);

/// Per-(category, identity) sliding window.
///
/// Check, prune and record happen under one lock so concurrent requests
/// cannot both take the last slot.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<WindowKey, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub const fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn check(&self, category: RateLimitCategory, identifier: &str) -> RateLimitResult {
        self.check_at(category, identifier, Instant::now())
    }

    /// Records a hit at `now` unless the window is full.
    pub fn check_at(
        &self,
        category: RateLimitCategory,
        identifier: &str,
        now: Instant,
    ) -> RateLimitResult {
        if !self.config.enabled {
            return RateLimitResult::unlimited();
        }
        if self.config.allowlist.contains(identifier) {
            debug!(identifier = %identifier, "Identity in allowlist, bypassing rate limit");
            return RateLimitResult::unlimited();
        }

        let limit = self.config.limits.get(category);
        let window = limit.window();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        if windows.len() > SWEEP_THRESHOLD {
            windows.retain(|_, hits| hits.back().is_some_and(|t| now.duration_since(*t) < window));
        }

        let hits = windows
            .entry((category, identifier.to_owned()))
            .or_default();
        while hits
            .front()
            .is_some_and(|t| now.duration_since(*t) >= window)
        {
            hits.pop_front();
        }

        let used = u32::try_from(hits.len()).unwrap_or(u32::MAX);
        if used >= limit.requests {
            let retry_after = hits.front().map_or(window.as_secs(), |oldest| {
                let elapsed = now.duration_since(*oldest);
                window.saturating_sub(elapsed).as_secs_f64().ceil() as u64
            });
            return RateLimitResult {
                allowed: false,
                limit: limit.requests,
                remaining: 0,
                retry_after: retry_after.max(1),
            };
        }

        hits.push_back(now);
        RateLimitResult {
            allowed: true,
            limit: limit.requests,
            remaining: limit.requests - used - 1,
            retry_after: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::ratelimit::{LimitConfig, RateLimits};

    fn limiter(requests: u32, window_secs: u64) -> RateLimiter {
        let limit = LimitConfig { requests, window_secs };
        RateLimiter::new(RateLimitConfig {
            limits: RateLimits {
                auth_login: limit,
                ..RateLimits::default()
            },
            ..RateLimitConfig::default()
        })
    }

    #[test]
    fn test_window_fills_then_slides() {
        let limiter = limiter(2, 60);
        let start = Instant::now();

        let first = limiter.check_at(RateLimitCategory::AuthLogin, "1.2.3.4", start);
        assert!(first.allowed);
        assert_eq!(first.remaining, 1);
        assert!(limiter
            .check_at(RateLimitCategory::AuthLogin, "1.2.3.4", start + Duration::from_secs(10))
            .allowed);

        let denied =
            limiter.check_at(RateLimitCategory::AuthLogin, "1.2.3.4", start + Duration::from_secs(20));
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, 40);

        // The first hit has aged out.
        assert!(limiter
            .check_at(RateLimitCategory::AuthLogin, "1.2.3.4", start + Duration::from_secs(60))
            .allowed);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = limiter(1, 60);
        let now = Instant::now();
        assert!(limiter.check_at(RateLimitCategory::AuthLogin, "a", now).allowed);
        assert!(limiter.check_at(RateLimitCategory::AuthLogin, "b", now).allowed);
        assert!(limiter.check_at(RateLimitCategory::Write, "a", now).allowed);
        assert!(!limiter.check_at(RateLimitCategory::AuthLogin, "a", now).allowed);
    }

    #[test]
    fn test_disabled_and_allowlisted() {
        let limiter = RateLimiter::new(RateLimitConfig {
            allowlist: HashSet::from(["10.0.0.1".to_string()]),
            limits: RateLimits {
                auth_login: LimitConfig { requests: 0, window_secs: 60 },
                ..RateLimits::default()
            },
            ..RateLimitConfig::default()
        });
        assert!(limiter.check(RateLimitCategory::AuthLogin, "10.0.0.1").allowed);
        assert!(!limiter.check(RateLimitCategory::AuthLogin, "10.0.0.2").allowed);

        let off = RateLimiter::new(RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        });
        for _ in 0..100 {
            assert!(off.check(RateLimitCategory::AuthRegister, "x").allowed);
        }
    }

    #[test]
    fn test_concurrent_hits_never_exceed_limit() {
        let limiter = Arc::new(limiter(5, 60));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || limiter.check(RateLimitCategory::AuthLogin, "ip").allowed)
            })
            .collect();
        let allowed = handles
            .into_iter()
            .filter_map(|h| h.join().ok())
            .filter(|ok| *ok)
            .count();
        assert_eq!(allowed, 5);
    }
}
