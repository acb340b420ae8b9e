//! Rate limiting error response.

use axum::http::header::{HeaderValue, RETRY_AFTER};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::ratelimit::RateLimitResult;

/// Request rejected by the limiter.
#[derive(Debug)]
pub struct RateLimitError(pub RateLimitResult);

/// JSON response body for rate limit errors.
#[derive(Serialize)]
pub struct RateLimitErrorResponse {
    pub error: &'static str,
    pub message: String,
    /// Seconds to wait before retrying.
    pub retry_after: u64,
    pub limit: u32,
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let result = self.0;
        let body = RateLimitErrorResponse {
            error: "RATE_LIMITED",
            message: format!("Too many requests. Wait {} seconds.", result.retry_after),
            retry_after: result.retry_after,
            limit: result.limit,
        };
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        if let Ok(v) = HeaderValue::from_str(&result.retry_after.to_string()) {
            response.headers_mut().insert(RETRY_AFTER, v);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_carries_retry_after() {
        let response = RateLimitError(RateLimitResult {
            allowed: false,
            limit: 3,
            remaining: 0,
            retry_after: 42,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "42");
    }
}
