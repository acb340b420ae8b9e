//! Axum middleware for rate limiting.
//!
//! By IP for unauthenticated endpoints, by user id behind `require_auth`.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::ratelimit::{
    extract_client_ip, normalize_ip, NormalizedIp, RateLimitCategory, RateLimitError,
};

/// Rate limits by normalized client IP.
///
/// The category comes from [`with_category`], applied as the outer layer.
/// Passes through when no limiter is configured.
#[tracing::instrument(skip_all)]
pub async fn rate_limit_by_ip(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, RateLimitError> {
    let Some(category) = request.extensions().get::<RateLimitCategory>().copied() else {
        return Ok(next.run(request).await);
    };
    let Some(rate_limiter) = state.rate_limiter.clone() else {
        return Ok(next.run(request).await);
    };

    let trust_proxy = rate_limiter.config().trust_proxy;
    let client_ip = extract_client_ip(request.headers(), connect_info(&request).as_ref(), trust_proxy);
    let normalized_ip = normalize_ip(client_ip);
    request
        .extensions_mut()
        .insert(NormalizedIp(normalized_ip.clone()));

    let result = rate_limiter.check(category, &normalized_ip);
    if !result.allowed {
        debug!(
            category = %category.as_str(),
            ip = %normalized_ip,
            retry_after = result.retry_after,
            "Rate limit exceeded"
        );
        return Err(RateLimitError(result));
    }

    Ok(next.run(request).await)
}

/// Rate limits by authenticated user, falling back to IP.
#[tracing::instrument(skip_all)]
pub async fn rate_limit_by_user(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, RateLimitError> {
    let Some(category) = request.extensions().get::<RateLimitCategory>().copied() else {
        return Ok(next.run(request).await);
    };
    let Some(rate_limiter) = state.rate_limiter.clone() else {
        return Ok(next.run(request).await);
    };

    let identifier = if let Some(auth_user) = request.extensions().get::<AuthUser>() {
        format!("user:{}", auth_user.id)
    } else {
        let trust_proxy = rate_limiter.config().trust_proxy;
        normalize_ip(extract_client_ip(
            request.headers(),
            connect_info(&request).as_ref(),
            trust_proxy,
        ))
    };

    let result = rate_limiter.check(category, &identifier);
    if !result.allowed {
        debug!(
            category = %category.as_str(),
            identifier = %identifier,
            retry_after = result.retry_after,
            "Rate limit exceeded"
        );
        return Err(RateLimitError(result));
    }

    Ok(next.run(request).await)
}

/// Peer address, present when served with `into_make_service_with_connect_info`.
fn connect_info(request: &Request) -> Option<ConnectInfo<SocketAddr>> {
    request.extensions().get::<ConnectInfo<SocketAddr>>().cloned()
}

/// Sets the rate limit category for downstream middleware.
///
/// ```ignore
/// Router::new()
///     .route("/login", post(login))
///     .layer(from_fn_with_state(state.clone(), rate_limit_by_ip))
///     .layer(from_fn(with_category(RateLimitCategory::AuthLogin)));
/// ```
pub fn with_category(
    category: RateLimitCategory,
) -> impl Fn(Request, Next) -> std::pin::Pin<Box<dyn std::future::Future<Output = Response> + Send>>
       + Clone
       + Send
       + 'static {
    move |mut request: Request, next: Next| {
        request.extensions_mut().insert(category);
        Box::pin(async move { next.run(request).await })
    }
}
