//! Reusable test helpers for HTTP integration tests.
//!
//! Provides `TestApp` for sending requests through the full axum router via
//! `tower::ServiceExt::oneshot`. State lives in the in-memory store and time
//! comes from a [`ManualClock`], so these tests need no external services.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{self, header, Method, Request, Response, StatusCode};
use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use http_body_util::BodyExt;
use leader_server::api::{create_router, AppState, Integrations};
use leader_server::auth::{ExternalClaims, IdTokenVerifier};
use leader_server::clock::ManualClock;
use leader_server::config::Config;
use leader_server::db::IdentityProvider;
use leader_server::email::{Mailer, PasswordResetEmail};
use leader_server::error::{DomainError, DomainResult};
use leader_server::notifications::fcm::FcmMessage;
use leader_server::notifications::{PushError, PushOutcome, PushSender};
use leader_server::ratelimit::RateLimiter;
use leader_server::store::memory::MemoryStore;
use leader_server::store::Stores;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

/// Fixed start time for every test app.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

/// Accepts `subject|email` (email may be empty) and rejects anything else.
pub struct FakeVerifier;

#[async_trait]
impl IdTokenVerifier for FakeVerifier {
    async fn verify(
        &self,
        _provider: IdentityProvider,
        id_token: &str,
    ) -> DomainResult<ExternalClaims> {
        let (subject, email) = id_token
            .split_once('|')
            .ok_or(DomainError::InvalidCredentials)?;
        Ok(ExternalClaims {
            subject: subject.to_string(),
            email: (!email.is_empty()).then(|| email.to_lowercase()),
        })
    }
}

/// Keeps every reset email instead of sending it.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<PasswordResetEmail>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_password_reset(&self, email: &PasswordResetEmail) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

impl RecordingMailer {
    pub fn last_token(&self) -> Option<String> {
        self.sent.lock().unwrap().last().map(|e| e.token.clone())
    }
}

/// Records the device token of every push and reports it delivered.
#[derive(Default)]
pub struct RecordingPush {
    pub delivered: Mutex<Vec<String>>,
}

#[async_trait]
impl PushSender for RecordingPush {
    async fn send(&self, message: &FcmMessage) -> Result<PushOutcome, PushError> {
        self.delivered
            .lock()
            .unwrap()
            .push(message.message.token.clone());
        Ok(PushOutcome::Delivered)
    }
}

impl RecordingPush {
    /// Waits for the background fan-out to deliver `count` pushes.
    pub async fn wait_for(&self, count: usize) -> Vec<String> {
        for _ in 0..200 {
            {
                let delivered = self.delivered.lock().unwrap();
                if delivered.len() >= count {
                    return delivered.clone();
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        self.delivered.lock().unwrap().clone()
    }
}

/// A test application wrapping the full axum router.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub mailer: Arc<RecordingMailer>,
    pub push: Arc<RecordingPush>,
    pub avatars: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Same app with a rate limiter in front.
    pub fn with_rate_limiter(limiter: RateLimiter) -> Self {
        Self::build(Some(limiter))
    }

    fn build(rate_limiter: Option<RateLimiter>) -> Self {
        let avatars = TempDir::new().expect("Failed to create avatar dir");
        let mut config = Config::default_for_test();
        config.avatar_dir = avatars.path().to_path_buf();

        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(epoch()));
        let mailer = Arc::new(RecordingMailer::default());
        let push = Arc::new(RecordingPush::default());

        let state = AppState::new(
            config,
            None,
            Stores::from_adapter(store.clone()),
            clock.clone(),
            Integrations {
                id_tokens: Arc::new(FakeVerifier),
                mailer: Some(mailer.clone() as Arc<dyn Mailer>),
                push: Some(push.clone() as Arc<dyn PushSender>),
            },
            rate_limiter,
        );

        Self {
            router: create_router(state),
            store,
            clock,
            mailer,
            push,
            avatars,
        }
    }

    /// Build an HTTP request with the given method and URI.
    pub fn request(method: Method, uri: &str) -> http::request::Builder {
        Request::builder().method(method).uri(uri)
    }

    /// Send a request through the router via `tower::ServiceExt::oneshot`.
    pub async fn oneshot(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot request failed")
    }

    /// Sends JSON (or nothing) and returns status plus parsed body.
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Self::request(method, uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.oneshot(request).await;
        let status = response.status();
        (status, body_json(response).await)
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(token), Some(body)).await
    }

    /// Registers a user and returns `(user_id, bearer_token)`.
    pub async fn register(&self, username: &str) -> (Uuid, String) {
        let (status, body) = self
            .send(
                Method::POST,
                "/v1/auth/register",
                None,
                Some(serde_json::json!({
                    "email": format!("{username}@example.com"),
                    "username": username,
                    "password": "correct horse battery",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
        let id = body["user"]["id"].as_str().unwrap().parse().unwrap();
        let token = body["token"].as_str().unwrap().to_string();
        (id, token)
    }

    /// Sends a request from `requester_token` to `addressee` and accepts it.
    pub async fn befriend(&self, requester_token: &str, addressee: &str, addressee_token: &str) {
        let (status, request) = self
            .post(
                "/v1/friends/requests",
                requester_token,
                serde_json::json!({ "username": addressee }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "request failed: {request}");
        let id = request["id"].as_str().unwrap();
        let (status, _) = self
            .send(
                Method::POST,
                &format!("/v1/friends/requests/{id}/accept"),
                Some(addressee_token),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }
}

/// Reads the whole body as JSON; `Null` when empty.
pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    }
}
