//! Registration, login, sessions and external identities.

use std::sync::Arc;

use chrono::TimeDelta;
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use super::id_tokens::{ExternalClaims, IdTokenVerifier};
use super::password::{hash_password, validate_password, verify_password};
use super::tokens::{generate_token, hash_token};
use super::types::{IssuedSession, LoginRequest, RegisterRequest};
use crate::clock::Clock;
use crate::db::{IdentityProvider, NewUser, Session, User};
use crate::error::{DomainError, DomainResult};
use crate::store::{SessionStore, UserStore};

const MAX_USERNAME_ATTEMPTS: usize = 6;
const GENERATED_USERNAME_BASE_CHARS: usize = 18;

pub struct AuthService {
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
    verifier: Arc<dyn IdTokenVerifier>,
    clock: Arc<dyn Clock>,
    session_ttl: TimeDelta,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        verifier: Arc<dyn IdTokenVerifier>,
        clock: Arc<dyn Clock>,
        session_ttl: TimeDelta,
    ) -> Self {
        Self {
            users,
            sessions,
            verifier,
            clock,
            session_ttl,
        }
    }

    #[tracing::instrument(skip_all, fields(username = %req.username))]
    pub async fn register(&self, req: RegisterRequest) -> DomainResult<IssuedSession> {
        let req = RegisterRequest {
            email: req.email.trim().to_lowercase(),
            username: req.username.trim().to_owned(),
            display_name: req
                .display_name
                .map(|d| d.trim().to_owned())
                .filter(|d| !d.is_empty()),
            password: req.password,
        };
        req.validate()?;
        validate_password(&req.password)?;

        let password_hash = hash_password(&req.password)?;
        let user = self
            .users
            .create_user(NewUser {
                id: Uuid::now_v7(),
                email: req.email,
                username: req.username,
                display_name: req.display_name,
                password_hash: Some(password_hash),
                created_at: self.clock.now(),
            })
            .await?;

        info!(user_id = %user.id, "User registered");
        self.issue_session(user).await
    }

    #[tracing::instrument(skip_all)]
    pub async fn login(&self, req: LoginRequest) -> DomainResult<IssuedSession> {
        let login = req.login.trim();
        if login.is_empty() || req.password.is_empty() {
            return Err(DomainError::InvalidCredentials);
        }

        let user = self
            .users
            .find_by_login(login)
            .await?
            .ok_or(DomainError::InvalidCredentials)?;
        let stored = user
            .password_hash
            .as_deref()
            .ok_or(DomainError::InvalidCredentials)?;
        if !verify_password(&req.password, stored)? {
            return Err(DomainError::InvalidCredentials);
        }
        if user.is_disabled() {
            return Err(DomainError::UserDisabled);
        }

        self.touch_last_login(user.id).await;
        info!(user_id = %user.id, "User logged in");
        self.issue_session(user).await
    }

    /// Revokes the session behind a raw bearer token.
    pub async fn logout(&self, token: &str) -> DomainResult<()> {
        self.sessions.revoke(&hash_token(token)).await
    }

    /// Resolves a raw bearer token to its active, enabled user.
    pub async fn authenticate(&self, token: &str) -> DomainResult<User> {
        let session = self
            .sessions
            .find_active(&hash_token(token), self.clock.now())
            .await?
            .ok_or(DomainError::Unauthorized)?;
        let user = self
            .users
            .find_by_id(session.user_id)
            .await?
            .ok_or(DomainError::Unauthorized)?;
        if user.is_disabled() {
            return Err(DomainError::UserDisabled);
        }
        Ok(user)
    }

    /// Signs in with a provider ID token.
    ///
    /// A known link logs in; a known email gets the identity linked;
    /// anything else creates an account with a generated username.
    #[tracing::instrument(skip(self, id_token))]
    pub async fn login_external(
        &self,
        provider: IdentityProvider,
        id_token: &str,
    ) -> DomainResult<IssuedSession> {
        let claims = self.verifier.verify(provider, id_token).await?;
        let now = self.clock.now();

        let user = if let Some(user) = self.users.find_by_external(provider, &claims.subject).await? {
            user
        } else if let Some(user) = self.find_by_email(&claims).await? {
            self.users
                .link_external(user.id, provider, &claims.subject, now)
                .await?;
            info!(user_id = %user.id, provider = provider.as_str(), "External identity linked");
            user
        } else {
            let user = self.create_external_user(&claims).await?;
            self.users
                .link_external(user.id, provider, &claims.subject, now)
                .await?;
            info!(user_id = %user.id, provider = provider.as_str(), "User created from external identity");
            user
        };

        if user.is_disabled() {
            return Err(DomainError::UserDisabled);
        }
        self.touch_last_login(user.id).await;
        self.issue_session(user).await
    }

    async fn find_by_email(&self, claims: &ExternalClaims) -> DomainResult<Option<User>> {
        let Some(email) = claims.email.as_deref() else {
            return Ok(None);
        };
        Ok(self
            .users
            .find_by_login(email)
            .await?
            .filter(|u| u.email.eq_ignore_ascii_case(email)))
    }

    async fn create_external_user(&self, claims: &ExternalClaims) -> DomainResult<User> {
        let email = claims
            .email
            .clone()
            .ok_or_else(|| DomainError::validation("id_token", "email claim is required"))?;
        let base = username_base(&email);

        for attempt in 0..MAX_USERNAME_ATTEMPTS {
            let candidate = if attempt == 0 {
                base.clone()
            } else {
                format!("{base}_{}", rand::thread_rng().gen_range(10..10_000))
            };
            if self.users.username_exists(&candidate).await? {
                continue;
            }
            match self
                .users
                .create_user(NewUser {
                    id: Uuid::now_v7(),
                    email: email.clone(),
                    username: candidate,
                    display_name: None,
                    password_hash: None,
                    created_at: self.clock.now(),
                })
                .await
            {
                Err(DomainError::UsernameTaken) => continue,
                other => return other,
            }
        }
        Err(DomainError::Internal(
            "could not generate a unique username".into(),
        ))
    }

    async fn issue_session(&self, user: User) -> DomainResult<IssuedSession> {
        let token = generate_token();
        let now = self.clock.now();
        let expires_at = now + self.session_ttl;
        self.sessions
            .create_session(Session {
                id: Uuid::now_v7(),
                user_id: user.id,
                token_hash: hash_token(&token),
                expires_at,
                created_at: now,
            })
            .await?;
        Ok(IssuedSession {
            token,
            expires_at,
            user,
        })
    }

    async fn touch_last_login(&self, user_id: Uuid) {
        if let Err(e) = self.users.touch_last_login(user_id, self.clock.now()).await {
            warn!(user_id = %user_id, error = %e, "Failed to stamp last login");
        }
    }
}

/// Username seed from the email local part, padded to the minimum length.
fn username_base(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default();
    let mut base: String = local
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .take(GENERATED_USERNAME_BASE_CHARS)
        .collect();
    if base.len() < 3 {
        base = format!("player{base}");
    }
    base
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::clock::ManualClock;
    use crate::store::memory::MemoryStore;

    struct FakeVerifier;

    #[async_trait]
    impl IdTokenVerifier for FakeVerifier {
        /// Token format: `subject` or `subject|email`.
        async fn verify(
            &self,
            _provider: IdentityProvider,
            id_token: &str,
        ) -> DomainResult<ExternalClaims> {
            if id_token == "bad" {
                return Err(DomainError::InvalidCredentials);
            }
            let mut parts = id_token.splitn(2, '|');
            Ok(ExternalClaims {
                subject: parts.next().unwrap_or_default().to_string(),
                email: parts.next().map(str::to_string),
            })
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn setup() -> (Arc<MemoryStore>, Arc<ManualClock>, AuthService) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let service = AuthService::new(
            store.clone(),
            store.clone(),
            Arc::new(FakeVerifier),
            clock.clone(),
            TimeDelta::days(30),
        );
        (store, clock, service)
    }

    fn register_req(email: &str, username: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            username: username.into(),
            password: "hunter2hunter2".into(),
            display_name: None,
        }
    }

    #[tokio::test]
    async fn test_register_then_login_by_email_or_username() {
        let (_, _, service) = setup();
        let session = service
            .register(register_req(" Alice@Example.COM ", "alice"))
            .await
            .unwrap();
        assert_eq!(session.user.email, "alice@example.com");
        assert_eq!(session.expires_at, start() + TimeDelta::days(30));

        let by_email = service
            .login(LoginRequest {
                login: "ALICE@example.com".into(),
                password: "hunter2hunter2".into(),
            })
            .await
            .unwrap();
        assert_eq!(by_email.user.id, session.user.id);

        let by_username = service
            .login(LoginRequest {
                login: "alice".into(),
                password: "hunter2hunter2".into(),
            })
            .await
            .unwrap();
        assert_eq!(by_username.user.id, session.user.id);
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates_and_bad_input() {
        let (_, _, service) = setup();
        service
            .register(register_req("alice@example.com", "alice"))
            .await
            .unwrap();
        assert!(matches!(
            service.register(register_req("other@example.com", "alice")).await,
            Err(DomainError::UsernameTaken)
        ));
        assert!(matches!(
            service.register(register_req("ALICE@example.com", "alice2")).await,
            Err(DomainError::EmailTaken)
        ));
        assert!(matches!(
            service.register(register_req("bob@example.com", "b!")).await,
            Err(DomainError::Validation(f)) if f.contains_key("username")
        ));

        let mut short = register_req("bob@example.com", "bob");
        short.password = "short".into();
        assert!(matches!(
            service.register(short).await,
            Err(DomainError::Validation(f)) if f.contains_key("password")
        ));
    }

    #[tokio::test]
    async fn test_login_failures() {
        let (store, _, service) = setup();
        let session = service
            .register(register_req("alice@example.com", "alice"))
            .await
            .unwrap();

        assert!(matches!(
            service
                .login(LoginRequest {
                    login: "alice".into(),
                    password: "wrong-password".into(),
                })
                .await,
            Err(DomainError::InvalidCredentials)
        ));
        assert!(matches!(
            service
                .login(LoginRequest {
                    login: "nobody".into(),
                    password: "hunter2hunter2".into(),
                })
                .await,
            Err(DomainError::InvalidCredentials)
        ));

        store.disable_user(session.user.id);
        assert!(matches!(
            service
                .login(LoginRequest {
                    login: "alice".into(),
                    password: "hunter2hunter2".into(),
                })
                .await,
            Err(DomainError::UserDisabled)
        ));
    }

    #[tokio::test]
    async fn test_authenticate_and_logout() {
        let (store, clock, service) = setup();
        let session = service
            .register(register_req("alice@example.com", "alice"))
            .await
            .unwrap();

        let user = service.authenticate(&session.token).await.unwrap();
        assert_eq!(user.id, session.user.id);
        assert!(matches!(
            service.authenticate("garbage").await,
            Err(DomainError::Unauthorized)
        ));

        service.logout(&session.token).await.unwrap();
        assert!(matches!(
            service.authenticate(&session.token).await,
            Err(DomainError::Unauthorized)
        ));
        assert_eq!(store.session_count(), 0);

        let second = service
            .login(LoginRequest {
                login: "alice".into(),
                password: "hunter2hunter2".into(),
            })
            .await
            .unwrap();
        clock.advance(TimeDelta::days(31));
        assert!(matches!(
            service.authenticate(&second.token).await,
            Err(DomainError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_disabled_user_cannot_authenticate() {
        let (store, _, service) = setup();
        let session = service
            .register(register_req("alice@example.com", "alice"))
            .await
            .unwrap();
        store.disable_user(session.user.id);
        assert!(matches!(
            service.authenticate(&session.token).await,
            Err(DomainError::UserDisabled)
        ));
    }

    #[tokio::test]
    async fn test_external_login_creates_then_reuses_account() {
        let (_, _, service) = setup();
        let first = service
            .login_external(IdentityProvider::Google, "sub-1|new.player@example.com")
            .await
            .unwrap();
        assert_eq!(first.user.username, "newplayer");
        assert!(first.user.password_hash.is_none());

        let again = service
            .login_external(IdentityProvider::Google, "sub-1")
            .await
            .unwrap();
        assert_eq!(again.user.id, first.user.id);
    }

    #[tokio::test]
    async fn test_external_login_links_existing_email() {
        let (_, _, service) = setup();
        let local = service
            .register(register_req("alice@example.com", "alice"))
            .await
            .unwrap();

        let linked = service
            .login_external(IdentityProvider::Apple, "apple-sub|alice@example.com")
            .await
            .unwrap();
        assert_eq!(linked.user.id, local.user.id);

        // A second Apple identity cannot claim the same account.
        assert!(matches!(
            service
                .login_external(IdentityProvider::Apple, "other-sub|alice@example.com")
                .await,
            Err(DomainError::ExternalAccountExists)
        ));
    }

    #[tokio::test]
    async fn test_external_login_generates_unique_username() {
        let (_, _, service) = setup();
        service
            .register(register_req("someone@example.com", "alice"))
            .await
            .unwrap();
        let created = service
            .login_external(IdentityProvider::Google, "g-2|alice@elsewhere.test")
            .await
            .unwrap();
        assert!(created.user.username.starts_with("alice_"));
    }

    #[tokio::test]
    async fn test_external_login_errors() {
        let (_, _, service) = setup();
        assert!(matches!(
            service.login_external(IdentityProvider::Google, "bad").await,
            Err(DomainError::InvalidCredentials)
        ));
        assert!(matches!(
            service.login_external(IdentityProvider::Google, "no-email").await,
            Err(DomainError::Validation(f)) if f.contains_key("id_token")
        ));
    }

    #[test]
    fn test_username_base() {
        assert_eq!(username_base("j.doe+tag@example.com"), "jdoetag");
        assert_eq!(username_base("x@example.com"), "playerx");
        assert_eq!(username_base(&format!("{}@e.com", "a".repeat(40))).len(), 18);
    }
}
