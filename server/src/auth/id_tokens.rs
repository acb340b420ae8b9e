//! Google / Apple ID token verification against the providers' JWKS.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, jwk::JwkSet, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::db::IdentityProvider;
use crate::error::{DomainError, DomainResult};

const GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const GOOGLE_ISSUERS: &[&str] = &["accounts.google.com", "https://accounts.google.com"];
const APPLE_JWKS_URL: &str = "https://appleid.apple.com/auth/keys";
const APPLE_ISSUERS: &[&str] = &["https://appleid.apple.com"];

/// How long fetched keys are trusted before re-fetching.
const JWKS_TTL: Duration = Duration::from_secs(60 * 60);

/// Identity asserted by a verified ID token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalClaims {
    pub subject: String,
    /// Lower-cased; absent when the provider withheld it.
    pub email: Option<String>,
}

#[async_trait]
pub trait IdTokenVerifier: Send + Sync {
    async fn verify(&self, provider: IdentityProvider, id_token: &str)
        -> DomainResult<ExternalClaims>;
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
}

struct ProviderKeys {
    jwks_url: &'static str,
    issuers: &'static [&'static str],
    audience: Option<String>,
    label: &'static str,
    cached: RwLock<Option<(Instant, JwkSet)>>,
}

impl ProviderKeys {
    fn new(
        jwks_url: &'static str,
        issuers: &'static [&'static str],
        audience: Option<String>,
        label: &'static str,
    ) -> Self {
        Self {
            jwks_url,
            issuers,
            audience: audience.filter(|a| !a.trim().is_empty()),
            label,
            cached: RwLock::new(None),
        }
    }
}

/// Verifies RS256 ID tokens with keys fetched over HTTPS and cached.
pub struct JwksVerifier {
    http: reqwest::Client,
    google: ProviderKeys,
    apple: ProviderKeys,
}

impl JwksVerifier {
    pub fn new(google_client_id: Option<String>, apple_service_id: Option<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            google: ProviderKeys::new(GOOGLE_JWKS_URL, GOOGLE_ISSUERS, google_client_id, "google login"),
            apple: ProviderKeys::new(APPLE_JWKS_URL, APPLE_ISSUERS, apple_service_id, "apple login"),
        }
    }

    const fn keys(&self, provider: IdentityProvider) -> &ProviderKeys {
        match provider {
            IdentityProvider::Google => &self.google,
            IdentityProvider::Apple => &self.apple,
        }
    }

    async fn key_set(&self, keys: &ProviderKeys, force: bool) -> DomainResult<JwkSet> {
        if !force {
            if let Some((fetched, set)) = keys.cached.read().await.as_ref() {
                if fetched.elapsed() < JWKS_TTL {
                    return Ok(set.clone());
                }
            }
        }

        debug!(url = keys.jwks_url, "Fetching JWKS");
        let set: JwkSet = self
            .http
            .get(keys.jwks_url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| DomainError::Internal(format!("jwks fetch failed: {e}")))?
            .json()
            .await
            .map_err(|e| DomainError::Internal(format!("jwks decode failed: {e}")))?;

        *keys.cached.write().await = Some((Instant::now(), set.clone()));
        Ok(set)
    }
}

#[async_trait]
impl IdTokenVerifier for JwksVerifier {
    async fn verify(
        &self,
        provider: IdentityProvider,
        id_token: &str,
    ) -> DomainResult<ExternalClaims> {
        let keys = self.keys(provider);
        let audience = keys
            .audience
            .as_deref()
            .ok_or(DomainError::NotConfigured(keys.label))?;

        let header = decode_header(id_token.trim()).map_err(|_| DomainError::InvalidCredentials)?;
        let kid = header.kid.ok_or(DomainError::InvalidCredentials)?;

        let mut set = self.key_set(keys, false).await?;
        if set.find(&kid).is_none() {
            // Keys rotate; refresh once before giving up.
            set = self.key_set(keys, true).await?;
        }
        let jwk = set.find(&kid).ok_or(DomainError::InvalidCredentials)?;
        let key = DecodingKey::from_jwk(jwk).map_err(|_| DomainError::InvalidCredentials)?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[audience]);
        validation.set_issuer(keys.issuers);

        let claims = decode::<RawClaims>(id_token.trim(), &key, &validation)
            .map_err(|e| {
                warn!(provider = provider.as_str(), error = %e, "ID token rejected");
                DomainError::InvalidCredentials
            })?
            .claims;

        let subject = claims.sub.trim().to_string();
        if subject.is_empty() {
            return Err(DomainError::InvalidCredentials);
        }
        Ok(ExternalClaims {
            subject,
            email: claims
                .email
                .map(|e| e.trim().to_lowercase())
                .filter(|e| !e.is_empty()),
        })
    }
}
