//! FCM HTTP v1 client.
//!
//! Authenticates as a service account: a self-signed RS256 assertion is
//! exchanged for an OAuth2 access token, cached until shortly before expiry.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{PushError, PushOutcome, PushSender};
use crate::db::{Platform, UserSummary};

const FCM_API_URL_TEMPLATE: &str =
    "https://fcm.googleapis.com/v1/projects/{project_id}/messages:send";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";

/// Access tokens are refreshed this long before they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Service account key file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountCredentials {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FcmMessage {
    pub message: FcmMessageBody,
}

#[derive(Debug, Serialize)]
pub struct FcmMessageBody {
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<FcmNotification>,
    pub data: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub android: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apns: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct FcmNotification {
    pub title: String,
    pub body: String,
}

/// Friend request push for one device.
///
/// Android gets a data-only, high priority message so the app renders it;
/// iOS gets an alert.
pub fn friend_request_message(
    device_token: &str,
    platform: Platform,
    requester: &UserSummary,
) -> FcmMessage {
    let name = requester
        .display_name
        .clone()
        .unwrap_or_else(|| requester.username.clone());
    let title = "New friend request".to_string();
    let body = format!("{name} wants to be your friend");

    let mut data = BTreeMap::new();
    data.insert("type".to_string(), "friend_request".to_string());
    data.insert("requester_id".to_string(), requester.id.to_string());
    data.insert("requester_username".to_string(), requester.username.clone());

    let message = match platform {
        Platform::Android => {
            data.insert("title".to_string(), title);
            data.insert("body".to_string(), body);
            FcmMessageBody {
                token: device_token.to_string(),
                notification: None,
                data,
                android: Some(serde_json::json!({ "priority": "high" })),
                apns: None,
            }
        }
        Platform::Ios => FcmMessageBody {
            token: device_token.to_string(),
            notification: Some(FcmNotification { title, body }),
            data,
            android: None,
            apns: Some(serde_json::json!({ "payload": { "aps": { "sound": "default" } } })),
        },
    };
    FcmMessage { message }
}

/// `true` when an FCM error body reports the token as gone.
pub fn is_unregistered(status: u16, body: &str) -> bool {
    if status == 404 {
        return true;
    }
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["details"].as_array().cloned())
        .is_some_and(|details| {
            details
                .iter()
                .any(|d| d["errorCode"].as_str() == Some("UNREGISTERED"))
        })
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

pub struct FcmSender {
    http: reqwest::Client,
    credentials: ServiceAccountCredentials,
    key: EncodingKey,
    api_url: String,
    access_token: Mutex<Option<(String, Instant)>>,
}

impl FcmSender {
    /// Loads the service account key file for `project_id`.
    pub fn from_credentials_file(project_id: &str, path: &Path) -> Result<Self, PushError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PushError::Credentials(format!("failed to read {}: {e}", path.display()))
        })?;
        let credentials: ServiceAccountCredentials = serde_json::from_str(&content)
            .map_err(|e| PushError::Credentials(format!("failed to parse credentials: {e}")))?;
        Self::new(project_id, credentials)
    }

    pub fn new(project_id: &str, credentials: ServiceAccountCredentials) -> Result<Self, PushError> {
        let key = EncodingKey::from_rsa_pem(credentials.private_key.as_bytes())
            .map_err(|e| PushError::Credentials(format!("invalid private key: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        debug!(project_id, "FCM sender initialized");
        Ok(Self {
            http,
            credentials,
            key,
            api_url: FCM_API_URL_TEMPLATE.replace("{project_id}", project_id),
            access_token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, PushError> {
        let mut cached = self.access_token.lock().await;
        if let Some((token, expires)) = cached.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < *expires {
                return Ok(token.clone());
            }
        }

        let token_uri = self
            .credentials
            .token_uri
            .as_deref()
            .unwrap_or(DEFAULT_TOKEN_URI);
        let iat = chrono::Utc::now().timestamp();
        let assertion = encode(
            &Header::new(Algorithm::RS256),
            &AssertionClaims {
                iss: &self.credentials.client_email,
                scope: FCM_SCOPE,
                aud: token_uri,
                iat,
                exp: iat + 3600,
            },
            &self.key,
        )
        .map_err(|e| PushError::Credentials(format!("failed to sign assertion: {e}")))?;

        let response = self
            .http
            .post(token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PushError::Api {
                status: status.as_u16(),
                body,
            });
        }
        let token: TokenResponse = response.json().await?;
        *cached = Some((
            token.access_token.clone(),
            Instant::now() + Duration::from_secs(token.expires_in),
        ));
        Ok(token.access_token)
    }
}

#[async_trait]
impl PushSender for FcmSender {
    async fn send(&self, message: &FcmMessage) -> Result<PushOutcome, PushError> {
        let access_token = self.access_token().await?;
        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(access_token)
            .json(message)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(PushOutcome::Delivered);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read body>".to_string());
        if is_unregistered(status.as_u16(), &body) {
            return Ok(PushOutcome::Unregistered);
        }
        warn!(status = status.as_u16(), body = %body, "FCM API returned error");
        Err(PushError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn requester() -> UserSummary {
        UserSummary {
            id: Uuid::nil(),
            username: "alice".into(),
            display_name: Some("Alice".into()),
            avatar_path: None,
            avatar_updated_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_android_message_is_data_only() {
        let msg = friend_request_message("tok", Platform::Android, &requester());
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json["message"].get("notification").is_none());
        assert_eq!(json["message"]["data"]["type"], "friend_request");
        assert_eq!(json["message"]["data"]["body"], "Alice wants to be your friend");
        assert_eq!(json["message"]["android"]["priority"], "high");
    }

    #[test]
    fn test_ios_message_has_alert() {
        let msg = friend_request_message("tok", Platform::Ios, &requester());
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["message"]["token"], "tok");
        assert_eq!(json["message"]["notification"]["title"], "New friend request");
        assert_eq!(json["message"]["data"]["requester_username"], "alice");
        assert_eq!(json["message"]["apns"]["payload"]["aps"]["sound"], "default");
    }

    #[test]
    fn test_is_unregistered() {
        let body = r#"{"error":{"code":400,"status":"INVALID_ARGUMENT","details":[
            {"@type":"type.googleapis.com/google.firebase.fcm.v1.FcmError","errorCode":"UNREGISTERED"}]}}"#;
        assert!(is_unregistered(400, body));
        assert!(is_unregistered(404, ""));
        assert!(!is_unregistered(500, r#"{"error":{"details":[{"errorCode":"INTERNAL"}]}}"#));
        assert!(!is_unregistered(400, "not json"));
    }

    #[test]
    fn test_missing_credentials_file() {
        let err = FcmSender::from_credentials_file("p", Path::new("/nonexistent/fcm.json"))
            .err()
            .unwrap();
        assert!(matches!(err, PushError::Credentials(_)));
    }

    #[test]
    fn test_invalid_private_key() {
        let err = FcmSender::new(
            "p",
            ServiceAccountCredentials {
                client_email: "svc@p.iam.gserviceaccount.com".into(),
                private_key: "not a pem".into(),
                token_uri: None,
            },
        )
        .err()
        .unwrap();
        assert!(matches!(err, PushError::Credentials(_)));
    }
}
