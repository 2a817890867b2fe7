//! Remote API client
//!
//! The backend owns users, roles and token issuance. The auth layer talks to
//! it through the `AuthApi` trait; `HttpAuthApi` is the reqwest implementation.
//!
//! Endpoints (relative to the configured base URL):
//! - POST /accounts/login          {email}
//! - POST /accounts/verify-otp     {email, otp} -> {tokens, user}
//! - POST /events/accept-invite    {token} -> {tokens, user}
//! - POST /accounts/token/refresh  {refresh} -> {access, refresh}
//! - GET  /accounts/me             -> user
//! - GET  /accounts/roles          -> [{name, ...}]

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

use crate::config::ApiConfig;
use crate::models::{RoleRecord, SessionPayload, TokenPair, User};

/// Error types for remote API calls
#[derive(Debug, thiserror::Error)]
pub enum ApiClientError {
    /// The request never produced a response
    #[error("Network error: {0}")]
    Network(String),

    /// The backend answered with a non-success status
    #[error("Request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    /// The response body did not have the expected shape
    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl ApiClientError {
    /// Message suitable for showing to the user
    pub fn user_message(&self) -> String {
        match self {
            Self::Network(_) => "Unable to reach the server. Check your connection and try again.".to_string(),
            Self::Status { message, .. } if !message.is_empty() => message.clone(),
            Self::Status { status, .. } if *status == 401 || *status == 403 => {
                "Your session is no longer valid. Please sign in again.".to_string()
            }
            Self::Status { .. } | Self::Decode(_) => {
                "Something went wrong. Please try again.".to_string()
            }
        }
    }
}

impl From<reqwest::Error> for ApiClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// Acknowledgement of a login request (the OTP has been sent)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginChallenge {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Backend operations the auth layer depends on
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Start the passwordless email flow
    async fn request_login(&self, email: &str) -> Result<LoginChallenge, ApiClientError>;

    /// Finish the passwordless flow with the emailed code
    async fn verify_otp(&self, email: &str, otp: &str) -> Result<SessionPayload, ApiClientError>;

    /// Accept an event-team invitation, which also signs the user in
    async fn accept_invite(&self, invite_token: &str) -> Result<SessionPayload, ApiClientError>;

    /// Exchange a refresh token for a new pair
    async fn refresh_tokens(&self, refresh: &str) -> Result<TokenPair, ApiClientError>;

    /// Profile of the token's owner
    async fn current_user(&self, access: &str) -> Result<User, ApiClientError>;

    /// Roles of the token's owner
    async fn list_roles(&self, access: &str) -> Result<Vec<RoleRecord>, ApiClientError>;
}

/// `AuthApi` over HTTP
#[derive(Debug, Clone)]
pub struct HttpAuthApi {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct EmailBody<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct OtpBody<'a> {
    email: &'a str,
    otp: &'a str,
}

#[derive(Serialize)]
struct InviteBody<'a> {
    token: &'a str,
}

#[derive(Serialize)]
struct RefreshBody<'a> {
    refresh: &'a str,
}

/// Refresh responses may omit the refresh token when it is not rotated
#[derive(Deserialize)]
struct RefreshResponse {
    access: String,
    #[serde(default)]
    refresh: Option<String>,
}

impl HttpAuthApi {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("stagepass/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiClientError> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        Self::read(response).await
    }

    async fn get_authorized<T: DeserializeOwned>(
        &self,
        path: &str,
        access: &str,
    ) -> Result<T, ApiClientError> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(access)
            .send()
            .await?;
        Self::read(response).await
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiClientError> {
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| ApiClientError::Decode(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        Err(ApiClientError::Status {
            status: status.as_u16(),
            message: error_message(status, &body),
        })
    }
}

/// Pull a human readable message out of an error body.
///
/// The backend answers with `{"message": ..}`, `{"detail": ..}` or
/// `{"error": ..}` depending on the view.
fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["message", "detail", "error"] {
            if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
    }
    status.canonical_reason().unwrap_or_default().to_string()
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn request_login(&self, email: &str) -> Result<LoginChallenge, ApiClientError> {
        self.post("/accounts/login", &EmailBody { email }).await
    }

    async fn verify_otp(&self, email: &str, otp: &str) -> Result<SessionPayload, ApiClientError> {
        self.post("/accounts/verify-otp", &OtpBody { email, otp }).await
    }

    async fn accept_invite(&self, invite_token: &str) -> Result<SessionPayload, ApiClientError> {
        self.post("/events/accept-invite", &InviteBody { token: invite_token })
            .await
    }

    async fn refresh_tokens(&self, refresh: &str) -> Result<TokenPair, ApiClientError> {
        let response: RefreshResponse = self
            .post("/accounts/token/refresh", &RefreshBody { refresh })
            .await?;
        Ok(TokenPair {
            access: response.access,
            refresh: response.refresh.unwrap_or_else(|| refresh.to_string()),
        })
    }

    async fn current_user(&self, access: &str) -> Result<User, ApiClientError> {
        self.get_authorized("/accounts/me", access).await
    }

    async fn list_roles(&self, access: &str) -> Result<Vec<RoleRecord>, ApiClientError> {
        self.get_authorized("/accounts/roles", access).await
    }
}
