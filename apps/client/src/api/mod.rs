//! Authenticated API client — every backend call goes through here so the
//! bearer header is attached in exactly one place.

use std::sync::Arc;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::auth::session::SessionManager;

const HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ApiError {
    /// No session token to attach; the caller should route through login.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The backend could not be reached at all. Transient by definition:
    /// pollers retry these, they are never a backend verdict.
    #[error("could not reach backend: {0}")]
    Transport(reqwest::Error),

    /// The backend replied with a non-success status.
    #[error("backend error (status {status}): {message}")]
    Status { status: u16, message: String },

    #[error("backend returned a malformed response: {0}")]
    Malformed(reqwest::Error),
}

/// Bearer-attaching HTTP client over the ResumeAI backend.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    session: Arc<SessionManager>,
}

impl ApiClient {
    pub fn new(base_url: String, session: Arc<SessionManager>) -> Self {
        Self {
            http: Client::builder()
                .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
                .build()
                .expect("Failed to build HTTP client"),
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let token = self.bearer()?;
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(ApiError::Transport)?;
        Self::decode(response).await
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let token = self.bearer()?;
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(ApiError::Transport)?;
        Self::decode(response).await
    }

    fn bearer(&self) -> Result<String, ApiError> {
        self.session.access_token().ok_or(ApiError::NotAuthenticated)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }
        response.json().await.map_err(ApiError::Malformed)
    }
}
