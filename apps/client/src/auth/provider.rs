//! Identity Provider Client — Cognito hosted-UI URL construction plus the
//! authorization-code exchange and silent refresh against the token endpoint.
//!
//! The exchange is deliberately single-shot: an authorization code is
//! one-time-use, so a blind retry can never succeed and may redeem a stale
//! code against the wrong session.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Url};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::auth::tokens::{TokenResponse, TokenSet};

/// Scopes requested from the hosted UI.
const SCOPES: &str = "openid email profile";

const HTTP_TIMEOUT_SECS: u64 = 30;

/// Whether the redirect should land the user on the sign-in or sign-up screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AuthIntent {
    SignIn,
    SignUp,
}

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("token exchange could not reach the provider: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider rejected the authorization code (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("provider returned a malformed token response: {0}")]
    Malformed(reqwest::Error),
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("token refresh could not reach the provider: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider rejected the refresh token (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("provider returned a malformed token response: {0}")]
    Malformed(reqwest::Error),
}

/// The network seam between the session layer and the identity provider,
/// cut as a trait so session and callback logic is testable with a scripted
/// provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Trades a one-time authorization code for a token set. Exactly one
    /// network call; the caller must not retry on failure.
    async fn exchange_code(&self, code: &str) -> Result<TokenSet, ExchangeError>;

    /// Trades a refresh token for a fresh token set.
    async fn refresh_tokens(&self, refresh_token: &str) -> Result<TokenSet, RefreshError>;
}

/// Static provider configuration, carved out of [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub client_id: String,
    pub redirect_uri: String,
}

#[derive(Serialize)]
struct ExchangeForm<'a> {
    grant_type: &'a str,
    client_id: &'a str,
    code: &'a str,
    redirect_uri: &'a str,
}

#[derive(Serialize)]
struct RefreshForm<'a> {
    grant_type: &'a str,
    client_id: &'a str,
    refresh_token: &'a str,
}

/// HTTP client for the Cognito hosted UI and token endpoint.
pub struct CognitoClient {
    http: Client,
    domain: Url,
    config: ProviderConfig,
}

impl CognitoClient {
    pub fn new(domain: &str, config: ProviderConfig) -> anyhow::Result<Self> {
        let domain = Url::parse(domain)?;
        Ok(Self {
            http: Client::builder()
                .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
                .build()?,
            domain,
            config,
        })
    }

    /// Builds the hosted-UI redirect URL. Pure: no network or state access.
    /// The sign-up variant adds the fixed `screen_hint=signup` flag.
    pub fn authorization_url(&self, intent: AuthIntent) -> Url {
        let mut url = self.domain.clone();
        url.set_path("/oauth2/authorize");
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", &self.config.redirect_uri)
                .append_pair("scope", SCOPES);
            if intent == AuthIntent::SignUp {
                query.append_pair("screen_hint", "signup");
            }
        }
        url
    }

    fn token_endpoint(&self) -> Url {
        let mut url = self.domain.clone();
        url.set_path("/oauth2/token");
        url
    }
}

#[async_trait]
impl IdentityProvider for CognitoClient {
    async fn exchange_code(&self, code: &str) -> Result<TokenSet, ExchangeError> {
        let response = self
            .http
            .post(self.token_endpoint())
            .form(&ExchangeForm {
                grant_type: "authorization_code",
                client_id: &self.config.client_id,
                code,
                redirect_uri: &self.config.redirect_uri,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ExchangeError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body: TokenResponse = response.json().await.map_err(ExchangeError::Malformed)?;
        debug!("Authorization code exchanged (expires_in={}s)", body.expires_in);
        Ok(body.into_token_set(Utc::now()))
    }

    async fn refresh_tokens(&self, refresh_token: &str) -> Result<TokenSet, RefreshError> {
        let response = self
            .http
            .post(self.token_endpoint())
            .form(&RefreshForm {
                grant_type: "refresh_token",
                client_id: &self.config.client_id,
                refresh_token,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body: TokenResponse = response.json().await.map_err(RefreshError::Malformed)?;
        let mut tokens = body.into_token_set(Utc::now());
        // The refresh grant omits the refresh token; keep using the current one.
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token.to_string());
        }
        debug!("Token set refreshed");
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> CognitoClient {
        CognitoClient::new(
            "https://auth.example.com",
            ProviderConfig {
                client_id: "client-1".into(),
                redirect_uri: "http://localhost:3000/callback".into(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_authorization_url_sign_in() {
        let url = client().authorization_url(AuthIntent::SignIn);

        assert_eq!(url.host_str(), Some("auth.example.com"));
        assert_eq!(url.path(), "/oauth2/authorize");

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("response_type".into(), "code".into())));
        assert!(pairs.contains(&("client_id".into(), "client-1".into())));
        assert!(pairs.contains(&(
            "redirect_uri".into(),
            "http://localhost:3000/callback".into()
        )));
        assert!(pairs.contains(&("scope".into(), "openid email profile".into())));
        assert!(!pairs.iter().any(|(k, _)| k == "screen_hint"));
    }

    #[test]
    fn test_authorization_url_sign_up_adds_flag() {
        let url = client().authorization_url(AuthIntent::SignUp);
        assert!(url
            .query_pairs()
            .any(|(k, v)| k == "screen_hint" && v == "signup"));
    }
}
