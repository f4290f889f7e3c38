use std::path::PathBuf;

use anyhow::{Context, Result};

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Cognito hosted-UI domain, e.g. https://auth.resumeai.example.com
    pub cognito_domain: String,
    pub cognito_client_id: String,
    pub redirect_uri: String,
    /// ResumeAI backend base URL.
    pub api_url: String,
    /// Where the token-set record lives. Defaults to ~/.resumeai/tokens.json.
    pub token_file: PathBuf,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            cognito_domain: require_env("COGNITO_DOMAIN")?,
            cognito_client_id: require_env("COGNITO_CLIENT_ID")?,
            redirect_uri: require_env("OAUTH_REDIRECT_URI")?,
            api_url: require_env("API_URL")?,
            token_file: match std::env::var("TOKEN_FILE") {
                Ok(path) => PathBuf::from(path),
                Err(_) => default_token_file(),
            },
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn default_token_file() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".resumeai").join("tokens.json"),
        Err(_) => PathBuf::from(".resumeai-tokens.json"),
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}
