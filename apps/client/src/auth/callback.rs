//! Callback Handler — glue between the provider redirect and the session.
//!
//! A redirect carries either an error, nothing, or a one-time authorization
//! code. The code is consumed exactly once: the handler records it as
//! attempted *before* the exchange is awaited, so re-presenting the same
//! redirect (back-navigation, a re-rendered view) can never redeem it twice.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Url;
use tracing::warn;

use crate::auth::provider::IdentityProvider;
use crate::auth::session::SessionManager;
use crate::auth::tokens::Identity;

/// How long the success state stays visible before the forward navigation.
pub const SUCCESS_REDIRECT_DELAY: Duration = Duration::from_millis(500);

/// Query parameters of the redirect callback, extracted once per page load.
#[derive(Debug, Clone, Default)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    pub fn from_redirect_url(url: &Url) -> Self {
        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            let value = value.into_owned();
            match key.as_ref() {
                "code" => params.code = Some(value),
                "state" => params.state = Some(value),
                "error" => params.error = Some(value),
                "error_description" => params.error_description = Some(value),
                _ => {}
            }
        }
        params
    }
}

/// Terminal outcome of one callback presentation.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    /// Exchange and login succeeded; navigate forward after
    /// [`SUCCESS_REDIRECT_DELAY`].
    SignedIn(Identity),
    /// Terminal error; show a path back to re-initiate login.
    Failed(String),
}

pub struct CallbackHandler {
    session: Arc<SessionManager>,
    provider: Arc<dyn IdentityProvider>,
    /// Codes already handed to the provider, including in-flight ones.
    attempted: Mutex<HashSet<String>>,
}

impl CallbackHandler {
    pub fn new(session: Arc<SessionManager>, provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            session,
            provider,
            attempted: Mutex::new(HashSet::new()),
        }
    }

    pub async fn handle(&self, params: CallbackParams) -> CallbackOutcome {
        if let Some(error) = params.error {
            let message = params.error_description.unwrap_or(error);
            return CallbackOutcome::Failed(message);
        }

        let Some(code) = params.code else {
            return CallbackOutcome::Failed(
                "No authorization code received. Please try signing in again.".into(),
            );
        };

        // Claim the code before suspending: a second presentation of the same
        // code, even while this exchange is still in flight, must not issue
        // another exchange.
        if !self.attempted.lock().unwrap().insert(code.clone()) {
            return CallbackOutcome::Failed(
                "This sign-in link was already used. Please sign in again.".into(),
            );
        }

        let tokens = match self.provider.exchange_code(&code).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!("Token exchange failed: {e}");
                return CallbackOutcome::Failed(
                    "Failed to complete authentication. Please try again.".into(),
                );
            }
        };

        match self.session.login(tokens) {
            Ok(identity) => CallbackOutcome::SignedIn(identity),
            Err(e) => {
                warn!("Login after exchange failed: {e}");
                CallbackOutcome::Failed(
                    "Failed to complete authentication. Please try again.".into(),
                )
            }
        }
    }
}
