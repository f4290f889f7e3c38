//! Session Manager — the single owner of process-wide authentication state.
//!
//! State machine: `Uninitialized → Loading → {Authenticated, Unauthenticated}`,
//! then `Authenticated ⇄ Unauthenticated` via login/logout. Dependents observe
//! the state through a watch channel; every publish happens synchronously with
//! the store write that triggered it.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::auth::provider::IdentityProvider;
use crate::auth::store::{StoreError, TokenStore};
use crate::auth::tokens::{decode_identity, ClaimError, Identity, TokenSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Uninitialized,
    Loading,
    Authenticated,
    Unauthenticated,
}

/// What dependents see: the status plus the derived identity.
/// `identity` is `Some` iff `status == Authenticated`.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub identity: Option<Identity>,
}

/// Signal returned by the route guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthGate {
    /// Initialization has not resolved yet; render nothing.
    Wait,
    /// Resolved unauthenticated; send the user to login.
    RedirectToLogin,
    /// Authenticated; render protected content.
    Proceed,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("could not derive identity from id token: {0}")]
    Claims(#[from] ClaimError),

    #[error("could not persist token set: {0}")]
    Store(#[from] StoreError),
}

pub struct SessionManager {
    store: Arc<dyn TokenStore>,
    provider: Arc<dyn IdentityProvider>,
    /// Owned exclusively here; mutated only by initialize/login/logout.
    tokens: Mutex<Option<TokenSet>>,
    state: watch::Sender<SessionSnapshot>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn TokenStore>, provider: Arc<dyn IdentityProvider>) -> Self {
        let (state, _) = watch::channel(SessionSnapshot {
            status: SessionStatus::Uninitialized,
            identity: None,
        });
        Self {
            store,
            provider,
            tokens: Mutex::new(None),
            state,
        }
    }

    /// Resolves the persisted session, if any. Must complete before any
    /// protected surface renders; until then dependents observe `Loading`.
    ///
    /// Every failure path is recovered into `Unauthenticated` — a broken
    /// store record or a failed refresh forces re-login, never a crash.
    pub async fn initialize(&self) {
        self.publish(SessionStatus::Loading, None, None);

        let persisted = match self.store.load() {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!("Token store unreadable, treating as signed out: {e}");
                let _ = self.store.clear();
                None
            }
        };

        let Some(tokens) = persisted else {
            self.publish(SessionStatus::Unauthenticated, None, None);
            return;
        };

        if !tokens.is_expired(Utc::now()) {
            self.adopt(tokens);
            return;
        }

        // Expired on disk: attempt a silent refresh, else force re-login.
        let Some(refresh_token) = tokens.refresh_token.clone() else {
            info!("Persisted token set expired with no refresh token");
            self.clear_to_unauthenticated();
            return;
        };

        match self.provider.refresh_tokens(&refresh_token).await {
            Ok(fresh) if !fresh.is_expired(Utc::now()) => {
                if let Err(e) = self.store.save(&fresh) {
                    warn!("Could not persist refreshed token set: {e}");
                }
                self.adopt(fresh);
            }
            Ok(_) => {
                warn!("Refresh returned an already-expired token set");
                self.clear_to_unauthenticated();
            }
            Err(e) => {
                warn!("Silent token refresh failed, forcing re-login: {e}");
                self.clear_to_unauthenticated();
            }
        }
    }

    /// Installs a token set obtained from the identity provider. Persists
    /// before publishing so no subscriber can observe a session the store
    /// does not hold. Replacing an existing session is an idempotent
    /// overwrite, not an error.
    pub fn login(&self, tokens: TokenSet) -> Result<Identity, SessionError> {
        let identity = decode_identity(&tokens.id_token)?;
        self.store.save(&tokens)?;

        self.publish(
            SessionStatus::Authenticated,
            Some(identity.clone()),
            Some(tokens),
        );
        info!("Signed in as {}", identity.subject);
        Ok(identity)
    }

    /// Tears the session down. Safe to call from any state, including
    /// `Uninitialized`; store failures are logged, not propagated.
    pub fn logout(&self) {
        if let Err(e) = self.store.clear() {
            warn!("Could not clear token store on logout: {e}");
        }
        self.publish(SessionStatus::Unauthenticated, None, None);
        info!("Signed out");
    }

    /// Route guard. Never signals `Proceed` before [`Self::initialize`]
    /// has resolved.
    pub fn guard(&self) -> AuthGate {
        match self.state.borrow().status {
            SessionStatus::Uninitialized | SessionStatus::Loading => AuthGate::Wait,
            SessionStatus::Unauthenticated => AuthGate::RedirectToLogin,
            SessionStatus::Authenticated => AuthGate::Proceed,
        }
    }

    /// Like [`Self::guard`], but waits out `Uninitialized`/`Loading` so the
    /// caller can block first paint on resolution.
    pub async fn resolved_guard(&self) -> AuthGate {
        let mut rx = self.subscribe();
        loop {
            match self.guard() {
                AuthGate::Wait => {}
                resolved => return resolved,
            }
            if rx.changed().await.is_err() {
                return AuthGate::Wait;
            }
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    /// The authenticated-request capability: the bearer token, if signed in.
    pub fn access_token(&self) -> Option<String> {
        self.tokens
            .lock()
            .unwrap()
            .as_ref()
            .map(|t| t.access_token.clone())
    }

    fn adopt(&self, tokens: TokenSet) {
        match decode_identity(&tokens.id_token) {
            Ok(identity) => {
                info!("Session restored for {}", identity.subject);
                self.publish(SessionStatus::Authenticated, Some(identity), Some(tokens));
            }
            Err(e) => {
                warn!("Persisted id token undecodable, forcing re-login: {e}");
                self.clear_to_unauthenticated();
            }
        }
    }

    fn clear_to_unauthenticated(&self) {
        if let Err(e) = self.store.clear() {
            warn!("Could not clear token store: {e}");
        }
        self.publish(SessionStatus::Unauthenticated, None, None);
    }

    /// Single point of state mutation: swaps the held tokens and notifies
    /// subscribers in the same call.
    fn publish(
        &self,
        status: SessionStatus,
        identity: Option<Identity>,
        tokens: Option<TokenSet>,
    ) {
        *self.tokens.lock().unwrap() = tokens;
        self.state.send_replace(SessionSnapshot { status, identity });
    }
}
