//! Token set and identity claims — the data half of the auth stack.
//!
//! The id token is decoded client-side for display only; the backend
//! validates signatures against the Cognito JWKS before trusting anything.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Leeway applied when checking expiry, so a token about to lapse mid-flight
/// is already treated as expired.
const EXPIRY_LEEWAY_SECS: i64 = 30;

/// The bundle returned by a successful code exchange or refresh.
/// Owned exclusively by the session manager; persisted via the token store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub id_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl TokenSet {
    /// True once `now` is within the leeway window of `expires_at` or past it.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_LEEWAY_SECS) >= self.expires_at
    }
}

/// Wire shape of the provider's token endpoint response.
/// Refresh responses omit `refresh_token`; the caller carries the old one forward.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub id_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

impl TokenResponse {
    /// Anchors the relative `expires_in` at the receipt instant.
    pub fn into_token_set(self, received_at: DateTime<Utc>) -> TokenSet {
        TokenSet {
            access_token: self.access_token,
            id_token: self.id_token,
            refresh_token: self.refresh_token,
            expires_at: received_at + Duration::seconds(self.expires_in),
        }
    }
}

/// Read-only projection of the id token claims. Everything but `subject`
/// is optional; decoding must tolerate any of them missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub subject: String,
    pub email: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub nickname: Option<String>,
    pub birthdate: Option<String>,
}

impl Identity {
    /// Best display name available: nickname, then "given family", then email,
    /// then the bare subject id.
    pub fn display_name(&self) -> String {
        if let Some(nick) = &self.nickname {
            return nick.clone();
        }
        match (&self.given_name, &self.family_name) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            _ => self
                .email
                .clone()
                .unwrap_or_else(|| self.subject.clone()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("id token is not a three-part JWT")]
    MalformedToken,

    #[error("claims payload is not valid base64url: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("claims payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("claims payload is missing the 'sub' claim")]
    MissingSubject,
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    sub: Option<String>,
    email: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
    nickname: Option<String>,
    birthdate: Option<String>,
}

/// Decodes the claims segment of an id token into an [`Identity`].
///
/// Pure and total over optional claims: only a structurally malformed token
/// or a missing subject fails. The signature segment is ignored.
pub fn decode_identity(id_token: &str) -> Result<Identity, ClaimError> {
    let mut parts = id_token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_header), Some(payload), Some(_sig), None) => payload,
        _ => return Err(ClaimError::MalformedToken),
    };

    let bytes = URL_SAFE_NO_PAD.decode(payload)?;
    let claims: RawClaims = serde_json::from_slice(&bytes)?;

    let subject = claims.sub.ok_or(ClaimError::MissingSubject)?;

    Ok(Identity {
        subject,
        email: claims.email,
        given_name: claims.given_name,
        family_name: claims.family_name,
        nickname: claims.nickname,
        birthdate: claims.birthdate,
    })
}
