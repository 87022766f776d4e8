//! Stateless signed access tokens.
//!
//! Wire format: `<base64url(JSON payload)>.<hex(HMAC-SHA256(base64 payload))>`.
//! Nothing is stored server side; a token is valid while its signature checks
//! out and `expiresAt` has not passed.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token signing secret: {0}")]
    Secret(String),
    #[error("failed to encode token payload: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenPayload {
    /// Storage-relative document path.
    pub path: String,
    pub session_id: String,
    /// Unix seconds.
    pub expires_at: i64,
}

impl AccessTokenPayload {
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.expires_at, 0).single()
    }
}

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub payload: AccessTokenPayload,
}

#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
    ttl: Duration,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(secret: impl AsRef<[u8]>, ttl: Duration) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            ttl,
        }
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|e| TokenError::Secret(e.to_string()))
    }

    pub fn issue(&self, path: &str, session_id: &str) -> Result<AccessToken, TokenError> {
        self.issue_at(path, session_id, Utc::now(), self.ttl)
    }

    pub fn issue_at(
        &self,
        path: &str,
        session_id: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<AccessToken, TokenError> {
        let payload = AccessTokenPayload {
            path: path.to_string(),
            session_id: session_id.to_string(),
            expires_at: now
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
                .timestamp(),
        };

        let encoded = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload)?);
        let mut mac = self.mac()?;
        mac.update(encoded.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(AccessToken {
            token: format!("{}.{}", encoded, signature),
            payload,
        })
    }

    pub fn validate(&self, token: &str) -> Option<AccessTokenPayload> {
        self.validate_at(token, Utc::now())
    }

    /// `None` on any failure. The reason is logged at debug level only.
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Option<AccessTokenPayload> {
        let parts: Vec<&str> = token.split('.').collect();
        let [encoded, signature] = parts.as_slice() else {
            log::debug!("Rejected access token: malformed");
            return None;
        };

        let signature = hex::decode(signature).ok()?;
        let mut mac = self.mac().ok()?;
        mac.update(encoded.as_bytes());
        if mac.verify_slice(&signature).is_err() {
            log::debug!("Rejected access token: bad signature");
            return None;
        }

        let raw = URL_SAFE_NO_PAD.decode(encoded).ok()?;
        let payload: AccessTokenPayload = serde_json::from_slice(&raw).ok()?;

        if payload.expires_at < now.timestamp() {
            log::debug!("Rejected access token for session {}: expired", payload.session_id);
            return None;
        }

        Some(payload)
    }
}
