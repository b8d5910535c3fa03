//! Stateless session tokens.
//!
//! Format: `base64url(json(claims)) + "." + hex(hmac_sha256(secret, base64url_part))`.
//! Nothing is stored server-side; expiry is the only way a token stops working.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::config::{ConfigError, PLACEHOLDER_SECRET, TOKEN_TTL_SECS};

type HmacSha256 = Hmac<Sha256>;

/// Claims carried inside a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub max_age_secs: i64,
}

/// Why a token was refused. Callers treat every variant as "no identity".
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,

    #[error("token signature does not match")]
    BadSignature,

    #[error("token payload could not be decoded")]
    BadPayload,

    #[error("token expired")]
    Expired,
}

/// Signs and verifies session tokens with a server-held secret.
#[derive(Clone)]
pub struct TokenCodec {
    secret: Vec<u8>,
    ttl_secs: i64,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Fails closed in production when the secret is empty or the known placeholder.
    pub fn new(secret: &str, production: bool) -> Result<Self, ConfigError> {
        if production && (secret.is_empty() || secret == PLACEHOLDER_SECRET) {
            return Err(ConfigError::WeakSecret);
        }
        Ok(Self {
            secret: secret.as_bytes().to_vec(),
            ttl_secs: TOKEN_TTL_SECS,
        })
    }

    pub fn issue(&self, user_id: &str) -> IssuedToken {
        self.issue_at(user_id, Utc::now().timestamp())
    }

    pub fn issue_at(&self, user_id: &str, now: i64) -> IssuedToken {
        let claims = SessionClaims {
            user_id: user_id.to_string(),
            iat: now,
            exp: now + self.ttl_secs,
        };
        // Serializing a struct of a string and two integers cannot fail.
        let json = serde_json::to_vec(&claims).unwrap_or_default();
        let body = URL_SAFE_NO_PAD.encode(json);
        let signature = hex::encode(self.mac(body.as_bytes()).finalize().into_bytes());

        IssuedToken {
            token: format!("{body}.{signature}"),
            max_age_secs: self.ttl_secs,
        }
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims, TokenError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    pub fn verify_at(&self, token: &str, now: i64) -> Result<SessionClaims, TokenError> {
        let (body, signature) = token.split_once('.').ok_or(TokenError::Malformed)?;
        if body.is_empty() || signature.is_empty() {
            return Err(TokenError::Malformed);
        }

        let provided = hex::decode(signature).map_err(|_| TokenError::Malformed)?;

        // Constant-time comparison via `verify_slice`
        self.mac(body.as_bytes())
            .verify_slice(&provided)
            .map_err(|_| TokenError::BadSignature)?;

        let json = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| TokenError::BadPayload)?;
        let claims: SessionClaims =
            serde_json::from_slice(&json).map_err(|_| TokenError::BadPayload)?;
        if claims.user_id.is_empty() {
            return Err(TokenError::BadPayload);
        }

        if now > claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    fn mac(&self, data: &[u8]) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(data);
        mac
    }
}
