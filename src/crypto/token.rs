//! Sealed, self-expiring bearer tokens.
//!
//! A token is `v1.local.` followed by the URL-safe base64 (no padding) encoding
//! of `nonce || ciphertext || tag`. The ciphertext is the JSON claim set sealed
//! with AES-256-GCM; the `v1.local.` header is bound as associated data so it
//! cannot be swapped.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::crypto::aes::{self, NONCE_SIZE, SecureKey, TAG_SIZE};

/// Header shared by every token this codec emits.
pub const TOKEN_HEADER: &str = "v1.local.";

/// Errors raised while issuing or verifying a token.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// The claims could not be serialized or sealed.
    #[error("token encoding failed: {0}")]
    Encoding(String),

    /// The authentication tag did not match (forged or tampered token).
    #[error("token signature is invalid")]
    InvalidSignature,

    /// The current time lies outside `[not_before, expires_at)`.
    #[error("token has expired")]
    Expired,

    /// The token is not shaped like one of ours.
    #[error("token is malformed: {0}")]
    Malformed(String),
}

/// The claim set carried inside a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    /// Identifier shared by an access/refresh pair and their login session.
    pub token_id: Uuid,
    /// The user the token was issued to.
    pub user_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub not_before: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TokenPayload {
    /// Creates a payload with a fresh `token_id` for `user_id`.
    ///
    /// The timestamps are placeholders; [`TokenCodec::issue`] stamps them.
    pub fn new(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            token_id: Uuid::new_v4(),
            user_id,
            issued_at: now,
            not_before: now,
            expires_at: now,
        }
    }

    /// Whether `now` falls inside the payload's validity window.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now && now < self.expires_at
    }
}

/// A freshly sealed token together with the claims it carries.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub payload: TokenPayload,
}

/// Issues and verifies tokens under a single symmetric key.
///
/// The key is fixed for the lifetime of the codec; share the codec behind an
/// `Arc` for concurrent use.
#[derive(Clone)]
pub struct TokenCodec {
    key: SecureKey,
}

impl TokenCodec {
    pub fn new(key: SecureKey) -> Self {
        Self { key }
    }

    /// Seals `payload` with a validity window of `ttl` starting now.
    pub fn issue(&self, payload: &TokenPayload, ttl: Duration) -> Result<IssuedToken, TokenError> {
        self.issue_at(payload, ttl, Utc::now())
    }

    /// Same as [`issue`](Self::issue) with an explicit clock.
    pub fn issue_at(
        &self,
        payload: &TokenPayload,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        if ttl <= Duration::zero() {
            return Err(TokenError::Encoding("ttl must be positive".to_string()));
        }

        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| TokenError::Encoding("ttl overflows the clock".to_string()))?;

        let stamped = TokenPayload {
            issued_at: now,
            not_before: now,
            expires_at,
            ..payload.clone()
        };

        let claims = sonic_rs::to_vec(&stamped)
            .map_err(|e| TokenError::Encoding(format!("claims serialization failed: {}", e)))?;

        let (ciphertext, nonce) = aes::encrypt(&self.key, &claims, TOKEN_HEADER.as_bytes())
            .map_err(|e| TokenError::Encoding(e.to_string()))?;

        let mut body = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        body.extend_from_slice(&nonce);
        body.extend_from_slice(&ciphertext);

        Ok(IssuedToken {
            token: format!("{}{}", TOKEN_HEADER, URL_SAFE_NO_PAD.encode(body)),
            payload: stamped,
        })
    }

    /// Opens `token` and checks its validity window against the current time.
    pub fn verify(&self, token: &str) -> Result<TokenPayload, TokenError> {
        self.verify_at(token, Utc::now())
    }

    /// Same as [`verify`](Self::verify) with an explicit clock.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<TokenPayload, TokenError> {
        let encoded = token
            .strip_prefix(TOKEN_HEADER)
            .ok_or_else(|| TokenError::Malformed("unknown token header".to_string()))?;

        let body = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| TokenError::Malformed(format!("invalid encoding: {}", e)))?;

        if body.len() < NONCE_SIZE + TAG_SIZE {
            return Err(TokenError::Malformed("token is too short".to_string()));
        }

        let (nonce, ciphertext) = body.split_at(NONCE_SIZE);
        let nonce: [u8; NONCE_SIZE] = nonce
            .try_into()
            .map_err(|_| TokenError::Malformed("invalid nonce".to_string()))?;

        let claims = aes::decrypt(&self.key, ciphertext, &nonce, TOKEN_HEADER.as_bytes())
            .map_err(|_| TokenError::InvalidSignature)?;

        let payload: TokenPayload = sonic_rs::from_slice(&claims)
            .map_err(|e| TokenError::Malformed(format!("invalid claims: {}", e)))?;

        if !payload.is_valid_at(now) {
            return Err(TokenError::Expired);
        }

        Ok(payload)
    }
}
