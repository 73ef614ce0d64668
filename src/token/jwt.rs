//! Compact HS256 JWT codec.
//!
//! `base64url(header).base64url(payload).base64url(HMAC-SHA256(header.payload))`
//! with header `{"alg":"HS256","typ":"JWT","kid":...}`. The payload is the claim
//! flattened together with `iat` and `exp` (unix seconds).

use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const ALG_HS256: &str = "HS256";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenHeader {
    pub alg: String,
    pub typ: String,
    pub kid: String,
}

impl TokenHeader {
    fn hs256(kid: impl Into<String>) -> Self {
        Self {
            alg: ALG_HS256.to_string(),
            typ: "JWT".to_string(),
            kid: kid.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    #[serde(flatten)]
    claims: T,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("unknown key id: {0}")]
    UnknownKid(String),
    #[error("invalid signing key")]
    Key,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("token issued for another purpose")]
    WrongPurpose,
}

/// A single HMAC secret and its derived key id.
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    secret: SecretString,
}

impl SigningKey {
    /// The `kid` is the first 8 bytes of `SHA-256(secret)`, base64url encoded, so
    /// it identifies the key without revealing it.
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        let digest = Sha256::digest(secret.expose_secret().as_bytes());
        let kid = Base64UrlUnpadded::encode_string(&digest[..8]);
        Self { kid, secret }
    }

    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| TokenError::Key)
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

/// One active signing key plus previous keys still accepted for verification.
#[derive(Debug, Clone)]
pub struct KeyRing {
    active: SigningKey,
    previous: Vec<SigningKey>,
}

impl KeyRing {
    #[must_use]
    pub fn new(active: SecretString) -> Self {
        Self {
            active: SigningKey::new(active),
            previous: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_previous(mut self, secrets: Vec<SecretString>) -> Self {
        self.previous = secrets
            .into_iter()
            .map(SigningKey::new)
            .filter(|key| key.kid != self.active.kid)
            .collect();
        self
    }

    #[must_use]
    pub fn active(&self) -> &SigningKey {
        &self.active
    }

    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&SigningKey> {
        std::iter::once(&self.active)
            .chain(self.previous.iter())
            .find(|key| key.kid == kid)
    }
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: DeserializeOwned>(s: &str) -> Result<T, TokenError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| TokenError::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Sign `claims` with the active key of `ring`, embedding `iat = now` and
/// `exp = now + ttl_seconds`.
///
/// # Errors
///
/// Returns an error if the header or claims cannot be encoded.
pub fn sign_hs256<T: Serialize>(
    ring: &KeyRing,
    claims: &T,
    now_unix_seconds: i64,
    ttl_seconds: i64,
) -> Result<String, TokenError> {
    let key = ring.active();
    let header_b64 = b64e_json(&TokenHeader::hs256(key.kid()))?;
    let claims_b64 = b64e_json(&Envelope {
        claims,
        iat: now_unix_seconds,
        exp: now_unix_seconds.saturating_add(ttl_seconds),
    })?;
    let signing_input = format!("{header_b64}.{claims_b64}");

    let mut mac = key.mac()?;
    mac.update(signing_input.as_bytes());
    let signature_b64 = Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes());

    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Verify an HS256 token against `ring` and return its claims without `iat`/`exp`.
///
/// # Errors
///
/// Returns an error if:
/// - the token is malformed or contains invalid base64/json,
/// - the algorithm is not HS256 or the `kid` is not in the ring,
/// - the signature does not match,
/// - `exp` is not after `now_unix_seconds`.
pub fn verify_hs256<T: DeserializeOwned>(
    token: &str,
    ring: &KeyRing,
    now_unix_seconds: i64,
) -> Result<T, TokenError> {
    let mut parts = token.split('.');
    let header_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
    let claims_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
    let sig_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
    if parts.next().is_some() {
        return Err(TokenError::TokenFormat);
    }

    let header: TokenHeader = b64d_json(header_b64)?;
    if header.alg != ALG_HS256 {
        return Err(TokenError::UnsupportedAlg(header.alg));
    }

    let key = ring
        .find(&header.kid)
        .ok_or_else(|| TokenError::UnknownKid(header.kid.clone()))?;

    let signature = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| TokenError::Base64)?;
    let mut mac = key.mac()?;
    mac.update(header_b64.as_bytes());
    mac.update(b".");
    mac.update(claims_b64.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| TokenError::InvalidSignature)?;

    let envelope: Envelope<T> = b64d_json(claims_b64)?;
    if envelope.exp <= now_unix_seconds {
        return Err(TokenError::Expired);
    }

    Ok(envelope.claims)
}
