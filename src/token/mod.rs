//! Token service: issues and verifies short-lived signed claims.

pub mod claims;
pub mod jwt;

pub use claims::{IdentityClaim, LinkClaim, LinkPurpose};
pub use jwt::{KeyRing, TokenError};

use serde::{Serialize, de::DeserializeOwned};
use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use uuid::Uuid;

#[must_use]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

fn ttl_seconds(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)
}

#[derive(Debug, Clone)]
pub struct TokenService {
    keys: Arc<KeyRing>,
}

impl TokenService {
    #[must_use]
    pub fn new(keys: KeyRing) -> Self {
        Self {
            keys: Arc::new(keys),
        }
    }

    /// # Errors
    /// Returns an error if the claims cannot be encoded.
    pub fn issue<T: Serialize>(&self, claims: &T, ttl: Duration) -> Result<String, TokenError> {
        self.issue_at(claims, ttl, unix_now())
    }

    /// # Errors
    /// Returns an error if the claims cannot be encoded.
    pub fn issue_at<T: Serialize>(
        &self,
        claims: &T,
        ttl: Duration,
        now_unix_seconds: i64,
    ) -> Result<String, TokenError> {
        jwt::sign_hs256(&self.keys, claims, now_unix_seconds, ttl_seconds(ttl))
    }

    /// # Errors
    /// Returns an error if the signature does not match, the payload is malformed
    /// or the token has expired.
    pub fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<T, TokenError> {
        self.verify_at(token, unix_now())
    }

    /// # Errors
    /// Same as [`TokenService::verify`], evaluated at `now_unix_seconds`.
    pub fn verify_at<T: DeserializeOwned>(
        &self,
        token: &str,
        now_unix_seconds: i64,
    ) -> Result<T, TokenError> {
        jwt::verify_hs256(token, &self.keys, now_unix_seconds)
    }

    /// # Errors
    /// Returns an error if the claims cannot be encoded.
    pub fn issue_link(
        &self,
        user_id: Uuid,
        purpose: LinkPurpose,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let claim = LinkClaim {
            id: user_id,
            purpose,
        };
        self.issue(&claim, ttl)
    }

    /// Verify a mailed link and return the user it was issued for. A link issued
    /// for one purpose is never accepted for another.
    ///
    /// # Errors
    /// Returns an error if the token is invalid or carries another purpose.
    pub fn verify_link(&self, token: &str, purpose: LinkPurpose) -> Result<Uuid, TokenError> {
        let claim: LinkClaim = self.verify(token)?;
        if claim.purpose != purpose {
            return Err(TokenError::WrongPurpose);
        }
        Ok(claim.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::models::Role;
    use secrecy::SecretString;

    fn service() -> TokenService {
        TokenService::new(KeyRing::new(SecretString::from("test-secret".to_string())))
    }

    fn claim() -> IdentityClaim {
        IdentityClaim {
            id: Uuid::new_v4(),
            email: "user@x.com".to_string(),
            role: Role::Mentor,
            image_url: Some("https://cdn.example/avatar.png".to_string()),
        }
    }

    #[test]
    fn identity_claim_round_trip_within_ttl() -> Result<(), TokenError> {
        let tokens = service();
        let claim = claim();
        let now = 1_700_000_000;
        let token = tokens.issue_at(&claim, Duration::from_secs(300), now)?;

        let decoded: IdentityClaim = tokens.verify_at(&token, now + 299)?;
        assert_eq!(decoded, claim);

        assert!(matches!(
            tokens.verify_at::<IdentityClaim>(&token, now + 300),
            Err(TokenError::Expired)
        ));
        Ok(())
    }

    #[test]
    fn identity_claim_wire_names() -> Result<(), TokenError> {
        let value = serde_json::to_value(claim())?;
        assert!(value.get("imageUrl").is_some());
        assert_eq!(value["role"], "mentor");
        Ok(())
    }

    #[test]
    fn link_purpose_is_enforced() -> Result<(), TokenError> {
        let tokens = service();
        let user_id = Uuid::new_v4();
        let token =
            tokens.issue_link(user_id, LinkPurpose::PasswordReset, Duration::from_secs(3600))?;

        assert_eq!(
            tokens.verify_link(&token, LinkPurpose::PasswordReset)?,
            user_id
        );
        assert!(matches!(
            tokens.verify_link(&token, LinkPurpose::MagicLink),
            Err(TokenError::WrongPurpose)
        ));
        Ok(())
    }

    #[test]
    fn access_token_is_not_a_link() -> Result<(), TokenError> {
        let tokens = service();
        let token = tokens.issue(&claim(), Duration::from_secs(300))?;
        assert!(tokens.verify_link(&token, LinkPurpose::MagicLink).is_err());
        Ok(())
    }
}
