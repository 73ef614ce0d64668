//! Authenticated caller, as resolved by the request authenticator.

use crate::{
    api::error::ApiError,
    session::session_key,
    token::IdentityClaim,
};
use axum::extract::Extension;

/// Identity of the caller for the current request. Inserted into request
/// extensions by the authenticator after the token verified and the session
/// was renewed.
#[derive(Clone, Debug)]
pub struct Principal {
    pub claim: IdentityClaim,
    pub session_key: String,
}

impl Principal {
    #[must_use]
    pub fn new(claim: IdentityClaim) -> Self {
        let session_key = session_key(&claim.id);
        Self { claim, session_key }
    }
}

/// Anonymous callers are rejected with `SESSION_INVALIDATED`.
///
/// # Errors
/// Returns `ApiError::SessionInvalidated` when no principal was resolved.
pub fn require_auth(principal: Option<Extension<Principal>>) -> Result<Principal, ApiError> {
    principal
        .map(|Extension(principal)| principal)
        .ok_or(ApiError::SessionInvalidated)
}
