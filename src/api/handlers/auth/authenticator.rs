//! Request authenticator with sliding renewal.
//!
//! Flow Overview:
//! 1) No `access_token` cookie: the caller is anonymous and the request continues.
//! 2) Token verifies: a replacement token with a fresh expiry is minted, the
//!    session entry is re-installed with the same TTL, the caller becomes a
//!    [`Principal`] and both cookies are set on the response.
//! 3) Token fails: the token cookie is cleared and the request is rejected with
//!    `INVALID_TOKEN`. Bad credentials are never downgraded to anonymous.
//! 4) Session store fails during renewal: `SESSION_UNAVAILABLE`, cookies untouched.

use super::{
    cookies::{self, ACCESS_TOKEN_COOKIE, SESSION_ID_COOKIE},
    principal::Principal,
    state::AuthState,
};
use crate::{api::error::ApiError, token::IdentityClaim};
use axum::{
    extract::{Extension, Request},
    http::{HeaderMap, header::SET_COOKIE},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, warn};

pub async fn authenticate(
    Extension(state): Extension<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = cookies::cookie_value(request.headers(), ACCESS_TOKEN_COOKIE) else {
        return next.run(request).await;
    };

    let claim: IdentityClaim = match state.tokens().verify(&token) {
        Ok(claim) => claim,
        Err(err) => {
            debug!("rejecting access token: {err}");
            let mut response = ApiError::from(err).into_response();
            if let Ok(clear) = cookies::clear_cookie(state.config(), ACCESS_TOKEN_COOKIE) {
                response.headers_mut().append(SET_COOKIE, clear);
            }
            return response;
        }
    };

    // Store failures leave the cookie in place.
    let (principal, renewed) = match renew(&state, claim).await {
        Ok(renewed) => renewed,
        Err(err) => return err.into_response(),
    };

    let session_key = principal.session_key.clone();
    request.extensions_mut().insert(principal);
    let mut response = next.run(request).await;

    // Handlers that set or clear the session cookies themselves win.
    if sets_session_cookie(response.headers()) {
        return response;
    }
    match cookies::session_cookies(state.config(), &renewed, &session_key) {
        Ok(headers) => {
            for value in headers.get_all(SET_COOKIE) {
                response.headers_mut().append(SET_COOKIE, value.clone());
            }
        }
        Err(err) => warn!("failed to build renewed session cookies: {err}"),
    }
    response
}

async fn renew(state: &AuthState, claim: IdentityClaim) -> Result<(Principal, String), ApiError> {
    let ttl = state.config().access_token_ttl();
    let renewed = state
        .tokens()
        .issue(&claim, ttl)
        .map_err(|err| ApiError::Internal(err.into()))?;

    let principal = Principal::new(claim);
    state
        .sessions()
        .refresh(&principal.session_key, &principal.claim.id, ttl)
        .await?;
    debug!(user_id = %principal.claim.id, "session renewed");
    Ok((principal, renewed))
}

fn sets_session_cookie(headers: &HeaderMap) -> bool {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .filter_map(|pair| pair.split_once('=').map(|(name, _)| name.trim()))
        .any(|name| name == ACCESS_TOKEN_COOKIE || name == SESSION_ID_COOKIE)
}
