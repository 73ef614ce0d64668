//! Session establishment shared by every login path (password, OAuth, magic link).

use super::{cookies, state::AuthState, utils};
use crate::{
    api::{
        email::{self, templates},
        error::ApiError,
    },
    identity::User,
    session::session_key,
    token::IdentityClaim,
};
use axum::http::HeaderMap;
use tracing::{info, instrument, warn};

/// Install the user's session and mint the access token.
///
/// The session entry is installed with an atomic set-if-absent: if the user
/// already holds a live session the attempt is rejected before anything is
/// mutated and a security notice is mailed to the account owner. Store failures
/// and timeouts fail closed.
///
/// # Errors
/// `ConcurrentSessionDenied`, `SessionUnavailable`, or `Internal`.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub(crate) async fn establish_session(
    state: &AuthState,
    user: &User,
    client_ip: Option<&str>,
) -> Result<(HeaderMap, IdentityClaim), ApiError> {
    let key = session_key(&user.id);
    let ttl = state.config().access_token_ttl();

    if !state.sessions().install_exclusive(&key, &user.id, ttl).await? {
        warn!(client_ip = client_ip.unwrap_or("unknown"), "concurrent login denied");
        email::dispatch(
            state.email_sender(),
            templates::login_threat(&user.email, client_ip, &utils::now_rfc3339()),
        );
        return Err(ApiError::ConcurrentSessionDenied);
    }

    let claim = IdentityClaim::from(user);
    let issued = state
        .tokens()
        .issue(&claim, ttl)
        .map_err(|err| ApiError::Internal(err.into()))
        .and_then(|token| {
            cookies::session_cookies(state.config(), &token, &key)
                .map_err(|err| ApiError::Internal(err.into()))
        });

    match issued {
        Ok(headers) => {
            info!("session established");
            Ok((headers, claim))
        }
        Err(err) => {
            // Do not leave a session nobody holds a token for.
            if let Err(remove_err) = state.sessions().remove(&key).await {
                warn!("failed to roll back session: {remove_err}");
            }
            Err(err)
        }
    }
}
