//! OAuth sign-up-or-login.
//!
//! Flow Overview:
//! 1) `GET /oauth/{provider}` stores a random state in the `oauth_state` cookie
//!    and redirects to the provider consent page.
//! 2) `GET /oauth/{provider}/callback` checks the state, exchanges the code for
//!    the provider profile and reconciles it with local users:
//!    - unknown email: a verified user is registered with the provider account;
//!    - known email: the provider account is linked when missing and the
//!      provider avatar is adopted when the user has none.
//! 3) The session is installed exactly like a password login.
//!
//! Concurrent callbacks for the same email converge: a registration that loses
//! the unique-email race falls back to linking, and a link that loses the
//! one-account-per-provider race is treated as already done.

use super::{
    cookies::{self, OAUTH_STATE_COOKIE},
    login::establish_session,
    state::AuthState,
    types::{CallbackQuery, SigninResponse},
    utils,
};
use crate::{
    api::{
        email::{self, templates},
        error::{ApiError, ErrorBody},
    },
    identity::{IdentityError, Provider, Registration, User},
    oauth::{IdentityProvider, ProviderProfile},
};
use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Resolve a configured provider from its path tag.
pub(crate) fn configured_provider(
    state: &AuthState,
    tag: &str,
) -> Result<(Provider, Arc<dyn IdentityProvider>), ApiError> {
    let provider = Provider::parse(tag)
        .filter(|provider| provider.is_oauth())
        .ok_or_else(|| ApiError::UnknownProvider(tag.to_string()))?;
    let client = state
        .providers()
        .get(provider)
        .ok_or_else(|| ApiError::UnknownProvider(tag.to_string()))?;
    Ok((provider, client))
}

/// Redirect to the provider with a fresh CSRF state cookie.
pub(crate) fn redirect_to_provider(
    state: &AuthState,
    client: &dyn IdentityProvider,
    callback_path: &str,
) -> Result<Response, ApiError> {
    let csrf = utils::generate_oauth_state();
    let redirect_uri = format!("{}{callback_path}", state.config().public_base_url());
    let url = client.authorize_url(&redirect_uri, &csrf)?;
    let cookie = cookies::oauth_state_cookie(state.config(), &csrf)
        .map_err(|err| ApiError::Internal(err.into()))?;
    Ok(([(SET_COOKIE, cookie)], Redirect::to(url.as_str())).into_response())
}

/// Check the callback state against the cookie, then exchange the code.
pub(crate) async fn exchange_callback(
    state: &AuthState,
    client: &dyn IdentityProvider,
    callback_path: &str,
    headers: &HeaderMap,
    query: CallbackQuery,
) -> Result<ProviderProfile, ApiError> {
    if let Some(error) = query.error {
        return Err(ApiError::BadRequest(format!("Provider declined: {error}")));
    }
    let expected = cookies::cookie_value(headers, OAUTH_STATE_COOKIE);
    match (expected, query.state) {
        (Some(expected), Some(received)) if expected == received => {}
        _ => return Err(ApiError::InvalidState),
    }
    let code = query
        .code
        .ok_or_else(|| ApiError::BadRequest("Missing authorization code".to_string()))?;

    let redirect_uri = format!("{}{callback_path}", state.config().public_base_url());
    Ok(client.exchange(&code, &redirect_uri).await?)
}

#[utoipa::path(
    get,
    path = "/oauth/{provider}",
    params(("provider" = String, Path, description = "google or discord")),
    responses(
        (status = 303, description = "Redirect to the provider consent page"),
        (status = 404, description = "Provider not configured", body = ErrorBody)
    ),
    tag = "oauth"
)]
pub async fn authorize(
    Extension(state): Extension<Arc<AuthState>>,
    Path(tag): Path<String>,
) -> Result<Response, ApiError> {
    let (provider, client) = configured_provider(&state, &tag)?;
    redirect_to_provider(&state, client.as_ref(), &format!("/oauth/{provider}/callback"))
}

#[utoipa::path(
    get,
    path = "/oauth/{provider}/callback",
    params(
        ("provider" = String, Path, description = "google or discord"),
        CallbackQuery
    ),
    responses(
        (status = 200, description = "Signed in, access_token and session_id cookies set", body = SigninResponse),
        (status = 400, description = "State mismatch or provider declined", body = ErrorBody),
        (status = 401, description = "Account already signed in elsewhere", body = ErrorBody),
        (status = 502, description = "Provider exchange failed", body = ErrorBody)
    ),
    tag = "oauth"
)]
#[instrument(skip(state, headers, query))]
pub async fn callback(
    Extension(state): Extension<Arc<AuthState>>,
    Path(tag): Path<String>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (provider, client) = configured_provider(&state, &tag)?;
    let callback_path = format!("/oauth/{provider}/callback");
    let profile =
        exchange_callback(&state, client.as_ref(), &callback_path, &headers, query).await?;

    let user = reconcile(&state, provider, profile).await?;

    let client_ip = utils::extract_client_ip(&headers);
    let (mut cookies, claim) = establish_session(&state, &user, client_ip.as_deref()).await?;
    if let Ok(clear) = cookies::clear_cookie(state.config(), OAUTH_STATE_COOKIE) {
        cookies.append(SET_COOKIE, clear);
    }
    Ok((StatusCode::OK, cookies, Json(SigninResponse::new(claim))))
}

/// Map a provider profile onto a local user, creating or linking as needed.
async fn reconcile(
    state: &AuthState,
    provider: Provider,
    profile: ProviderProfile,
) -> Result<User, ApiError> {
    let identity = state.identity();

    if identity.find_user_by_email(&profile.email).await?.is_none() {
        let registration =
            Registration::oauth(&profile.email, provider, profile.provider_id.clone())
                .with_image_url(profile.image_url.clone());
        match identity.register(registration).await {
            Ok(user) => {
                info!(user_id = %user.id, %provider, "user signed up through provider");
                email::dispatch(state.email_sender(), templates::welcome(&user.email));
                return Ok(user);
            }
            // Another callback registered the same email first.
            Err(IdentityError::EmailTaken) => {}
            Err(err) => return Err(err.into()),
        }
    }

    let user = identity
        .find_user_by_email(&profile.email)
        .await?
        .ok_or(ApiError::NotFound("user"))?;

    if identity.find_account(user.id, provider).await?.is_none() {
        match identity
            .link(user.id, provider, Some(profile.provider_id.clone()), None)
            .await
        {
            Ok(_) | Err(IdentityError::AlreadyLinked) => {}
            Err(err) => return Err(err.into()),
        }
    }

    if let Some(image_url) = profile.image_url.as_deref() {
        if let Err(err) = identity.adopt_avatar(user.id, image_url).await {
            warn!(user_id = %user.id, "failed to adopt provider avatar: {err}");
        }
    }

    // The provider vouched for the email.
    if !user.is_verified {
        match identity.mark_verified(user.id).await {
            Ok(_) | Err(IdentityError::AlreadyVerified) => {}
            Err(err) => return Err(err.into()),
        }
    }

    identity
        .find_user_by_id(user.id)
        .await?
        .ok_or(ApiError::NotFound("user"))
}
