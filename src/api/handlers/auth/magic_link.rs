//! Passwordless sign-in through a mailed, single-purpose link.

use super::{
    login::establish_session,
    state::AuthState,
    types::{EmailRequest, MessageResponse, SigninResponse, TokenQuery},
    utils,
};
use crate::{
    api::{
        email::{self, templates},
        error::{ApiError, ErrorBody},
    },
    identity::IdentityError,
    token::LinkPurpose,
};
use axum::{
    Json,
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::{debug, instrument};

const LINK_REQUESTED: &str = "If the email is registered, a sign-in link is on its way";

#[utoipa::path(
    post,
    path = "/auth/magic-link",
    request_body = EmailRequest,
    responses(
        (status = 200, description = "Sign-in link sent when the email is registered", body = MessageResponse)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn request_magic_link(
    Extension(state): Extension<Arc<AuthState>>,
    Json(request): Json<EmailRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Some(user) = state.identity().find_user_by_email(&request.email).await? else {
        debug!("magic link requested for unknown email");
        return Ok(Json(MessageResponse::new(LINK_REQUESTED)));
    };

    let token = state
        .tokens()
        .issue_link(user.id, LinkPurpose::MagicLink, state.config().magic_link_ttl())
        .map_err(|err| ApiError::Internal(err.into()))?;
    let link = utils::build_link(state.config().public_base_url(), "/auth/magic-login", &token);
    let message = templates::magic_link(&user.email, &link, state.config().magic_link_ttl());
    email::dispatch(state.email_sender(), message);

    Ok(Json(MessageResponse::new(LINK_REQUESTED)))
}

#[utoipa::path(
    get,
    path = "/auth/magic-login",
    params(TokenQuery),
    responses(
        (status = 200, description = "Signed in, access_token and session_id cookies set", body = SigninResponse),
        (status = 401, description = "Invalid link or account already signed in elsewhere", body = ErrorBody)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn magic_login(
    Extension(state): Extension<Arc<AuthState>>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = state
        .tokens()
        .verify_link(&query.token, LinkPurpose::MagicLink)?;
    let Some(mut user) = state.identity().find_user_by_id(user_id).await? else {
        return Err(ApiError::InvalidToken);
    };

    // Following the link proves ownership of the mailbox.
    if !user.is_verified {
        match state.identity().mark_verified(user_id).await {
            Ok(verified) => user = verified,
            Err(IdentityError::AlreadyVerified) => user.is_verified = true,
            Err(err) => return Err(err.into()),
        }
    }

    let client_ip = utils::extract_client_ip(&headers);
    let (cookies, claim) = establish_session(&state, &user, client_ip.as_deref()).await?;
    Ok((StatusCode::OK, cookies, Json(SigninResponse::new(claim))))
}
