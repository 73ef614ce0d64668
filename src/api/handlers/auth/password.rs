//! Password reset.
//!
//! Requesting a reset answers the same way whether or not the email belongs to
//! a user. Completing it overwrites the local credential, or creates the local
//! account for users that only signed in through OAuth so far.

use super::{
    state::AuthState,
    types::{EmailRequest, MessageResponse, PasswordResetRequest},
    utils,
};
use crate::{
    api::{
        email::{self, templates},
        error::{ApiError, ErrorBody},
    },
    token::LinkPurpose,
};
use axum::{Json, extract::Extension};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{debug, info, instrument};

const RESET_REQUESTED: &str = "If the email is registered, a reset link is on its way";

#[utoipa::path(
    post,
    path = "/auth/password-reset/request",
    request_body = EmailRequest,
    responses(
        (status = 200, description = "Reset link sent when the email is registered", body = MessageResponse)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn request_password_reset(
    Extension(state): Extension<Arc<AuthState>>,
    Json(request): Json<EmailRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Some(user) = state.identity().find_user_by_email(&request.email).await? else {
        debug!("password reset requested for unknown email");
        return Ok(Json(MessageResponse::new(RESET_REQUESTED)));
    };

    let token = state
        .tokens()
        .issue_link(user.id, LinkPurpose::PasswordReset, state.config().password_reset_ttl())
        .map_err(|err| ApiError::Internal(err.into()))?;
    // The reset form lives in the frontend, which posts back to /auth/password-reset.
    let link = utils::build_link(state.config().frontend_origin(), "/reset-password", &token);
    let message =
        templates::password_reset(&user.email, &link, state.config().password_reset_ttl());
    email::dispatch(state.email_sender(), message);

    Ok(Json(MessageResponse::new(RESET_REQUESTED)))
}

#[utoipa::path(
    post,
    path = "/auth/password-reset",
    request_body = PasswordResetRequest,
    responses(
        (status = 200, description = "Password updated", body = MessageResponse),
        (status = 400, description = "Weak password", body = ErrorBody),
        (status = 401, description = "Invalid or expired link", body = ErrorBody)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn reset_password(
    Extension(state): Extension<Arc<AuthState>>,
    Json(request): Json<PasswordResetRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let user_id = state
        .tokens()
        .verify_link(&request.token, LinkPurpose::PasswordReset)?;
    let password = SecretString::from(request.password);
    state.identity().set_password(user_id, &password).await?;

    info!(%user_id, "password reset");
    Ok(Json(MessageResponse::new("Password updated")))
}
