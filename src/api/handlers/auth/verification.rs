//! Email verification through mailed link tokens.

use super::{
    state::AuthState,
    types::{MessageResponse, TokenQuery},
};
use crate::{
    api::{
        email::{self, templates},
        error::{ApiError, ErrorBody},
    },
    token::LinkPurpose,
};
use axum::{
    Json,
    extract::{Extension, Query},
};
use std::sync::Arc;
use tracing::{info, instrument};

#[utoipa::path(
    get,
    path = "/auth/verify-email",
    params(TokenQuery),
    responses(
        (status = 200, description = "Email verified", body = MessageResponse),
        (status = 401, description = "Invalid or expired link", body = ErrorBody),
        (status = 409, description = "Email already verified", body = ErrorBody)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn verify_email(
    Extension(state): Extension<Arc<AuthState>>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<MessageResponse>, ApiError> {
    let user_id = state
        .tokens()
        .verify_link(&query.token, LinkPurpose::VerifyEmail)?;
    let user = state.identity().mark_verified(user_id).await?;

    email::dispatch(state.email_sender(), templates::welcome(&user.email));
    info!(%user_id, "email verified");
    Ok(Json(MessageResponse::new("Email verified")))
}
