use super::principal::{Principal, require_auth};
use crate::{
    api::error::{ApiError, ErrorBody},
    token::IdentityClaim,
};
use axum::{Json, extract::Extension};

#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Claim of the signed-in user", body = IdentityClaim),
        (status = 401, description = "Not signed in or token invalid", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn me(principal: Option<Extension<Principal>>) -> Result<Json<IdentityClaim>, ApiError> {
    Ok(Json(require_auth(principal)?.claim))
}
