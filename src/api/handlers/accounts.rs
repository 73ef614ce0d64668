//! Linking and unlinking identity providers on the signed-in user.

use super::auth::{
    oauth::{configured_provider, exchange_callback, redirect_to_provider},
    principal::{Principal, require_auth},
    state::AuthState,
    types::{CallbackQuery, MessageResponse},
};
use crate::{
    api::error::{ApiError, ErrorBody},
    identity::{Provider, service::normalize_email},
};
use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LinkedAccounts {
    pub providers: Vec<Provider>,
}

#[utoipa::path(
    get,
    path = "/accounts",
    responses(
        (status = 200, description = "Providers linked to the signed-in user", body = LinkedAccounts),
        (status = 401, description = "Not signed in", body = ErrorBody)
    ),
    tag = "accounts"
)]
pub async fn list(
    Extension(state): Extension<Arc<AuthState>>,
    principal: Option<Extension<Principal>>,
) -> Result<Json<LinkedAccounts>, ApiError> {
    let principal = require_auth(principal)?;
    let accounts = state.identity().accounts(principal.claim.id).await?;
    Ok(Json(LinkedAccounts {
        providers: accounts.into_iter().map(|account| account.provider).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/accounts/{provider}",
    params(("provider" = String, Path, description = "google or discord")),
    responses(
        (status = 303, description = "Redirect to the provider consent page"),
        (status = 401, description = "Not signed in", body = ErrorBody),
        (status = 409, description = "Provider already linked", body = ErrorBody)
    ),
    tag = "accounts"
)]
pub async fn link_start(
    Extension(state): Extension<Arc<AuthState>>,
    principal: Option<Extension<Principal>>,
    Path(tag): Path<String>,
) -> Result<Response, ApiError> {
    let principal = require_auth(principal)?;
    let (provider, client) = configured_provider(&state, &tag)?;
    if state
        .identity()
        .find_account(principal.claim.id, provider)
        .await?
        .is_some()
    {
        return Err(ApiError::AlreadyLinked);
    }
    redirect_to_provider(&state, client.as_ref(), &format!("/accounts/{provider}/callback"))
}

#[utoipa::path(
    get,
    path = "/accounts/{provider}/callback",
    params(
        ("provider" = String, Path, description = "google or discord"),
        CallbackQuery
    ),
    responses(
        (status = 200, description = "Provider linked", body = MessageResponse),
        (status = 401, description = "Not signed in", body = ErrorBody),
        (status = 409, description = "Provider email differs from the signed-in email, or already linked", body = ErrorBody),
        (status = 502, description = "Provider exchange failed", body = ErrorBody)
    ),
    tag = "accounts"
)]
#[instrument(skip(state, principal, headers, query))]
pub async fn link_callback(
    Extension(state): Extension<Arc<AuthState>>,
    principal: Option<Extension<Principal>>,
    Path(tag): Path<String>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<MessageResponse>, ApiError> {
    let principal = require_auth(principal)?;
    let (provider, client) = configured_provider(&state, &tag)?;
    let callback_path = format!("/accounts/{provider}/callback");
    let profile =
        exchange_callback(&state, client.as_ref(), &callback_path, &headers, query).await?;

    if normalize_email(&profile.email) != normalize_email(&principal.claim.email) {
        warn!(user_id = %principal.claim.id, %provider, "provider email mismatch on link");
        return Err(ApiError::EmailMismatch {
            session_email: principal.claim.email,
            provider_email: profile.email,
        });
    }

    let user_id = principal.claim.id;
    state
        .identity()
        .link(user_id, provider, Some(profile.provider_id), None)
        .await?;
    if let Some(image_url) = profile.image_url.as_deref() {
        if let Err(err) = state.identity().adopt_avatar(user_id, image_url).await {
            warn!(%user_id, "failed to adopt provider avatar: {err}");
        }
    }

    info!(%user_id, %provider, "provider linked");
    Ok(Json(MessageResponse::new(&format!("{provider} linked"))))
}

#[utoipa::path(
    delete,
    path = "/accounts/{provider}",
    params(("provider" = String, Path, description = "local, google or discord")),
    responses(
        (status = 204, description = "Provider unlinked"),
        (status = 401, description = "Not signed in", body = ErrorBody),
        (status = 404, description = "Provider not linked", body = ErrorBody),
        (status = 409, description = "Only remaining sign-in method", body = ErrorBody)
    ),
    tag = "accounts"
)]
pub async fn unlink(
    Extension(state): Extension<Arc<AuthState>>,
    principal: Option<Extension<Principal>>,
    Path(tag): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(principal)?;
    let provider = Provider::parse(&tag).ok_or(ApiError::UnknownProvider(tag))?;
    state.identity().unlink(principal.claim.id, provider).await?;
    Ok(StatusCode::NO_CONTENT)
}
