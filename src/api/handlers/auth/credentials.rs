//! Local credential endpoints: sign-up, sign-in and sign-out.

use super::{
    cookies,
    login::establish_session,
    principal::Principal,
    state::AuthState,
    types::{MessageResponse, SigninRequest, SigninResponse, SignupRequest, SignupResponse},
    utils,
};
use crate::{
    api::{
        email::{self, templates},
        error::{ApiError, ErrorBody},
    },
    identity::Registration,
    token::LinkPurpose,
};
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "User created, verification email sent", body = SignupResponse),
        (status = 400, description = "Invalid email or weak password", body = ErrorBody),
        (status = 409, description = "Email already registered", body = ErrorBody)
    ),
    tag = "auth"
)]
#[instrument(skip(state, request), fields(email = %request.email))]
pub async fn signup(
    Extension(state): Extension<Arc<AuthState>>,
    Json(request): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let registration = Registration::local(&request.email, SecretString::from(request.password))
        .with_role(request.role.unwrap_or_default());
    let user = state.identity().register(registration).await?;

    let token = state
        .tokens()
        .issue_link(user.id, LinkPurpose::VerifyEmail, state.config().verification_ttl())
        .map_err(|err| ApiError::Internal(err.into()))?;
    let link = utils::build_link(state.config().public_base_url(), "/auth/verify-email", &token);
    let message = templates::verification(&user.email, &link, state.config().verification_ttl());
    email::dispatch(state.email_sender(), message);

    info!(user_id = %user.id, "user signed up");
    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            message: "Signed up, check your inbox to verify your email".to_string(),
            id: user.id,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/auth/signin",
    request_body = SigninRequest,
    responses(
        (status = 200, description = "Signed in, access_token and session_id cookies set", body = SigninResponse),
        (status = 401, description = "Invalid credentials or account already signed in elsewhere", body = ErrorBody),
        (status = 403, description = "Email not verified", body = ErrorBody),
        (status = 503, description = "Session store unavailable", body = ErrorBody)
    ),
    tag = "auth"
)]
#[instrument(skip(state, headers, request), fields(email = %request.email))]
pub async fn signin(
    Extension(state): Extension<Arc<AuthState>>,
    headers: HeaderMap,
    Json(request): Json<SigninRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let password = SecretString::from(request.password);
    let user = state
        .identity()
        .check_password(&request.email, &password)
        .await?;
    if !user.is_verified {
        return Err(ApiError::VerificationMissing);
    }

    let client_ip = utils::extract_client_ip(&headers);
    let (cookies, claim) = establish_session(&state, &user, client_ip.as_deref()).await?;
    Ok((StatusCode::OK, cookies, Json(SigninResponse::new(claim))))
}

#[utoipa::path(
    post,
    path = "/auth/signout",
    responses(
        (status = 200, description = "Session removed and cookies cleared", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn signout(
    Extension(state): Extension<Arc<AuthState>>,
    principal: Option<Extension<Principal>>,
) -> impl IntoResponse {
    // The key comes from the verified claim, never from the session_id cookie.
    if let Some(Extension(principal)) = principal {
        match state.sessions().remove(&principal.session_key).await {
            Ok(()) => info!(user_id = %principal.claim.id, "signed out"),
            Err(err) => warn!(user_id = %principal.claim.id, "failed to remove session: {err}"),
        }
    }

    (
        StatusCode::OK,
        cookies::clear_session_cookies(state.config()),
        Json(MessageResponse::new("Signed out")),
    )
}
