//! Error boundary of the HTTP surface.
//!
//! Every domain error is converted into an [`ApiError`], which renders the wire
//! body `{title, message, success: false, status, timestamp}`. Unexpected errors
//! are logged and surfaced as a generic 500.

use crate::{
    identity::{IdentityError, service::MIN_PASSWORD_LENGTH},
    oauth::OAuthError,
    session::SessionError,
    token::TokenError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::{debug, error, warn};
use utoipa::ToSchema;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("The access token is invalid or has expired")]
    InvalidToken,
    #[error("Authentication required")]
    SessionInvalidated,
    #[error("This account is already signed in on another device")]
    ConcurrentSessionDenied,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Email address has not been verified")]
    VerificationMissing,
    #[error("Email address is already verified")]
    AlreadyVerified,
    #[error("A user with this email already exists")]
    EmailTaken,
    #[error("Invalid email address")]
    InvalidEmail,
    #[error("Password must be at least {min} characters", min = MIN_PASSWORD_LENGTH)]
    WeakCredential,
    #[error("Provider is already linked to this account")]
    AlreadyLinked,
    #[error("Cannot unlink the only sign-in method of this account")]
    LastAccount,
    #[error("Provider is not linked to this account")]
    NotLinked,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("Unknown or unconfigured provider: {0}")]
    UnknownProvider(String),
    #[error("Provider email {provider_email} does not match signed-in email {session_email}")]
    EmailMismatch {
        session_email: String,
        provider_email: String,
    },
    #[error("OAuth state does not match")]
    InvalidState,
    #[error("Provider exchange failed")]
    ProviderExchangeFailed(#[source] OAuthError),
    #[error("Session store unavailable")]
    SessionUnavailable(#[source] SessionError),
    #[error("{0}")]
    BadRequest(String),
    #[error("Internal server error")]
    Internal(#[source] anyhow::Error),
}

impl ApiError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidToken
            | Self::SessionInvalidated
            | Self::ConcurrentSessionDenied
            | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::VerificationMissing => StatusCode::FORBIDDEN,
            Self::AlreadyVerified
            | Self::EmailTaken
            | Self::AlreadyLinked
            | Self::LastAccount
            | Self::EmailMismatch { .. } => StatusCode::CONFLICT,
            Self::InvalidEmail
            | Self::WeakCredential
            | Self::InvalidState
            | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotLinked | Self::NotFound(_) | Self::UnknownProvider(_) => StatusCode::NOT_FOUND,
            Self::ProviderExchangeFailed(_) => StatusCode::BAD_GATEWAY,
            Self::SessionUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable title clients switch on.
    #[must_use]
    pub const fn title(&self) -> &'static str {
        match self {
            Self::InvalidToken => "INVALID_TOKEN",
            Self::SessionInvalidated => "SESSION_INVALIDATED",
            Self::ConcurrentSessionDenied => "CONCURRENT_SESSION_DENIED",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::VerificationMissing => "VERIFICATION_MISSING",
            Self::AlreadyVerified => "ALREADY_VERIFIED",
            Self::EmailTaken => "USER_ALREADY_EXISTS",
            Self::InvalidEmail => "INVALID_EMAIL",
            Self::WeakCredential => "WEAK_CREDENTIAL",
            Self::AlreadyLinked => "ACCOUNT_ALREADY_LINKED",
            Self::LastAccount => "LAST_ACCOUNT",
            Self::NotLinked => "ACCOUNT_NOT_LINKED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::UnknownProvider(_) => "UNKNOWN_PROVIDER",
            Self::EmailMismatch { .. } => "EMAIL_MISMATCH",
            Self::InvalidState => "OAUTH_STATE_MISMATCH",
            Self::ProviderExchangeFailed(_) => "PROVIDER_EXCHANGE_FAILED",
            Self::SessionUnavailable(_) => "SESSION_UNAVAILABLE",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    #[must_use]
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            title: self.title().to_string(),
            message: self.to_string(),
            success: false,
            status: self.status().as_u16(),
            timestamp: OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
        }
    }
}

/// Wire format of every error response.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub title: String,
    pub message: String,
    pub success: bool,
    pub status: u16,
    /// RFC 3339, UTC.
    pub timestamp: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Internal(err) => error!("internal error: {err:#}"),
            Self::SessionUnavailable(err) => error!("session store failure: {err}"),
            Self::ProviderExchangeFailed(err) => warn!("provider exchange failed: {err}"),
            other => debug!(title = other.title(), "request rejected"),
        }
        (self.status(), Json(self.body())).into_response()
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        debug!("token rejected: {err}");
        Self::InvalidToken
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        Self::SessionUnavailable(err)
    }
}

impl From<OAuthError> for ApiError {
    fn from(err: OAuthError) -> Self {
        Self::ProviderExchangeFailed(err)
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::InvalidEmail => Self::InvalidEmail,
            IdentityError::WeakCredential => Self::WeakCredential,
            IdentityError::EmailTaken => Self::EmailTaken,
            IdentityError::AlreadyLinked => Self::AlreadyLinked,
            IdentityError::LastAccount => Self::LastAccount,
            IdentityError::NotLinked => Self::NotLinked,
            IdentityError::UserNotFound => Self::NotFound("user"),
            IdentityError::AlreadyVerified => Self::AlreadyVerified,
            IdentityError::InvalidCredentials => Self::InvalidCredentials,
            IdentityError::Store(err) => Self::Internal(err),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn body_carries_title_status_and_timestamp() {
        let body = ApiError::ConcurrentSessionDenied.body();
        assert_eq!(body.title, "CONCURRENT_SESSION_DENIED");
        assert_eq!(body.status, 401);
        assert!(!body.success);
        assert!(OffsetDateTime::parse(&body.timestamp, &Rfc3339).is_ok());
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let err = ApiError::from(IdentityError::Store(anyhow::anyhow!("password=hunter2")));
        let body = err.body();
        assert_eq!(body.status, 500);
        assert_eq!(body.message, "Internal server error");
    }

    #[test]
    fn every_token_failure_is_invalid_token() {
        for err in [TokenError::Expired, TokenError::InvalidSignature, TokenError::TokenFormat] {
            assert!(matches!(ApiError::from(err), ApiError::InvalidToken));
        }
    }

    #[test]
    fn session_timeouts_fail_closed_as_unavailable() {
        let err = ApiError::from(SessionError::Timeout(Duration::from_millis(5)));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.title(), "SESSION_UNAVAILABLE");
    }

    #[test]
    fn email_mismatch_names_both_addresses() {
        let err = ApiError::EmailMismatch {
            session_email: "a@x.com".to_string(),
            provider_email: "b@y.com".to_string(),
        };
        assert_eq!(err.title(), "EMAIL_MISMATCH");
        assert!(err.to_string().contains("a@x.com"));
        assert!(err.to_string().contains("b@y.com"));
    }

    #[tokio::test]
    async fn response_renders_json_body() -> anyhow::Result<()> {
        let response = ApiError::LastAccount.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let body: ErrorBody = serde_json::from_slice(&bytes)?;
        assert_eq!(body.title, "LAST_ACCOUNT");
        Ok(())
    }
}
