//! Request/response types for auth endpoints.

use crate::{identity::Role, token::IdentityClaim};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(ToSchema, Serialize, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub role: Option<Role>,
}

impl std::fmt::Debug for SignupRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignupRequest")
            .field("email", &self.email)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SignupResponse {
    pub message: String,
    pub id: Uuid,
}

#[derive(ToSchema, Serialize, Deserialize)]
pub struct SigninRequest {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for SigninRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigninRequest")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Body of every successful login, whatever the credential.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SigninResponse {
    pub message: String,
    pub success: bool,
    pub user: IdentityClaim,
}

impl SigninResponse {
    pub(crate) fn new(user: IdentityClaim) -> Self {
        Self {
            message: "Signed in".to_string(),
            success: true,
            user,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub(crate) fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize)]
pub struct PasswordResetRequest {
    pub token: String,
    pub password: String,
}

impl std::fmt::Debug for PasswordResetRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordResetRequest").finish_non_exhaustive()
    }
}

#[derive(IntoParams, Deserialize, Debug)]
pub struct TokenQuery {
    pub token: String,
}

#[derive(IntoParams, Deserialize, Debug)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set by the provider when the user declined consent.
    pub error: Option<String>,
}
