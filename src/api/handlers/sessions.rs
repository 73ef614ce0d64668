//! Presence reporting over the live session registry.

use super::auth::{
    principal::{Principal, require_auth},
    state::AuthState,
};
use crate::api::error::{ApiError, ErrorBody};
use axum::{Json, extract::Extension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct LiveSession {
    pub session_key: String,
    pub user_id: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LiveSessions {
    pub count: usize,
    pub sessions: Vec<LiveSession>,
}

#[utoipa::path(
    get,
    path = "/sessions",
    responses(
        (status = 200, description = "Every live session", body = LiveSessions),
        (status = 401, description = "Not signed in", body = ErrorBody),
        (status = 503, description = "Session store unavailable", body = ErrorBody)
    ),
    tag = "sessions"
)]
pub async fn list(
    Extension(state): Extension<Arc<AuthState>>,
    principal: Option<Extension<Principal>>,
) -> Result<Json<LiveSessions>, ApiError> {
    require_auth(principal)?;
    let sessions: Vec<LiveSession> = state
        .sessions()
        .list_all()
        .await?
        .into_iter()
        .map(|(session_key, user_id)| LiveSession {
            session_key,
            user_id,
        })
        .collect();
    Ok(Json(LiveSessions {
        count: sessions.len(),
        sessions,
    }))
}
