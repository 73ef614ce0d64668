use super::auth::state::AuthState;
use crate::GIT_COMMIT_HASH;
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: String,
    session_store: String,
}

const fn status_str(healthy: bool) -> &'static str {
    if healthy { "ok" } else { "error" }
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Identity store and session store are healthy", body = Health),
        (status = 503, description = "Identity store or session store is unhealthy", body = Health)
    ),
    tag= "health"
)]
// axum handler for health
pub async fn health(
    method: Method,
    Extension(state): Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let database = match state.identity().ping().await {
        Ok(()) => true,
        Err(err) => {
            error!("Failed to ping identity store: {err:#}");
            false
        }
    };
    let session_store = match state.sessions().ping().await {
        Ok(()) => true,
        Err(err) => {
            error!("Failed to ping session store: {err}");
            false
        }
    };

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: status_str(database).to_string(),
        session_store: status_str(session_store).to_string(),
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = health.commit.get(..7).unwrap_or("");
    let mut headers = HeaderMap::new();
    match format!("{}:{}:{}", health.name, health.version, short_hash).parse::<HeaderValue>() {
        Ok(x_app) => {
            headers.insert("X-App", x_app);
        }
        Err(err) => error!("Failed to parse X-App header: {err}"),
    }

    let status = if database && session_store {
        debug!("dependencies are healthy");
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, headers, body)
}
