//! HTTP surface.
//!
//! Routes are plain axum handlers sharing an `Arc<AuthState>` extension. The
//! request authenticator runs as middleware on every route; handlers that need
//! a signed-in caller read the resolved [`handlers::auth::Principal`].

use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use url::Url;

pub mod email;
pub mod error;
pub mod handlers;
mod openapi;

pub use error::ApiError;
pub use handlers::auth::{AuthConfig, AuthState};
pub use openapi::openapi;

use handlers::{accounts, auth, health, root, sessions};

/// Build the application with every route and layer.
///
/// # Errors
/// Returns an error if the configured frontend origin is not a valid URL.
pub fn router(state: Arc<AuthState>) -> Result<Router> {
    let frontend_origin = frontend_origin(state.config().frontend_origin())?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    let app = Router::new()
        .route("/", get(root::root))
        .route("/health", get(health::health).options(health::health))
        .route("/auth/signup", post(auth::credentials::signup))
        .route("/auth/signin", post(auth::credentials::signin))
        .route("/auth/signout", post(auth::credentials::signout))
        .route("/auth/me", get(auth::me::me))
        .route("/auth/verify-email", get(auth::verification::verify_email))
        .route(
            "/auth/password-reset/request",
            post(auth::password::request_password_reset),
        )
        .route("/auth/password-reset", post(auth::password::reset_password))
        .route("/auth/magic-link", post(auth::magic_link::request_magic_link))
        .route("/auth/magic-login", get(auth::magic_link::magic_login))
        .route("/oauth/:provider", get(auth::oauth::authorize))
        .route("/oauth/:provider/callback", get(auth::oauth::callback))
        .route("/accounts", get(accounts::list))
        .route(
            "/accounts/:provider",
            get(accounts::link_start).delete(accounts::unlink),
        )
        .route("/accounts/:provider/callback", get(accounts::link_callback))
        .route("/sessions", get(sessions::list))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(state))
                .layer(middleware::from_fn(auth::authenticator::authenticate)),
        );

    Ok(app)
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, state: Arc<AuthState>) -> Result<()> {
    let app = router(state)?;

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for shutdown signal: {err}");
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_url)
        .with_context(|| format!("Invalid frontend origin: {frontend_url}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Frontend origin must include a valid host: {frontend_url}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontend_origin_drops_path() -> Result<()> {
        let origin = frontend_origin("https://ensaluti.dev:8443/app/")?;
        assert_eq!(origin, "https://ensaluti.dev:8443");
        Ok(())
    }

    #[test]
    fn frontend_origin_requires_host() {
        assert!(frontend_origin("not a url").is_err());
    }
}
