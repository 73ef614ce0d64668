//! Cookie contract of the auth surface.
//!
//! `access_token` and `session_id` always travel together with the same
//! max-age; both are renewed on every authenticated request and cleared on
//! sign-out or when the token fails verification.

use super::state::AuthConfig;
use axum::http::{
    HeaderMap, HeaderValue,
    header::{COOKIE, InvalidHeaderValue, SET_COOKIE},
};
use std::time::Duration;

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
pub const SESSION_ID_COOKIE: &str = "session_id";
pub const OAUTH_STATE_COOKIE: &str = "oauth_state";

fn cookie(
    name: &str,
    value: &str,
    max_age: Duration,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        max_age.as_secs()
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Set-Cookie headers for a freshly issued token and its session key.
pub(crate) fn session_cookies(
    config: &AuthConfig,
    token: &str,
    session_key: &str,
) -> Result<HeaderMap, InvalidHeaderValue> {
    let ttl = config.access_token_ttl();
    let secure = config.cookie_secure();
    let mut headers = HeaderMap::new();
    headers.append(SET_COOKIE, cookie(ACCESS_TOKEN_COOKIE, token, ttl, secure)?);
    headers.append(SET_COOKIE, cookie(SESSION_ID_COOKIE, session_key, ttl, secure)?);
    Ok(headers)
}

pub(crate) fn clear_cookie(
    config: &AuthConfig,
    name: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    cookie(name, "", Duration::ZERO, config.cookie_secure())
}

/// Set-Cookie headers expiring both session cookies.
pub(crate) fn clear_session_cookies(config: &AuthConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for name in [ACCESS_TOKEN_COOKIE, SESSION_ID_COOKIE] {
        if let Ok(value) = clear_cookie(config, name) {
            headers.append(SET_COOKIE, value);
        }
    }
    headers
}

pub(crate) fn oauth_state_cookie(
    config: &AuthConfig,
    state: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    cookie(
        OAUTH_STATE_COOKIE,
        state,
        config.oauth_state_ttl(),
        config.cookie_secure(),
    )
}

/// Value of the named cookie in the request, if any.
pub(crate) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
