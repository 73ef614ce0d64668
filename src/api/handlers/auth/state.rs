//! Auth state and configuration shared by every handler.

use crate::{
    api::email::EmailSender, identity::IdentityService, oauth::OAuthProviders,
    session::SessionRegistry, token::TokenService,
};
use std::{sync::Arc, time::Duration};

const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: u64 = 5 * 60;
const DEFAULT_VERIFICATION_TTL_SECONDS: u64 = 60 * 60;
const DEFAULT_PASSWORD_RESET_TTL_SECONDS: u64 = 60 * 60;
const DEFAULT_MAGIC_LINK_TTL_SECONDS: u64 = 15 * 60;
const DEFAULT_OAUTH_STATE_TTL_SECONDS: u64 = 10 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    public_base_url: String,
    frontend_origin: String,
    access_token_ttl: Duration,
    verification_ttl: Duration,
    password_reset_ttl: Duration,
    magic_link_ttl: Duration,
    oauth_state_ttl: Duration,
}

impl AuthConfig {
    /// `public_base_url` is where this service is reachable from browsers; it
    /// prefixes mailed links and OAuth callbacks.
    #[must_use]
    pub fn new(public_base_url: String, frontend_origin: String) -> Self {
        Self {
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            frontend_origin,
            access_token_ttl: Duration::from_secs(DEFAULT_ACCESS_TOKEN_TTL_SECONDS),
            verification_ttl: Duration::from_secs(DEFAULT_VERIFICATION_TTL_SECONDS),
            password_reset_ttl: Duration::from_secs(DEFAULT_PASSWORD_RESET_TTL_SECONDS),
            magic_link_ttl: Duration::from_secs(DEFAULT_MAGIC_LINK_TTL_SECONDS),
            oauth_state_ttl: Duration::from_secs(DEFAULT_OAUTH_STATE_TTL_SECONDS),
        }
    }

    /// Lifetime of both the access token and the session entry.
    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: u64) -> Self {
        self.access_token_ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_verification_ttl_seconds(mut self, seconds: u64) -> Self {
        self.verification_ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_password_reset_ttl_seconds(mut self, seconds: u64) -> Self {
        self.password_reset_ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_magic_link_ttl_seconds(mut self, seconds: u64) -> Self {
        self.magic_link_ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn public_base_url(&self) -> &str {
        &self.public_base_url
    }

    #[must_use]
    pub fn frontend_origin(&self) -> &str {
        &self.frontend_origin
    }

    #[must_use]
    pub fn access_token_ttl(&self) -> Duration {
        self.access_token_ttl
    }

    pub(crate) fn verification_ttl(&self) -> Duration {
        self.verification_ttl
    }

    pub(crate) fn password_reset_ttl(&self) -> Duration {
        self.password_reset_ttl
    }

    pub(crate) fn magic_link_ttl(&self) -> Duration {
        self.magic_link_ttl
    }

    pub(crate) fn oauth_state_ttl(&self) -> Duration {
        self.oauth_state_ttl
    }

    /// Cookies are only marked secure when the service is served over HTTPS.
    pub(crate) fn cookie_secure(&self) -> bool {
        self.public_base_url.starts_with("https://")
    }
}

/// Collaborators reachable from handlers through `Extension<Arc<AuthState>>`.
pub struct AuthState {
    config: AuthConfig,
    tokens: TokenService,
    sessions: SessionRegistry,
    identity: IdentityService,
    providers: OAuthProviders,
    email: Arc<dyn EmailSender>,
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("config", &self.config)
            .field("sessions", &self.sessions)
            .field("identity", &self.identity)
            .field("providers", &self.providers)
            .finish_non_exhaustive()
    }
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        tokens: TokenService,
        sessions: SessionRegistry,
        identity: IdentityService,
        providers: OAuthProviders,
        email: Arc<dyn EmailSender>,
    ) -> Self {
        Self {
            config,
            tokens,
            sessions,
            identity,
            providers,
            email,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    #[must_use]
    pub fn identity(&self) -> &IdentityService {
        &self.identity
    }

    #[must_use]
    pub fn providers(&self) -> &OAuthProviders {
        &self.providers
    }

    #[must_use]
    pub fn email_sender(&self) -> Arc<dyn EmailSender> {
        Arc::clone(&self.email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_flow_lifetimes() {
        let config = AuthConfig::new(
            "https://api.ensaluti.dev/".to_string(),
            "https://ensaluti.dev".to_string(),
        );
        assert_eq!(config.public_base_url(), "https://api.ensaluti.dev");
        assert_eq!(config.access_token_ttl(), Duration::from_secs(300));
        assert_eq!(config.verification_ttl(), Duration::from_secs(3600));
        assert_eq!(config.password_reset_ttl(), Duration::from_secs(3600));
        assert_eq!(config.magic_link_ttl(), Duration::from_secs(900));
        assert!(config.cookie_secure());
    }

    #[test]
    fn plain_http_disables_secure_cookies() {
        let config = AuthConfig::new(
            "http://localhost:8080".to_string(),
            "http://localhost:5173".to_string(),
        )
        .with_access_token_ttl_seconds(60);
        assert!(!config.cookie_secure());
        assert_eq!(config.access_token_ttl(), Duration::from_secs(60));
    }
}
