//! OAuth 2.0 authorization-code clients for Google and Discord.

mod client;

pub use client::{OAuthClient, OAuthEndpoints};

use crate::identity::Provider;
use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};
use thiserror::Error;
use url::Url;

pub type OAuthFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, OAuthError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("invalid provider url: {0}")]
    Url(#[from] url::ParseError),
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider answered {status} on {endpoint}")]
    Status { endpoint: &'static str, status: u16 },
    #[error("provider profile has no email")]
    MissingEmail,
    #[error("provider email is not verified")]
    UnverifiedEmail,
}

/// Identity returned by a provider after a successful code exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub provider_id: String,
    pub email: String,
    pub image_url: Option<String>,
}

pub trait IdentityProvider: Send + Sync {
    fn provider(&self) -> Provider;

    /// Consent page the user is redirected to.
    ///
    /// # Errors
    /// Returns an error if the configured authorize endpoint is not a valid URL.
    fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<Url, OAuthError>;

    /// Exchange an authorization code for the user's profile.
    fn exchange<'a>(
        &'a self,
        code: &'a str,
        redirect_uri: &'a str,
    ) -> OAuthFuture<'a, ProviderProfile>;
}

/// Configured providers, keyed by tag.
#[derive(Clone, Default)]
pub struct OAuthProviders {
    providers: HashMap<Provider, Arc<dyn IdentityProvider>>,
}

impl std::fmt::Debug for OAuthProviders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.providers.keys()).finish()
    }
}

impl OAuthProviders {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.providers.insert(provider.provider(), provider);
        self
    }

    #[must_use]
    pub fn get(&self, provider: Provider) -> Option<Arc<dyn IdentityProvider>> {
        self.providers.get(&provider).cloned()
    }
}
