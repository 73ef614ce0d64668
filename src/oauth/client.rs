use super::{IdentityProvider, OAuthError, OAuthFuture, ProviderProfile};
use crate::{APP_USER_AGENT, identity::Provider};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

const GOOGLE_SCOPES: &str = "openid email profile";
const DISCORD_SCOPES: &str = "identify email";

#[derive(Debug, Clone)]
pub struct OAuthEndpoints {
    pub authorize: String,
    pub token: String,
    pub profile: String,
}

impl OAuthEndpoints {
    #[must_use]
    pub fn google() -> Self {
        Self {
            authorize: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token: "https://oauth2.googleapis.com/token".to_string(),
            profile: "https://openidconnect.googleapis.com/v1/userinfo".to_string(),
        }
    }

    #[must_use]
    pub fn discord() -> Self {
        Self {
            authorize: "https://discord.com/oauth2/authorize".to_string(),
            token: "https://discord.com/api/oauth2/token".to_string(),
            profile: "https://discord.com/api/users/@me".to_string(),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct GoogleUser {
    sub: String,
    email: Option<String>,
    email_verified: Option<bool>,
    picture: Option<String>,
}

#[derive(Deserialize)]
struct DiscordUser {
    id: String,
    email: Option<String>,
    verified: Option<bool>,
    avatar: Option<String>,
}

fn google_profile(user: GoogleUser) -> Result<ProviderProfile, OAuthError> {
    let email = user.email.ok_or(OAuthError::MissingEmail)?;
    if user.email_verified == Some(false) {
        return Err(OAuthError::UnverifiedEmail);
    }
    Ok(ProviderProfile {
        provider_id: user.sub,
        email,
        image_url: user.picture,
    })
}

fn discord_profile(user: DiscordUser) -> Result<ProviderProfile, OAuthError> {
    let email = user.email.ok_or(OAuthError::MissingEmail)?;
    if user.verified == Some(false) {
        return Err(OAuthError::UnverifiedEmail);
    }
    let image_url = user
        .avatar
        .map(|avatar| format!("https://cdn.discordapp.com/avatars/{}/{avatar}.png", user.id));
    Ok(ProviderProfile {
        provider_id: user.id,
        email,
        image_url,
    })
}

/// Authorization-code client for one provider.
pub struct OAuthClient {
    provider: Provider,
    client_id: String,
    client_secret: SecretString,
    endpoints: OAuthEndpoints,
    http: Client,
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient")
            .field("provider", &self.provider)
            .field("client_id", &self.client_id)
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

impl OAuthClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn google(client_id: String, client_secret: SecretString) -> Result<Self, OAuthError> {
        Self::new(Provider::Google, client_id, client_secret, OAuthEndpoints::google())
    }

    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn discord(client_id: String, client_secret: SecretString) -> Result<Self, OAuthError> {
        Self::new(Provider::Discord, client_id, client_secret, OAuthEndpoints::discord())
    }

    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        provider: Provider,
        client_id: String,
        client_secret: SecretString,
        endpoints: OAuthEndpoints,
    ) -> Result<Self, OAuthError> {
        let http = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            provider,
            client_id,
            client_secret,
            endpoints,
            http,
        })
    }

    fn scopes(&self) -> &'static str {
        match self.provider {
            Provider::Discord => DISCORD_SCOPES,
            _ => GOOGLE_SCOPES,
        }
    }

    async fn access_token(&self, code: &str, redirect_uri: &str) -> Result<String, OAuthError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
        ];
        let response = self
            .http
            .post(&self.endpoints.token)
            .form(&form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(OAuthError::Status {
                endpoint: "token",
                status: response.status().as_u16(),
            });
        }
        Ok(response.json::<TokenResponse>().await?.access_token)
    }

    async fn profile_response(&self, access_token: &str) -> Result<reqwest::Response, OAuthError> {
        let response = self
            .http
            .get(&self.endpoints.profile)
            .bearer_auth(access_token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(OAuthError::Status {
                endpoint: "profile",
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }

    #[instrument(skip(self, code), fields(provider = %self.provider))]
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<ProviderProfile, OAuthError> {
        let access_token = self.access_token(code, redirect_uri).await?;
        let response = self.profile_response(&access_token).await?;
        let profile = match self.provider {
            Provider::Discord => discord_profile(response.json().await?)?,
            _ => google_profile(response.json().await?)?,
        };
        debug!(provider_id = %profile.provider_id, "provider profile fetched");
        Ok(profile)
    }
}

impl IdentityProvider for OAuthClient {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<Url, OAuthError> {
        let mut url = Url::parse(&self.endpoints.authorize)?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", self.scopes())
            .append_pair("state", state);
        if self.provider == Provider::Google {
            url.query_pairs_mut()
                .append_pair("access_type", "online")
                .append_pair("prompt", "select_account");
        }
        Ok(url)
    }

    fn exchange<'a>(
        &'a self,
        code: &'a str,
        redirect_uri: &'a str,
    ) -> OAuthFuture<'a, ProviderProfile> {
        Box::pin(self.exchange_code(code, redirect_uri))
    }
}
