use crate::{
    api::{self, AuthConfig, AuthState, email::LogEmailSender},
    cli::commands::oauth::Credentials,
    identity::{IdentityService, IdentityStore, MemoryIdentityStore, PgIdentityStore},
    oauth::{OAuthClient, OAuthProviders},
    session::{MemorySessionStore, RedisSessionStore, SessionRegistry, SessionStore},
    token::{KeyRing, TokenService},
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub public_base_url: String,
    pub frontend_origin: String,
    pub dsn: Option<String>,
    pub redis_url: Option<String>,
    pub session_store_timeout: Duration,
    pub token_secret: SecretString,
    pub token_previous_secrets: Vec<SecretString>,
    pub access_token_ttl_seconds: u64,
    pub verification_token_ttl_seconds: u64,
    pub password_reset_ttl_seconds: u64,
    pub magic_link_ttl_seconds: u64,
    pub bcrypt_cost: u32,
    pub google: Option<Credentials>,
    pub discord: Option<Credentials>,
}

/// Execute the server action.
///
/// # Errors
/// Returns an error if a store cannot be reached, an OAuth client cannot be built,
/// or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let identity_store = identity_store(args.dsn.as_deref()).await?;
    let session_store = session_store(args.redis_url.as_deref()).await?;

    let keys = KeyRing::new(args.token_secret).with_previous(args.token_previous_secrets);
    let tokens = TokenService::new(keys);
    let sessions = SessionRegistry::new(session_store, args.session_store_timeout);
    let identity = IdentityService::new(identity_store, args.bcrypt_cost);
    let providers = providers(args.google, args.discord)?;

    let config = AuthConfig::new(args.public_base_url, args.frontend_origin)
        .with_access_token_ttl_seconds(args.access_token_ttl_seconds)
        .with_verification_ttl_seconds(args.verification_token_ttl_seconds)
        .with_password_reset_ttl_seconds(args.password_reset_ttl_seconds)
        .with_magic_link_ttl_seconds(args.magic_link_ttl_seconds);

    let state = AuthState::new(
        config,
        tokens,
        sessions,
        identity,
        providers,
        Arc::new(LogEmailSender),
    );

    api::new(args.port, Arc::new(state)).await
}

async fn identity_store(dsn: Option<&str>) -> Result<Arc<dyn IdentityStore>> {
    let Some(dsn) = dsn else {
        warn!("No --dsn given, users and accounts are kept in memory");
        return Ok(Arc::new(MemoryIdentityStore::new()));
    };

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")?;
    info!("Connected to identity database");

    Ok(Arc::new(PgIdentityStore::new(pool)))
}

async fn session_store(redis_url: Option<&str>) -> Result<Arc<dyn SessionStore>> {
    match redis_url {
        Some(url) => Ok(Arc::new(RedisSessionStore::connect(url).await?)),
        None => {
            warn!("No --redis-url given, sessions are kept in process memory");
            Ok(Arc::new(MemorySessionStore::new()))
        }
    }
}

fn providers(google: Option<Credentials>, discord: Option<Credentials>) -> Result<OAuthProviders> {
    let mut providers = OAuthProviders::new();
    if let Some(creds) = google {
        let client = OAuthClient::google(creds.client_id, creds.client_secret)
            .context("Failed to build Google OAuth client")?;
        providers = providers.with(Arc::new(client));
        info!("Google sign-in enabled");
    }
    if let Some(creds) = discord {
        let client = OAuthClient::discord(creds.client_id, creds.client_secret)
            .context("Failed to build Discord OAuth client")?;
        providers = providers.with(Arc::new(client));
        info!("Discord sign-in enabled");
    }
    Ok(providers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Provider;

    fn creds(id: &str) -> Credentials {
        Credentials {
            client_id: id.to_string(),
            client_secret: SecretString::from("secret".to_string()),
        }
    }

    #[test]
    fn providers_only_include_configured_clients() -> Result<()> {
        let providers = providers(None, Some(creds("discord-id")))?;
        assert!(providers.get(Provider::Discord).is_some());
        assert!(providers.get(Provider::Google).is_none());
        Ok(())
    }

    #[tokio::test]
    async fn missing_backends_fall_back_to_memory() -> Result<()> {
        let identity = identity_store(None).await?;
        identity.ping().await?;
        let sessions = session_store(None).await?;
        sessions.ping().await?;
        Ok(())
    }
}
