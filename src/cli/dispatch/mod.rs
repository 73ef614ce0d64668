//! Maps parsed command-line arguments to the action the binary runs.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{self, auth, oauth, storage};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);
    let public_base_url = matches
        .get_one::<String>(commands::ARG_PUBLIC_BASE_URL)
        .cloned()
        .context("missing required argument: --public-base-url")?;
    let frontend_origin = matches
        .get_one::<String>(commands::ARG_FRONTEND_ORIGIN)
        .cloned()
        .context("missing required argument: --frontend-origin")?;

    let storage_opts = storage::Options::parse(matches);
    let auth_opts = auth::Options::parse(matches)?;
    let oauth_opts = oauth::Options::parse(matches);

    Ok(Action::Server(Args {
        port,
        public_base_url,
        frontend_origin,
        dsn: storage_opts.dsn,
        redis_url: storage_opts.redis_url,
        session_store_timeout: storage_opts.session_store_timeout,
        token_secret: auth_opts.token_secret,
        token_previous_secrets: auth_opts.token_previous_secrets,
        access_token_ttl_seconds: auth_opts.access_token_ttl_seconds,
        verification_token_ttl_seconds: auth_opts.verification_token_ttl_seconds,
        password_reset_ttl_seconds: auth_opts.password_reset_ttl_seconds,
        magic_link_ttl_seconds: auth_opts.magic_link_ttl_seconds,
        bcrypt_cost: auth_opts.bcrypt_cost,
        google: oauth_opts.google,
        discord: oauth_opts.discord,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::time::Duration;

    fn unset() -> Vec<(&'static str, Option<&'static str>)> {
        [
            "ENSALUTI_DSN",
            "ENSALUTI_REDIS_URL",
            "ENSALUTI_TOKEN_SECRET",
            "ENSALUTI_TOKEN_PREVIOUS_SECRETS",
            "ENSALUTI_GOOGLE_CLIENT_ID",
            "ENSALUTI_GOOGLE_CLIENT_SECRET",
            "ENSALUTI_DISCORD_CLIENT_ID",
            "ENSALUTI_DISCORD_CLIENT_SECRET",
            "ENSALUTI_SESSION_STORE_TIMEOUT_MS",
        ]
        .into_iter()
        .map(|key| (key, None))
        .collect()
    }

    #[test]
    fn server_action_from_flags() -> Result<()> {
        temp_env::with_vars(unset(), || {
            let matches = commands::new().get_matches_from([
                "ensaluti",
                "--port",
                "9000",
                "--token-secret",
                "active",
                "--token-previous-secrets",
                "old-1, ,old-2",
                "--public-base-url",
                "https://api.ensaluti.dev/",
                "--discord-client-id",
                "discord-id",
                "--discord-client-secret",
                "discord-secret",
                "--session-store-timeout-ms",
                "250",
            ]);
            let Action::Server(args) = handler(&matches)?;

            assert_eq!(args.port, 9000);
            assert_eq!(args.public_base_url, "https://api.ensaluti.dev/");
            assert_eq!(args.token_secret.expose_secret(), "active");
            let previous: Vec<&str> = args
                .token_previous_secrets
                .iter()
                .map(|secret| secret.expose_secret())
                .collect();
            assert_eq!(previous, ["old-1", "old-2"]);
            assert!(args.dsn.is_none());
            assert!(args.redis_url.is_none());
            assert!(args.google.is_none());
            assert_eq!(
                args.discord.as_ref().map(|creds| creds.client_id.as_str()),
                Some("discord-id")
            );
            assert_eq!(args.session_store_timeout, Duration::from_millis(250));
            Ok(())
        })
    }

    #[test]
    fn blank_token_secret_is_rejected() {
        temp_env::with_vars(unset(), || {
            let matches = commands::new().get_matches_from(["ensaluti", "--token-secret", "  "]);
            assert!(handler(&matches).is_err());
        });
    }
}
