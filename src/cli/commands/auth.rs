use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_TOKEN_SECRET: &str = "token-secret";
pub const ARG_TOKEN_PREVIOUS_SECRETS: &str = "token-previous-secrets";
pub const ARG_ACCESS_TOKEN_TTL_SECONDS: &str = "access-token-ttl-seconds";
pub const ARG_VERIFICATION_TOKEN_TTL_SECONDS: &str = "verification-token-ttl-seconds";
pub const ARG_PASSWORD_RESET_TTL_SECONDS: &str = "password-reset-ttl-seconds";
pub const ARG_MAGIC_LINK_TTL_SECONDS: &str = "magic-link-ttl-seconds";
pub const ARG_BCRYPT_COST: &str = "bcrypt-cost";

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    with_link_args(command)
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TOKEN_SECRET)
                .long(ARG_TOKEN_SECRET)
                .help("Secret used to sign access and link tokens")
                .env("ENSALUTI_TOKEN_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_PREVIOUS_SECRETS)
                .long(ARG_TOKEN_PREVIOUS_SECRETS)
                .help("Comma separated retired secrets, accepted for verification only")
                .env("ENSALUTI_TOKEN_PREVIOUS_SECRETS")
                .hide_env_values(true)
                .value_delimiter(','),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .long(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .help("Access token and session TTL in seconds, restarted on every request")
                .env("ENSALUTI_ACCESS_TOKEN_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_BCRYPT_COST)
                .long(ARG_BCRYPT_COST)
                .help("bcrypt cost factor for local passwords")
                .env("ENSALUTI_BCRYPT_COST")
                .default_value("10")
                .value_parser(clap::value_parser!(u32).range(4..=31)),
        )
}

fn with_link_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERIFICATION_TOKEN_TTL_SECONDS)
                .long(ARG_VERIFICATION_TOKEN_TTL_SECONDS)
                .help("Email verification link TTL in seconds")
                .env("ENSALUTI_VERIFICATION_TOKEN_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_PASSWORD_RESET_TTL_SECONDS)
                .long(ARG_PASSWORD_RESET_TTL_SECONDS)
                .help("Password reset link TTL in seconds")
                .env("ENSALUTI_PASSWORD_RESET_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_MAGIC_LINK_TTL_SECONDS)
                .long(ARG_MAGIC_LINK_TTL_SECONDS)
                .help("Magic sign-in link TTL in seconds")
                .env("ENSALUTI_MAGIC_LINK_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

#[derive(Debug, Clone)]
pub struct Options {
    pub token_secret: SecretString,
    pub token_previous_secrets: Vec<SecretString>,
    pub access_token_ttl_seconds: u64,
    pub verification_token_ttl_seconds: u64,
    pub password_reset_ttl_seconds: u64,
    pub magic_link_ttl_seconds: u64,
    pub bcrypt_cost: u32,
}

impl Options {
    /// # Errors
    /// Returns an error if the signing secret is missing or empty.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let token_secret = matches
            .get_one::<String>(ARG_TOKEN_SECRET)
            .filter(|secret| !secret.trim().is_empty())
            .cloned()
            .context("missing required argument: --token-secret")?;
        let token_previous_secrets = matches
            .get_many::<String>(ARG_TOKEN_PREVIOUS_SECRETS)
            .map(|values| {
                values
                    .map(|secret| secret.trim())
                    .filter(|secret| !secret.is_empty())
                    .map(|secret| SecretString::from(secret.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        let seconds =
            |id: &str, default: u64| matches.get_one::<u64>(id).copied().unwrap_or(default);

        Ok(Self {
            token_secret: SecretString::from(token_secret),
            token_previous_secrets,
            access_token_ttl_seconds: seconds(ARG_ACCESS_TOKEN_TTL_SECONDS, 300),
            verification_token_ttl_seconds: seconds(ARG_VERIFICATION_TOKEN_TTL_SECONDS, 3600),
            password_reset_ttl_seconds: seconds(ARG_PASSWORD_RESET_TTL_SECONDS, 3600),
            magic_link_ttl_seconds: seconds(ARG_MAGIC_LINK_TTL_SECONDS, 900),
            bcrypt_cost: matches.get_one::<u32>(ARG_BCRYPT_COST).copied().unwrap_or(10),
        })
    }
}
