use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_GOOGLE_CLIENT_ID: &str = "google-client-id";
pub const ARG_GOOGLE_CLIENT_SECRET: &str = "google-client-secret";
pub const ARG_DISCORD_CLIENT_ID: &str = "discord-client-id";
pub const ARG_DISCORD_CLIENT_SECRET: &str = "discord-client-secret";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_GOOGLE_CLIENT_ID)
                .long(ARG_GOOGLE_CLIENT_ID)
                .help("Google OAuth client id; Google sign-in is disabled when unset")
                .env("ENSALUTI_GOOGLE_CLIENT_ID")
                .requires(ARG_GOOGLE_CLIENT_SECRET),
        )
        .arg(
            Arg::new(ARG_GOOGLE_CLIENT_SECRET)
                .long(ARG_GOOGLE_CLIENT_SECRET)
                .help("Google OAuth client secret")
                .env("ENSALUTI_GOOGLE_CLIENT_SECRET")
                .hide_env_values(true)
                .requires(ARG_GOOGLE_CLIENT_ID),
        )
        .arg(
            Arg::new(ARG_DISCORD_CLIENT_ID)
                .long(ARG_DISCORD_CLIENT_ID)
                .help("Discord OAuth client id; Discord sign-in is disabled when unset")
                .env("ENSALUTI_DISCORD_CLIENT_ID")
                .requires(ARG_DISCORD_CLIENT_SECRET),
        )
        .arg(
            Arg::new(ARG_DISCORD_CLIENT_SECRET)
                .long(ARG_DISCORD_CLIENT_SECRET)
                .help("Discord OAuth client secret")
                .env("ENSALUTI_DISCORD_CLIENT_SECRET")
                .hide_env_values(true)
                .requires(ARG_DISCORD_CLIENT_ID),
        )
}

/// Client id and secret registered with one provider.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: SecretString,
}

#[derive(Debug, Clone, Default)]
pub struct Options {
    pub google: Option<Credentials>,
    pub discord: Option<Credentials>,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            google: credentials(matches, ARG_GOOGLE_CLIENT_ID, ARG_GOOGLE_CLIENT_SECRET),
            discord: credentials(matches, ARG_DISCORD_CLIENT_ID, ARG_DISCORD_CLIENT_SECRET),
        }
    }
}

fn credentials(matches: &ArgMatches, id: &str, secret: &str) -> Option<Credentials> {
    let client_id = matches.get_one::<String>(id)?.clone();
    let client_secret = matches.get_one::<String>(secret)?.clone();
    Some(Credentials {
        client_id,
        client_secret: SecretString::from(client_secret),
    })
}
