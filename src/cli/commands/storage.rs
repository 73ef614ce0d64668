use clap::{Arg, ArgMatches, Command};
use std::time::Duration;

pub const ARG_DSN: &str = "dsn";
pub const ARG_REDIS_URL: &str = "redis-url";
pub const ARG_SESSION_STORE_TIMEOUT_MS: &str = "session-store-timeout-ms";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Postgres connection string for users and accounts")
                .long_help(
                    "Postgres connection string for users and accounts. When absent an in-memory identity store is used and nothing survives a restart.",
                )
                .env("ENSALUTI_DSN"),
        )
        .arg(
            Arg::new(ARG_REDIS_URL)
                .long(ARG_REDIS_URL)
                .help("Redis URL of the shared session store, example: redis://localhost:6379/0")
                .long_help(
                    "Redis URL of the shared session store. When absent sessions live in process memory and are not shared between instances.",
                )
                .env("ENSALUTI_REDIS_URL"),
        )
        .arg(
            Arg::new(ARG_SESSION_STORE_TIMEOUT_MS)
                .long(ARG_SESSION_STORE_TIMEOUT_MS)
                .help("Upper bound for a single session store call in milliseconds")
                .env("ENSALUTI_SESSION_STORE_TIMEOUT_MS")
                .default_value("2000")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

#[derive(Debug, Clone)]
pub struct Options {
    pub dsn: Option<String>,
    pub redis_url: Option<String>,
    pub session_store_timeout: Duration,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            dsn: matches.get_one::<String>(ARG_DSN).cloned(),
            redis_url: matches.get_one::<String>(ARG_REDIS_URL).cloned(),
            session_store_timeout: Duration::from_millis(
                matches
                    .get_one::<u64>(ARG_SESSION_STORE_TIMEOUT_MS)
                    .copied()
                    .unwrap_or(2000),
            ),
        }
    }
}
