//! # Ensaluti (Authentication & Session Lifecycle)
//!
//! `ensaluti` authenticates users (students, mentors and institutes) through
//! local credentials, OAuth (Google, Discord) and passwordless magic links, and
//! enforces a **single concurrent session per user**.
//!
//! ## Two cooperating artifacts
//!
//! Every successful login hands the caller two cookies:
//!
//! - `access_token`: a short-lived HS256 signed identity claim (see [`token`]).
//! - `session_id`: the deterministic key `session-<userId>` of the user's entry in
//!   the shared session store (see [`session`]).
//!
//! The request authenticator verifies the token on every call, re-issues it with a
//! fresh expiry and restarts the session TTL, so active users are never logged out
//! mid-use.
//!
//! ## Single session
//!
//! Because the session key is derived from the user id, at most one live entry can
//! exist per user. Logins install the entry with an atomic set-if-absent; a second
//! login while the first session is alive is rejected and a security notice is
//! mailed to the account owner.
//!
//! ## Accounts
//!
//! A user owns one account per provider (`local`, `google`, `discord`). Accounts
//! are soft-deleted on unlink and a user always keeps at least one live account
//! (see [`identity`]).

pub mod api;
pub mod cli;
pub mod identity;
pub mod oauth;
pub mod session;
pub mod token;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
