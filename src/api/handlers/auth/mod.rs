//! Auth handlers and supporting modules.
//!
//! Every login path (password, OAuth callback, magic link) ends in
//! [`login::establish_session`], which installs the user's single session entry
//! and hands out the `access_token` and `session_id` cookies. From then on the
//! [`authenticator`] middleware renews both on every request.

pub mod authenticator;
pub mod cookies;
pub mod credentials;
pub mod login;
pub mod magic_link;
pub mod me;
pub mod oauth;
pub mod password;
pub mod principal;
pub(crate) mod state;
pub mod types;
mod utils;
pub mod verification;

pub use principal::Principal;
pub use state::{AuthConfig, AuthState};
