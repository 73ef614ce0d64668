use super::{
    error::ErrorBody,
    handlers::{accounts, auth, health, sessions},
};
use crate::{
    identity::{Provider, Role},
    token::IdentityClaim,
};
use utoipa::{
    OpenApi,
    openapi::{Contact, InfoBuilder, License},
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        auth::credentials::signup,
        auth::credentials::signin,
        auth::credentials::signout,
        auth::me::me,
        auth::verification::verify_email,
        auth::password::request_password_reset,
        auth::password::reset_password,
        auth::magic_link::request_magic_link,
        auth::magic_link::magic_login,
        auth::oauth::authorize,
        auth::oauth::callback,
        accounts::list,
        accounts::link_start,
        accounts::link_callback,
        accounts::unlink,
        sessions::list,
    ),
    components(schemas(
        ErrorBody,
        IdentityClaim,
        Role,
        Provider,
        health::Health,
        auth::types::SignupRequest,
        auth::types::SignupResponse,
        auth::types::SigninRequest,
        auth::types::SigninResponse,
        auth::types::MessageResponse,
        auth::types::EmailRequest,
        auth::types::PasswordResetRequest,
        accounts::LinkedAccounts,
        sessions::LiveSession,
        sessions::LiveSessions,
    )),
    tags(
        (name = "health", description = "Service and dependency status"),
        (name = "auth", description = "Sign-up, sign-in and mailed links"),
        (name = "oauth", description = "Sign-in through Google or Discord"),
        (name = "accounts", description = "Linked identity providers"),
        (name = "sessions", description = "Live session presence"),
    )
)]
struct ApiDoc;

/// The `OpenAPI` document, with info taken from Cargo metadata.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();
    info.contact = cargo_contact();
    info.license = cargo_license();
    doc.info = info;
    doc
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `:` separated and may include "Name <email>".
    let primary = env!("CARGO_PKG_AUTHORS").split(':').next().map(str::trim)?;
    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    Some(value.trim()).filter(|trimmed| !trimmed.is_empty())
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    fn non_empty(value: &str) -> Option<&str> {
        Some(value.trim()).filter(|v| !v.is_empty())
    }
    match author.split_once('<') {
        Some((name, email)) => (non_empty(name), non_empty(email.trim_end_matches('>'))),
        None => (non_empty(author), None),
    }
}
