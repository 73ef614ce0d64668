//! Outbound email abstraction.
//!
//! Handlers never wait on delivery: [`dispatch`] spawns the send and only logs
//! failures. The default sender for local dev is [`LogEmailSender`], which logs
//! the message instead of delivering it.

use std::{future::Future, pin::Pin, sync::Arc};
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span};

pub type EmailFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailMessage {
    pub to_email: String,
    pub template: &'static str,
    pub subject: String,
    pub html: String,
}

/// Email delivery transport.
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error; the caller only logs failures.
    fn send<'a>(&'a self, message: &'a EmailMessage) -> EmailFuture<'a>;
}

#[derive(Clone, Debug, Default)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send<'a>(&'a self, message: &'a EmailMessage) -> EmailFuture<'a> {
        Box::pin(async move {
            info!(
                to_email = %message.to_email,
                template = message.template,
                subject = %message.subject,
                "email send stub"
            );
            Ok(())
        })
    }
}

/// Fire-and-forget delivery.
pub fn dispatch(sender: Arc<dyn EmailSender>, message: EmailMessage) -> JoinHandle<()> {
    let span = info_span!("email.send", template = message.template);
    tokio::spawn(
        async move {
            if let Err(err) = sender.send(&message).await {
                error!(to_email = %message.to_email, "email delivery failed: {err:#}");
            }
        }
        .instrument(span),
    )
}

pub mod templates {
    use super::EmailMessage;
    use std::time::Duration;

    /// Render a link lifetime the way a person would say it, e.g. "15 minutes" or "1 hour".
    #[must_use]
    pub fn describe_ttl(ttl: Duration) -> String {
        let seconds = ttl.as_secs();
        let (amount, unit) = if seconds >= 86_400 && seconds % 86_400 == 0 {
            (seconds / 86_400, "day")
        } else if seconds >= 3_600 && seconds % 3_600 == 0 {
            (seconds / 3_600, "hour")
        } else if seconds >= 60 && seconds % 60 == 0 {
            (seconds / 60, "minute")
        } else {
            (seconds, "second")
        };
        if amount == 1 {
            format!("1 {unit}")
        } else {
            format!("{amount} {unit}s")
        }
    }

    fn message(
        to_email: &str,
        template: &'static str,
        subject: &str,
        html: String,
    ) -> EmailMessage {
        EmailMessage {
            to_email: to_email.to_string(),
            template,
            subject: subject.to_string(),
            html,
        }
    }

    #[must_use]
    pub fn verification(to_email: &str, link: &str, ttl: Duration) -> EmailMessage {
        let expires = describe_ttl(ttl);
        message(
            to_email,
            "verification",
            "Verify your email address",
            format!(
                "<p>Welcome! Confirm your email address to finish signing up.</p>\
                 <p><a href=\"{link}\">Verify email</a></p>\
                 <p>This link expires in {expires}.</p>"
            ),
        )
    }

    #[must_use]
    pub fn welcome(to_email: &str) -> EmailMessage {
        message(
            to_email,
            "welcome",
            "Welcome aboard",
            "<p>Your account is ready. Happy learning!</p>".to_string(),
        )
    }

    #[must_use]
    pub fn magic_link(to_email: &str, link: &str, ttl: Duration) -> EmailMessage {
        let expires = describe_ttl(ttl);
        message(
            to_email,
            "magic_link",
            "Your sign-in link",
            format!(
                "<p>Use the link below to sign in. It expires in {expires}.</p>\
                 <p><a href=\"{link}\">Sign in</a></p>"
            ),
        )
    }

    #[must_use]
    pub fn password_reset(to_email: &str, link: &str, ttl: Duration) -> EmailMessage {
        let expires = describe_ttl(ttl);
        message(
            to_email,
            "password_reset",
            "Reset your password",
            format!(
                "<p>Someone asked to reset the password of this account.</p>\
                 <p><a href=\"{link}\">Choose a new password</a> within {expires}.</p>\
                 <p>If it was not you, ignore this email.</p>"
            ),
        )
    }

    /// Sent when a login is denied because the account already has a live session.
    #[must_use]
    pub fn login_threat(to_email: &str, client_ip: Option<&str>, timestamp: &str) -> EmailMessage {
        let origin = client_ip.unwrap_or("an unknown address");
        message(
            to_email,
            "login_threat",
            "Blocked sign-in attempt",
            format!(
                "<p>A sign-in to your account from {origin} at {timestamp} was blocked \
                 because the account is already signed in elsewhere.</p>\
                 <p>If this was not you, change your password.</p>"
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct ChannelSender(mpsc::UnboundedSender<EmailMessage>);

    impl EmailSender for ChannelSender {
        fn send<'a>(&'a self, message: &'a EmailMessage) -> EmailFuture<'a> {
            Box::pin(async move {
                self.0.send(message.clone())?;
                Ok(())
            })
        }
    }

    struct FailingSender;

    impl EmailSender for FailingSender {
        fn send<'a>(&'a self, _message: &'a EmailMessage) -> EmailFuture<'a> {
            Box::pin(async { Err(anyhow::anyhow!("smtp down")) })
        }
    }

    #[tokio::test]
    async fn dispatch_delivers_in_background() -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatch(Arc::new(ChannelSender(tx)), templates::welcome("user@x.com"));

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await?;
        assert_eq!(received.map(|m| m.template), Some("welcome"));
        Ok(())
    }

    #[tokio::test]
    async fn delivery_failures_are_swallowed() -> anyhow::Result<()> {
        dispatch(Arc::new(FailingSender), templates::welcome("user@x.com")).await?;
        Ok(())
    }

    #[test]
    fn login_threat_mentions_origin() {
        let at = "2024-01-01T00:00:00Z";
        let message = templates::login_threat("user@x.com", Some("203.0.113.9"), at);
        assert!(message.html.contains("203.0.113.9"));
        let unknown = templates::login_threat("user@x.com", None, at);
        assert!(unknown.html.contains("an unknown address"));
    }

    #[test]
    fn link_emails_state_the_configured_lifetime() {
        let link = "https://api.x.com/auth/magic-login?token=t";
        let magic = templates::magic_link("user@x.com", link, Duration::from_secs(30 * 60));
        assert!(magic.html.contains("expires in 30 minutes"));
        assert!(!magic.html.contains("15 minutes"));

        let verify = templates::verification("user@x.com", link, Duration::from_secs(2 * 3_600));
        assert!(verify.html.contains("expires in 2 hours"));

        let reset = templates::password_reset("user@x.com", link, Duration::from_secs(3_600));
        assert!(reset.html.contains("within 1 hour"));
    }

    #[test]
    fn lifetimes_use_the_largest_whole_unit() {
        assert_eq!(templates::describe_ttl(Duration::from_secs(900)), "15 minutes");
        assert_eq!(templates::describe_ttl(Duration::from_secs(86_400)), "1 day");
        assert_eq!(templates::describe_ttl(Duration::from_secs(90)), "90 seconds");
    }
}
