use crate::error::AppResult;

const SUBJECT_PREFIX: &str = "[Usapan]";

/// An outgoing email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl Message {
    fn new(to: &str, subject: &str, body: String) -> Self {
        Self {
            to: to.to_string(),
            subject: format!("{} {}", SUBJECT_PREFIX, subject),
            body,
        }
    }

    pub fn confirm_account(to: &str, username: &str, link: &str) -> Self {
        Self::new(
            to,
            "Confirm Your Account",
            format!(
                "Dear {},\n\nWelcome to Usapan!\n\nTo confirm your account please visit:\n\n{}\n\nThe link expires in one hour.\n",
                username, link
            ),
        )
    }

    pub fn reset_password(to: &str, username: &str, link: &str) -> Self {
        Self::new(
            to,
            "Reset Your Password",
            format!(
                "Dear {},\n\nTo reset your password visit:\n\n{}\n\nIf you did not ask for a reset, ignore this message.\n",
                username, link
            ),
        )
    }

    pub fn change_email(to: &str, username: &str, link: &str) -> Self {
        Self::new(
            to,
            "Confirm your email address",
            format!(
                "Dear {},\n\nTo confirm your new email address visit:\n\n{}\n",
                username, link
            ),
        )
    }
}

/// Delivers account emails. Transport lives outside this crate.
pub trait Mailer: Send + Sync {
    fn send(&self, message: &Message) -> AppResult<()>;
}

/// Writes every message to the log instead of sending it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, message: &Message) -> AppResult<()> {
        tracing::info!(to = %message.to, subject = %message.subject, "Outgoing mail\n{}", message.body);
        Ok(())
    }
}
