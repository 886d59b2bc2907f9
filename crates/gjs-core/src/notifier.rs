//! Failure notification: an abstract sink the [`crate::job_runner::JobRunner`]
//! calls when a job fails terminally and its descriptor has
//! `notify_on_failure` set. The concrete SMTP transport is out of scope —
//! only the interface, plus two harmless default transports, ship here.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{JobError, JobResult};

/// A composed email, ready to hand to a [`MailTransport`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Email {
    pub to: Vec<String>,
    pub from: String,
    pub subject: String,
    pub body: String,
}

/// The pluggable collaborator that actually moves bytes onto the wire.
/// Never implemented by this crate beyond the two stand-ins below — a real
/// deployment supplies its own SMTP (or API-based) transport.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: &Email) -> JobResult<()>;
}

/// A transport that never actually sends mail; it logs at `warn` instead.
/// The safe default when `notifications_emails` is configured but no real
/// transport has been wired up.
pub struct LoggingMailTransport;

#[async_trait]
impl MailTransport for LoggingMailTransport {
    async fn send(&self, email: &Email) -> JobResult<()> {
        tracing::warn!(
            to = ?email.to,
            subject = %email.subject,
            "no mail transport configured; dropping failure notification"
        );
        Ok(())
    }
}

/// Collects every message handed to it in memory. Used by this crate's own
/// tests, and useful to downstream integration tests that want to assert a
/// notification was (or wasn't) sent without standing up real mail.
#[derive(Default)]
pub struct CapturingMailTransport {
    sent: Mutex<Vec<Email>>,
}

impl CapturingMailTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl MailTransport for CapturingMailTransport {
    async fn send(&self, email: &Email) -> JobResult<()> {
        self.sent.lock().push(email.clone());
        Ok(())
    }
}

/// Failure notification, abstracted over how the message actually gets
/// sent. Failures from `notify` are never fatal to the job — the
/// `JobRunner` appends them to the already-surfaced job failure instead of
/// replacing it.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, body: &str) -> JobResult<()>;
}

/// The default `Notifier`: composes a UTF-8 email from subject/body and a
/// configured recipient list, and hands it to a [`MailTransport`].
pub struct EmailNotifier<T: MailTransport> {
    transport: T,
    to: Vec<String>,
    from: String,
    subject_prefix: String,
}

impl<T: MailTransport> EmailNotifier<T> {
    pub fn new(transport: T, to: Vec<String>, from: String, subject_prefix: String) -> Self {
        Self {
            transport,
            to,
            from,
            subject_prefix,
        }
    }
}

#[async_trait]
impl<T: MailTransport> Notifier for EmailNotifier<T> {
    async fn notify(&self, subject: &str, body: &str) -> JobResult<()> {
        if self.to.is_empty() {
            return Ok(());
        }

        let email = Email {
            to: self.to.clone(),
            from: self.from.clone(),
            subject: format!("{}{}", self.subject_prefix, subject),
            body: body.to_string(),
        };

        self.transport
            .send(&email)
            .await
            .map_err(|e| JobError::Notifier(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notifies_all_configured_recipients() {
        let transport = CapturingMailTransport::new();
        let notifier = EmailNotifier::new(
            transport,
            vec!["oncall@example.com".into()],
            "gjs@example.com".into(),
            "[gjs] ".into(),
        );

        notifier.notify("Add failed", "division by zero").await.unwrap();

        let sent = notifier.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "[gjs] Add failed");
        assert_eq!(sent[0].to, vec!["oncall@example.com".to_string()]);
    }

    #[tokio::test]
    async fn skips_send_with_no_recipients() {
        let transport = CapturingMailTransport::new();
        let notifier = EmailNotifier::new(transport, vec![], "gjs@example.com".into(), "".into());
        notifier.notify("x", "y").await.unwrap();
        assert!(notifier.transport.sent().is_empty());
    }

    /// `LoggingMailTransport` is the safe default when no real transport is
    /// wired up; it only ever logs via `tracing::warn!`. This initializes a
    /// real subscriber (writing to the test harness's own output rather
    /// than stdout, so it can't interfere with other tests' captured
    /// output) to prove that code path runs cleanly end to end rather than
    /// just type-checking.
    #[tokio::test]
    async fn logging_transport_warns_instead_of_sending() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let email = Email {
            to: vec!["oncall@example.com".into()],
            from: "gjs@example.com".into(),
            subject: "Add failed".into(),
            body: "division by zero".into(),
        };

        LoggingMailTransport.send(&email).await.unwrap();
    }
}
