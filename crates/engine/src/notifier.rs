//! Report delivery.
//!
//! A notifier takes one failure event at a time. Delivery failures are
//! returned to the scheduler, which logs them and moves on; nothing here
//! retries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use url::Url;

use crate::error::NotifyError;
use crate::event::FailureEvent;
use crate::render::render;

/// Sink for failure events
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &FailureEvent) -> Result<(), NotifyError>;
}

/// Writes rendered reports to the log
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &FailureEvent) -> Result<(), NotifyError> {
        let report = render(event);
        tracing::error!(
            kind = %event.kind(),
            subject = %report.subject,
            "{}",
            report.body.trim_end()
        );
        Ok(())
    }
}

/// Posts reports as JSON to an HTTP endpoint
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Url,
}

impl WebhookNotifier {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// Body posted by [`WebhookNotifier`]
pub fn webhook_payload(event: &FailureEvent) -> serde_json::Value {
    let report = render(event);
    serde_json::json!({
        "subject": report.subject,
        "body": report.body,
        "event": event,
        "timestamp": Utc::now().to_rfc3339(),
    })
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &FailureEvent) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&webhook_payload(event))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Status(status.as_u16()))
        }
    }
}

/// Port on which the relay expects TLS from the first byte; other ports use STARTTLS
pub const SMTPS_PORT: u16 = 465;

/// Mail relay account used by [`SmtpNotifier`]
#[derive(Clone)]
pub struct SmtpSettings {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Sender address; the username when absent
    pub from: Option<String>,
    pub recipients: Vec<String>,
    pub timeout: Duration,
}

/// Mails each report to a fixed list of recipients
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    recipients: Vec<Mailbox>,
}

impl SmtpNotifier {
    /// Check the addresses and prepare the transport; nothing is dialled until
    /// the first report.
    pub fn new(settings: SmtpSettings) -> Result<Self, NotifyError> {
        let from: Mailbox =
            settings.from.as_deref().unwrap_or(settings.username.as_str()).parse()?;
        let recipients = settings
            .recipients
            .iter()
            .map(|recipient| recipient.parse())
            .collect::<Result<Vec<Mailbox>, _>>()?;
        if recipients.is_empty() {
            return Err(NotifyError::NoRecipients);
        }

        let builder = if settings.port == SMTPS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.server)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.server)?
        };
        let transport = builder
            .port(settings.port)
            .credentials(Credentials::new(settings.username, settings.password))
            .timeout(Some(settings.timeout))
            .build();

        Ok(Self { transport, from, recipients })
    }
}

/// Plain-text mail carrying the rendered report
pub fn email(
    event: &FailureEvent,
    from: &Mailbox,
    recipients: &[Mailbox],
) -> Result<Message, NotifyError> {
    let report = render(event);
    let mut builder = Message::builder()
        .from(from.clone())
        .subject(report.subject)
        .header(ContentType::TEXT_PLAIN);
    for recipient in recipients {
        builder = builder.to(recipient.clone());
    }
    Ok(builder.body(report.body)?)
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, event: &FailureEvent) -> Result<(), NotifyError> {
        let message = email(event, &self.from, &self.recipients)?;
        self.transport.send(message).await?;
        Ok(())
    }
}

/// Delivers to every inner notifier, failing if any of them failed
pub struct FanoutNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn notify(&self, event: &FailureEvent) -> Result<(), NotifyError> {
        let mut failed = 0;
        for notifier in &self.notifiers {
            if let Err(err) = notifier.notify(event).await {
                tracing::warn!(error = %err, "notifier failed");
                failed += 1;
            }
        }

        match failed {
            0 => Ok(()),
            failed => Err(NotifyError::Partial { failed, total: self.notifiers.len() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for Counting {
        async fn notify(&self, _event: &FailureEvent) -> Result<(), NotifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail { Err(NotifyError::Status(503)) } else { Ok(()) }
        }
    }

    fn event() -> FailureEvent {
        FailureEvent::HostUnreachable {
            target_name: "db1".to_string(),
            address: "10.0.0.5".to_string(),
            cause: "no echo reply within 1s".to_string(),
        }
    }

    #[tokio::test]
    async fn test_log_notifier_always_succeeds() {
        assert!(LogNotifier.notify(&event()).await.is_ok());
    }

    #[tokio::test]
    async fn test_fanout_reaches_everyone_and_reports_failures() {
        let ok = Arc::new(Counting { calls: AtomicUsize::new(0), fail: false });
        let broken = Arc::new(Counting { calls: AtomicUsize::new(0), fail: true });
        let notifiers: Vec<Arc<dyn Notifier>> = vec![broken.clone(), ok.clone()];
        let fanout = FanoutNotifier::new(notifiers);

        let err = fanout.notify(&event()).await.unwrap_err();

        assert!(matches!(err, NotifyError::Partial { failed: 1, total: 2 }));
        assert_eq!(ok.calls.load(Ordering::SeqCst), 1);
        assert_eq!(broken.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_email_carries_report() {
        let from: Mailbox = "watchpost@example.com".parse().unwrap();
        let recipients: Vec<Mailbox> =
            vec!["ops@example.com".parse().unwrap(), "oncall@example.com".parse().unwrap()];

        let message = email(&event(), &from, &recipients).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("From: watchpost@example.com"));
        assert!(raw.contains("ops@example.com"));
        assert!(raw.contains("oncall@example.com"));
        assert!(raw.contains("[watchpost] db1 is unreachable"));
    }

    fn smtp_settings(recipients: &[&str]) -> SmtpSettings {
        SmtpSettings {
            server: "smtp.example.com".to_string(),
            port: 587,
            username: "watchpost@example.com".to_string(),
            password: "secret".to_string(),
            from: None,
            recipients: recipients.iter().map(|r| r.to_string()).collect(),
            timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_smtp_notifier_checks_addresses() {
        assert!(SmtpNotifier::new(smtp_settings(&["ops@example.com"])).is_ok());
        assert!(matches!(
            SmtpNotifier::new(smtp_settings(&["not an address"])),
            Err(NotifyError::Address(_))
        ));
        assert!(matches!(SmtpNotifier::new(smtp_settings(&[])), Err(NotifyError::NoRecipients)));
    }

    #[test]
    fn test_webhook_payload_shape() {
        let payload = webhook_payload(&event());
        assert_eq!(payload["event"]["kind"], "host_unreachable");
        assert_eq!(payload["subject"], "[watchpost] db1 is unreachable");
        assert!(payload["timestamp"].is_string());
    }
}
