//! Best-effort outbound email.
//!
//! Request handlers hand messages to [`Mailer::enqueue`], which never blocks and
//! never fails the caller. A worker task drains the queue and delivers each
//! message on its own task, retrying with linear backoff. At most
//! `max_in_flight` deliveries run at once; the rest wait in the queue, so a
//! slow relay fills it and further messages are dropped. Delivery failures
//! only ever surface in the log.

use crate::errors::CountersignError;
use crate::settings::{Email as EmailCfg, EmailTransportKind};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), CountersignError>;
}

/// Writes messages to the log instead of sending them.
pub struct LogTransport;

#[async_trait]
impl EmailTransport for LogTransport {
    async fn send(&self, message: &EmailMessage) -> Result<(), CountersignError> {
        info!(to = %message.to, subject = %message.subject, "email (log transport)\n{}", message.text);
        Ok(())
    }
}

/// Posts each message as JSON to an HTTP mail relay.
pub struct WebhookTransport {
    client: reqwest::Client,
    url: String,
    from: String,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    from: &'a str,
    #[serde(flatten)]
    message: &'a EmailMessage,
}

impl WebhookTransport {
    pub fn new(url: String, from: String) -> Result<Self, CountersignError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CountersignError::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, url, from })
    }
}

#[async_trait]
impl EmailTransport for WebhookTransport {
    async fn send(&self, message: &EmailMessage) -> Result<(), CountersignError> {
        self.client
            .post(&self.url)
            .json(&WebhookPayload {
                from: &self.from,
                message,
            })
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| CountersignError::Transient(format!("mail relay: {e}")))?;
        Ok(())
    }
}

pub fn transport_from_settings(
    cfg: &EmailCfg,
) -> Result<Arc<dyn EmailTransport>, CountersignError> {
    match cfg.transport {
        EmailTransportKind::Log => Ok(Arc::new(LogTransport)),
        EmailTransportKind::Webhook => {
            let url = cfg.webhook_url.clone().ok_or_else(|| {
                CountersignError::Validation("email.webhook_url is required".to_string())
            })?;
            Ok(Arc::new(WebhookTransport::new(url, cfg.from.clone())?))
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl From<&EmailCfg> for RetryPolicy {
    fn from(cfg: &EmailCfg) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            backoff: Duration::from_millis(cfg.retry_backoff_ms),
        }
    }
}

/// Cloneable handle onto the outbound queue.
#[derive(Clone)]
pub struct Mailer {
    tx: mpsc::Sender<EmailMessage>,
}

impl Mailer {
    /// Spawns the delivery worker. It stops once every handle is dropped.
    pub fn start(
        transport: Arc<dyn EmailTransport>,
        capacity: usize,
        max_in_flight: usize,
        policy: RetryPolicy,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(run_worker(rx, transport, max_in_flight, policy));
        (Self { tx }, worker)
    }

    /// Queues a message. Returns false when it had to be dropped.
    pub fn enqueue(&self, message: EmailMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(message)) => {
                warn!(to = %message.to, "email queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(message)) => {
                error!(to = %message.to, "email worker stopped, dropping message");
                false
            }
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<EmailMessage>,
    transport: Arc<dyn EmailTransport>,
    max_in_flight: usize,
    policy: RetryPolicy,
) {
    let slots = Arc::new(Semaphore::new(max_in_flight.max(1)));
    loop {
        // Take a slot before dequeuing so waiting messages count against the queue
        let Ok(permit) = slots.clone().acquire_owned().await else {
            break;
        };
        let Some(message) = rx.recv().await else {
            break;
        };
        let transport = transport.clone();
        tokio::spawn(async move {
            deliver(transport.as_ref(), &message, policy).await;
            drop(permit);
        });
    }
    debug!("email worker stopped");
}

/// Sends one message, retrying per `policy`. Returns whether it went out.
pub async fn deliver(
    transport: &dyn EmailTransport,
    message: &EmailMessage,
    policy: RetryPolicy,
) -> bool {
    for attempt in 1..=policy.max_attempts {
        match transport.send(message).await {
            Ok(()) => {
                debug!(to = %message.to, attempt, "email delivered");
                return true;
            }
            Err(e) if attempt < policy.max_attempts => {
                warn!(to = %message.to, attempt, error = %e, "email delivery failed, retrying");
                tokio::time::sleep(policy.backoff * attempt).await;
            }
            Err(e) => {
                error!(to = %message.to, attempt, error = %e, "email delivery failed, giving up");
            }
        }
    }
    false
}

/// Notification carrying a recipient's consent link.
pub fn consent_request_email(
    to: &str,
    recipient_name: &str,
    file_name: &str,
    link: &str,
) -> EmailMessage {
    let text = format!(
        "Hello {recipient_name},\n\n\
         You have been asked to review and acknowledge \"{file_name}\".\n\n\
         Open the link below to read the document and record your consent:\n\
         {link}\n\n\
         This link is personal to you. Please do not forward it.\n"
    );
    let html = format!(
        "<p>Hello {name},</p>\
         <p>You have been asked to review and acknowledge <strong>{file}</strong>.</p>\
         <p><a href=\"{href}\">Review and consent</a></p>\
         <p>This link is personal to you. Please do not forward it.</p>",
        name = html_escape(recipient_name),
        file = html_escape(file_name),
        href = html_escape(link),
    );

    EmailMessage {
        to: to.to_string(),
        subject: format!("Consent requested: {file_name}"),
        text,
        html,
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Fails the first `failures` sends, then records messages.
    struct FlakyTransport {
        failures: u32,
        calls: AtomicU32,
        sent: Mutex<Vec<EmailMessage>>,
    }

    impl FlakyTransport {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EmailTransport for FlakyTransport {
        async fn send(&self, message: &EmailMessage) -> Result<(), CountersignError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(CountersignError::Transient("smtp down".to_string()));
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::from_millis(1),
        }
    }

    fn message() -> EmailMessage {
        consent_request_email(
            "jane@example.com",
            "Jane Doe",
            "nda.pdf",
            "https://consent.example.com/consent/view?token=abc",
        )
    }

    #[tokio::test]
    async fn test_deliver_retries_until_success() {
        let transport = FlakyTransport::new(2);
        assert!(deliver(&transport, &message(), policy(3)).await);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_deliver_gives_up_after_max_attempts() {
        let transport = FlakyTransport::new(10);
        assert!(!deliver(&transport, &message(), policy(3)).await);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_hands_off_to_worker() {
        let transport = Arc::new(FlakyTransport::new(0));
        let (mailer, _worker) = Mailer::start(transport.clone(), 8, 2, policy(1));

        assert!(mailer.enqueue(message()));

        for _ in 0..100 {
            if !transport.sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(transport.sent.lock().unwrap()[0].to, "jane@example.com");
    }

    /// Holds each send open for a while and tracks concurrency.
    #[derive(Default)]
    struct SlowTransport {
        in_flight: AtomicU32,
        peak: AtomicU32,
        delivered: AtomicU32,
    }

    #[async_trait]
    impl EmailTransport for SlowTransport {
        async fn send(&self, _message: &EmailMessage) -> Result<(), CountersignError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_in_flight_deliveries_are_bounded() {
        let transport = Arc::new(SlowTransport::default());
        let (mailer, _worker) = Mailer::start(transport.clone(), 4, 2, policy(1));

        let mut accepted = 0;
        for _ in 0..50 {
            if mailer.enqueue(message()) {
                accepted += 1;
            }
            tokio::task::yield_now().await;
        }
        assert!(accepted < 50, "queue never filled: accepted {accepted}");

        for _ in 0..200 {
            if transport.delivered.load(Ordering::SeqCst) == accepted {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(transport.delivered.load(Ordering::SeqCst), accepted);
        assert!(transport.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_enqueue_after_worker_stops_is_dropped_not_failed() {
        let transport = Arc::new(FlakyTransport::new(0));
        let (mailer, worker) = Mailer::start(transport, 1, 1, policy(1));
        worker.abort();
        let _ = worker.await;

        assert!(!mailer.enqueue(message()));
    }

    #[test]
    fn test_consent_email_contains_link_and_escapes_html() {
        let email = consent_request_email(
            "x@example.com",
            "<script>",
            "Terms & Conditions.pdf",
            "https://consent.example.com/consent/view?token=abc",
        );
        assert_eq!(email.subject, "Consent requested: Terms & Conditions.pdf");
        assert!(email.text.contains("https://consent.example.com/consent/view?token=abc"));
        assert!(email.html.contains("&lt;script&gt;"));
        assert!(email.html.contains("Terms &amp; Conditions.pdf"));
        assert!(!email.html.contains("<script>"));
    }
}
