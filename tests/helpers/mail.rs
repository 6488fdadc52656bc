use async_trait::async_trait;
use countersign::errors::CountersignError;
use countersign::mailer::{EmailMessage, EmailTransport};
use std::sync::Mutex;
use std::time::Duration;

/// Captures every message instead of sending it.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<EmailMessage>>,
}

#[async_trait]
impl EmailTransport for RecordingTransport {
    async fn send(&self, message: &EmailMessage) -> Result<(), CountersignError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Waits until at least `count` messages were delivered, returning them.
    pub async fn wait_for(&self, count: usize) -> Vec<EmailMessage> {
        for _ in 0..200 {
            let sent = self.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {} email(s), only {} delivered",
            count,
            self.sent().len()
        );
    }

    pub fn sent_to(&self, address: &str) -> Vec<EmailMessage> {
        self.sent()
            .into_iter()
            .filter(|m| m.to == address)
            .collect()
    }
}

/// Pulls the token out of a consent link in an email body.
pub fn token_from_email(message: &EmailMessage) -> String {
    let start = message
        .text
        .find("token=")
        .expect("email does not contain a consent link")
        + "token=".len();
    message.text[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}
