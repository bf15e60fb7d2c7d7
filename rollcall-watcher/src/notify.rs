//! Push notification transports.

use async_trait::async_trait;
use reqwest::Client;
use shared::{PushNotificationRequest, PushNotificationResponse};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{WatcherError, WatcherResult};

pub const ROLL_CALL_OPEN_TITLE: &str = "Appel ouvert";
pub const STARTUP_TITLE: &str = "RollcallBot";
pub const AUTH_FAILED_TITLE: &str = "RollcallBot: connexion impossible";

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(&self, title: &str, body: &str, recipients: &[String]) -> WatcherResult<()>;
}

/// Posts notifications as JSON to a push webhook
pub struct WebhookNotifier {
    http: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> WatcherResult<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookNotifier {
    async fn send(&self, title: &str, body: &str, recipients: &[String]) -> WatcherResult<()> {
        let request = PushNotificationRequest {
            title: title.to_string(),
            body: body.to_string(),
            recipients: recipients.to_vec(),
        };

        let response = self.http.post(&self.url).json(&request).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(WatcherError::notification(format!("{} - {}", status, body)));
        }

        let summary: PushNotificationResponse = response.json().await.unwrap_or_default();
        if let Some(failures) = summary.failure_count.filter(|count| *count > 0) {
            tracing::warn!(
                "Push service reported {} failed deliveries for '{}'",
                failures,
                title
            );
        }
        Ok(())
    }
}

/// Dispatcher used when no push service is configured
pub struct LogNotifier;

#[async_trait]
impl NotificationDispatcher for LogNotifier {
    async fn send(&self, title: &str, body: &str, recipients: &[String]) -> WatcherResult<()> {
        tracing::info!(
            "Notification for {} recipients: {} - {}",
            recipients.len(),
            title,
            body
        );
        Ok(())
    }
}

/// A notification captured by [`RecordingNotifier`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub title: String,
    pub body: String,
    pub recipients: Vec<String>,
}

/// Keeps every notification in memory, for tests
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Notifications whose title matches `title`
    pub fn sent_with_title(&self, title: &str) -> Vec<SentNotification> {
        self.sent()
            .into_iter()
            .filter(|n| n.title == title)
            .collect()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn send(&self, title: &str, body: &str, recipients: &[String]) -> WatcherResult<()> {
        self.sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(SentNotification {
                title: title.to_string(),
                body: body.to_string(),
                recipients: recipients.to_vec(),
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_recording_notifier_keeps_order() {
        let notifier = RecordingNotifier::new();
        let recipients = vec!["device".to_string()];
        assert_ok!(notifier.send(STARTUP_TITLE, "started", &recipients).await);
        assert_ok!(notifier.send(ROLL_CALL_OPEN_TITLE, "Algo", &recipients).await);

        let sent = notifier.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].title, STARTUP_TITLE);
        assert_eq!(notifier.sent_with_title(ROLL_CALL_OPEN_TITLE)[0].body, "Algo");
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        assert_ok!(LogNotifier.send("t", "b", &[]).await);
    }
}
