//! Alert notifier: email the account owner and flip `emailSent`
//!
//! Mail transport sits behind the `Mailer` trait. Failed deliveries are
//! not surfaced to the dashboard; they are logged, kept in a bounded
//! failure log, and retried on the next dispatch because `emailSent`
//! stays false.

use crate::error::{AlertError, Result};
use crate::provider::AlertProvider;
use crate::types::{AlertQuery, SecurityAlert};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A rendered alert notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEmail {
    pub alert_id: String,
    pub to: String,
    pub from: String,
    pub subject: String,
    pub text_body: String,
}

impl AlertEmail {
    /// Render the notification for an alert
    pub fn from_alert(alert: &SecurityAlert, from: &str) -> Self {
        let mut body = format!(
            "We detected {} failed sign-in attempts on your account ({}) at {}.",
            alert.failed_attempts,
            alert.email,
            alert.timestamp.to_rfc3339()
        );
        if let Some(until) = alert.lockout_until {
            body.push_str(&format!(
                "\nThe account is locked until {}.",
                until.to_rfc3339()
            ));
        }
        body.push_str("\nIf this was not you, change your password.");

        Self {
            alert_id: alert.id.clone(),
            to: alert.email.clone(),
            from: from.to_string(),
            subject: "Security alert: failed sign-in attempts".to_string(),
            text_body: body,
        }
    }
}

/// Mail transport
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Hand one email to the transport
    async fn send(&self, email: &AlertEmail) -> Result<()>;
}

/// In-memory mailer for development and testing
///
/// Collects sent emails. `fail_for` makes deliveries to one recipient fail.
#[derive(Default)]
pub struct MemoryMailer {
    sent: RwLock<Vec<AlertEmail>>,
    failing: RwLock<Vec<String>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every delivery to `recipient`
    pub async fn fail_for(&self, recipient: impl Into<String>) {
        self.failing.write().await.push(recipient.into());
    }

    /// Stop failing deliveries
    pub async fn recover(&self) {
        self.failing.write().await.clear();
    }

    /// Emails delivered so far, oldest first
    pub async fn sent(&self) -> Vec<AlertEmail> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, email: &AlertEmail) -> Result<()> {
        if self.failing.read().await.iter().any(|r| *r == email.to) {
            return Err(AlertError::Delivery(format!(
                "mailbox unavailable: {}",
                email.to
            )));
        }
        self.sent.write().await.push(email.clone());
        Ok(())
    }
}

/// Notifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotifierConfig {
    /// Sender address
    pub from: String,

    /// Upper bound on alerts handled per dispatch (0 = no limit)
    pub batch_size: usize,

    /// Failures kept in the failure log (0 = unbounded)
    pub max_failures: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            from: "security@localhost".to_string(),
            batch_size: 100,
            max_failures: 1_000,
        }
    }
}

/// A notification that could not be delivered
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryFailure {
    pub alert_id: String,
    pub email: String,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// Outcome of one dispatch pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize,
}

/// Sends notification emails for alerts that have not been notified yet
pub struct AlertNotifier {
    provider: Arc<dyn AlertProvider>,
    mailer: Arc<dyn Mailer>,
    config: NotifierConfig,
    failures: RwLock<Vec<DeliveryFailure>>,
}

impl AlertNotifier {
    pub fn new(
        provider: Arc<dyn AlertProvider>,
        mailer: Arc<dyn Mailer>,
        config: NotifierConfig,
    ) -> Result<Self> {
        if config.from.trim().is_empty() {
            return Err(AlertError::Config("from address is required".to_string()));
        }
        Ok(Self {
            provider,
            mailer,
            config,
            failures: RwLock::new(Vec::new()),
        })
    }

    /// Send an email for every alert with `emailSent = false`
    ///
    /// Oldest alerts are notified first. Only a failure to list the pending
    /// alerts is returned as an error; per-alert failures are counted in
    /// the report.
    pub async fn dispatch_pending(&self) -> Result<DispatchReport> {
        let mut pending: Vec<SecurityAlert> = self
            .provider
            .list_alerts(&AlertQuery::all())
            .await?
            .into_iter()
            .filter(|a| !a.email_sent)
            .collect();
        pending.reverse();
        if self.config.batch_size > 0 {
            pending.truncate(self.config.batch_size);
        }

        let mut report = DispatchReport::default();
        for alert in &pending {
            match self.deliver(alert).await {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    tracing::warn!(
                        alert_id = %alert.id,
                        email = %alert.email,
                        error = %e,
                        "Alert notification failed"
                    );
                    self.record_failure(alert, &e).await;
                    report.failed += 1;
                }
            }
        }

        if report.sent + report.failed > 0 {
            tracing::info!(sent = report.sent, failed = report.failed, "Alert dispatch finished");
        }
        Ok(report)
    }

    async fn deliver(&self, alert: &SecurityAlert) -> Result<()> {
        let email = AlertEmail::from_alert(alert, &self.config.from);
        self.mailer.send(&email).await?;
        self.provider.mark_email_sent(&alert.id).await?;
        tracing::debug!(alert_id = %alert.id, "Alert notification sent");
        Ok(())
    }

    async fn record_failure(&self, alert: &SecurityAlert, error: &AlertError) {
        let mut failures = self.failures.write().await;
        failures.push(DeliveryFailure {
            alert_id: alert.id.clone(),
            email: alert.email.clone(),
            reason: error.to_string(),
            failed_at: Utc::now(),
        });

        if self.config.max_failures > 0 && failures.len() > self.config.max_failures {
            let drain_count = failures.len() - self.config.max_failures;
            failures.drain(..drain_count);
        }
    }

    /// Recent delivery failures, most recent first
    pub async fn failures(&self, limit: usize) -> Vec<DeliveryFailure> {
        self.failures
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn failure_count(&self) -> usize {
        self.failures.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::memory::{Fault, MemoryProvider};
    use crate::types::NewAlert;
    use chrono::Duration;

    fn notifier(provider: Arc<MemoryProvider>, mailer: Arc<MemoryMailer>) -> AlertNotifier {
        AlertNotifier::new(provider, mailer, NotifierConfig::default()).unwrap()
    }

    #[test]
    fn test_email_rendering() {
        let now = Utc::now();
        let alert = NewAlert::new("u@x.com", 5)
            .with_lockout_until(now + Duration::minutes(15))
            .into_alert(now)
            .unwrap();

        let email = AlertEmail::from_alert(&alert, "sec@example.com");
        assert_eq!(email.to, "u@x.com");
        assert_eq!(email.alert_id, alert.id);
        assert!(email.text_body.contains("5 failed sign-in attempts"));
        assert!(email.text_body.contains("locked until"));
    }

    #[test]
    fn test_empty_from_rejected() {
        let result = AlertNotifier::new(
            Arc::new(MemoryProvider::default()),
            Arc::new(MemoryMailer::new()),
            NotifierConfig {
                from: " ".to_string(),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(AlertError::Config(_))));
    }

    #[tokio::test]
    async fn test_dispatch_marks_sent() {
        let provider = Arc::new(MemoryProvider::default());
        let mailer = Arc::new(MemoryMailer::new());
        let alert = provider.create_alert(NewAlert::new("u@x.com", 5)).await.unwrap();

        let notifier = notifier(provider.clone(), mailer.clone());
        let report = notifier.dispatch_pending().await.unwrap();
        assert_eq!(report, DispatchReport { sent: 1, failed: 0 });
        assert_eq!(mailer.sent().await.len(), 1);

        let stored = provider.get_alert(&alert.id).await.unwrap().unwrap();
        assert!(stored.email_sent);

        // Nothing left to send
        let report = notifier.dispatch_pending().await.unwrap();
        assert_eq!(report, DispatchReport::default());
        assert_eq!(mailer.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_delivery_is_logged_and_retried() {
        let provider = Arc::new(MemoryProvider::default());
        let mailer = Arc::new(MemoryMailer::new());
        mailer.fail_for("bad@x.com").await;

        let bad = provider.create_alert(NewAlert::new("bad@x.com", 5)).await.unwrap();
        provider.create_alert(NewAlert::new("good@x.com", 5)).await.unwrap();

        let notifier = notifier(provider.clone(), mailer.clone());
        let report = notifier.dispatch_pending().await.unwrap();
        assert_eq!(report, DispatchReport { sent: 1, failed: 1 });
        assert_eq!(notifier.failure_count().await, 1);

        let failures = notifier.failures(10).await;
        assert_eq!(failures[0].alert_id, bad.id);
        assert!(!provider.get_alert(&bad.id).await.unwrap().unwrap().email_sent);

        mailer.recover().await;
        let report = notifier.dispatch_pending().await.unwrap();
        assert_eq!(report, DispatchReport { sent: 1, failed: 0 });
        assert!(provider.get_alert(&bad.id).await.unwrap().unwrap().email_sent);
    }

    #[tokio::test]
    async fn test_failure_log_is_bounded() {
        let provider = Arc::new(MemoryProvider::default());
        let mailer = Arc::new(MemoryMailer::new());
        mailer.fail_for("bad@x.com").await;
        for _ in 0..5 {
            provider.create_alert(NewAlert::new("bad@x.com", 5)).await.unwrap();
        }

        let notifier = AlertNotifier::new(
            provider,
            mailer,
            NotifierConfig {
                max_failures: 3,
                ..Default::default()
            },
        )
        .unwrap();

        let report = notifier.dispatch_pending().await.unwrap();
        assert_eq!(report.failed, 5);
        assert_eq!(notifier.failure_count().await, 3);
    }

    #[tokio::test]
    async fn test_mark_sent_failure_counts_as_failed() {
        let provider = Arc::new(MemoryProvider::default());
        let mailer = Arc::new(MemoryMailer::new());
        provider.create_alert(NewAlert::new("u@x.com", 5)).await.unwrap();
        provider.fail_writes(Some(Fault::Permission)).await;

        let notifier = notifier(provider, mailer);
        let report = notifier.dispatch_pending().await.unwrap();
        assert_eq!(report, DispatchReport { sent: 0, failed: 1 });
    }

    #[tokio::test]
    async fn test_list_failure_is_returned() {
        let provider = Arc::new(MemoryProvider::default());
        provider.fail_reads(Some(Fault::Connection)).await;

        let notifier = notifier(provider, Arc::new(MemoryMailer::new()));
        assert!(notifier.dispatch_pending().await.is_err());
    }
}
