//! NATS key-value alert provider
//!
//! Implements `AlertProvider` on two JetStream key-value buckets: one for
//! alert documents and one for login attempts. The unread feed is driven
//! by a bucket watcher, so every connected dashboard sees writes from any
//! process sharing the server.

mod client;
mod config;
mod subscriber;

pub use client::NatsClient;
pub use config::{NatsConfig, StorageType};
pub use subscriber::NatsSubscription;

use crate::error::Result;
use crate::provider::{AlertProvider, AlertSubscription, ProviderInfo};
use crate::types::{AlertQuery, LoginAttempt, NewAlert, SecurityAlert};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// NATS key-value alert provider
///
/// Wraps `NatsClient` and implements the `AlertProvider` trait.
pub struct NatsProvider {
    client: NatsClient,
}

impl NatsProvider {
    /// Connect to NATS and open the alert and login buckets
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        let client = NatsClient::connect(config).await?;
        Ok(Self { client })
    }

    /// Get the underlying NATS client for advanced usage
    pub fn client(&self) -> &NatsClient {
        &self.client
    }
}

#[async_trait]
impl AlertProvider for NatsProvider {
    async fn subscribe_unread(&self) -> Result<Box<dyn AlertSubscription>> {
        let sub = self.client.subscribe_unread().await?;
        Ok(Box::new(sub))
    }

    async fn create_alert(&self, alert: NewAlert) -> Result<SecurityAlert> {
        let alert = alert.into_alert(Utc::now())?;
        self.client.create_alert(&alert).await?;
        Ok(alert)
    }

    async fn get_alert(&self, alert_id: &str) -> Result<Option<SecurityAlert>> {
        Ok(self
            .client
            .alert_entry(alert_id)
            .await?
            .map(|(alert, _)| alert))
    }

    async fn list_alerts(&self, query: &AlertQuery) -> Result<Vec<SecurityAlert>> {
        let entries = self.client.alert_entries().await?;
        Ok(query.apply(entries.values().map(|(alert, _)| alert)))
    }

    async fn mark_read(&self, alert_id: &str) -> Result<()> {
        self.client
            .set_alert_flag(alert_id, "read", |alert| {
                !std::mem::replace(&mut alert.read, true)
            })
            .await
    }

    async fn mark_email_sent(&self, alert_id: &str) -> Result<()> {
        self.client
            .set_alert_flag(alert_id, "emailSent", |alert| {
                !std::mem::replace(&mut alert.email_sent, true)
            })
            .await
    }

    async fn record_login(&self, attempt: &LoginAttempt) -> Result<()> {
        self.client.record_login(attempt).await
    }

    async fn login_attempts(
        &self,
        email: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<LoginAttempt>> {
        self.client.login_attempts(email, since).await
    }

    async fn info(&self) -> Result<ProviderInfo> {
        let entries = self.client.alert_entries().await?;
        let unread = entries.values().filter(|(a, _)| !a.read).count() as u64;
        Ok(ProviderInfo {
            provider: "nats".to_string(),
            alerts: entries.len() as u64,
            unread,
            login_attempts: self.client.login_count().await?,
            subscribers: self.client.subscriber_count(),
        })
    }

    fn name(&self) -> &str {
        "nats"
    }
}
