//! Alert provider trait, the core abstraction for security event stores
//!
//! All backends (NATS key-value, in-memory, etc.) implement `AlertProvider`
//! to provide a uniform API for the live unread-alert feed, statistics,
//! and the two alert mutations.

use crate::error::{AlertError, Result};
use crate::types::{AlertQuery, AlertSnapshot, LoginAttempt, NewAlert, SecurityAlert, SecurityStats};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub mod memory;
pub mod nats;

/// Core trait for security event stores
///
/// Implementations handle the transport-specific details of persisting
/// alerts and login attempts and of pushing unread-alert snapshots. The
/// `SecurityService` uses a provider to perform all operations.
#[async_trait]
pub trait AlertProvider: Send + Sync {
    /// Open a live feed of unread alerts
    ///
    /// Returns immediately. The first `next()` yields the current snapshot,
    /// then one snapshot per underlying change. Dropping the handle releases
    /// the underlying watch.
    async fn subscribe_unread(&self) -> Result<Box<dyn AlertSubscription>>;

    /// Persist a new alert, returning it with store-assigned id and timestamp
    async fn create_alert(&self, alert: NewAlert) -> Result<SecurityAlert>;

    /// Point read of a single alert
    async fn get_alert(&self, alert_id: &str) -> Result<Option<SecurityAlert>>;

    /// List alerts matching a query, most recent first
    async fn list_alerts(&self, query: &AlertQuery) -> Result<Vec<SecurityAlert>>;

    /// Set `read = true`; a no-op if the alert is already read
    async fn mark_read(&self, alert_id: &str) -> Result<()>;

    /// Set `email_sent = true`; a no-op if already set
    async fn mark_email_sent(&self, alert_id: &str) -> Result<()>;

    /// Record a login attempt
    async fn record_login(&self, attempt: &LoginAttempt) -> Result<()>;

    /// Login attempts at or after `since`, optionally for one account,
    /// oldest first
    async fn login_attempts(
        &self,
        email: Option<&str>,
        since: chrono::DateTime<Utc>,
    ) -> Result<Vec<LoginAttempt>>;

    /// Get provider info (record counts, live subscribers)
    async fn info(&self) -> Result<ProviderInfo>;

    /// Provider name (e.g., "nats", "memory")
    fn name(&self) -> &str;

    /// Aggregate statistics over the trailing `window`
    ///
    /// Recomputed on every call. Default implementation derives the
    /// counters from `login_attempts` and `list_alerts`; backends with a
    /// server-side aggregate should override.
    async fn stats(&self, window: Duration) -> Result<SecurityStats> {
        let now = Utc::now();
        let since = now.checked_sub_signed(window).ok_or_else(|| {
            AlertError::Config(format!("stats window {} is out of range", window))
        })?;

        let attempts = self.login_attempts(None, since).await?;
        let failed = attempts.iter().filter(|a| !a.success).count() as u64;
        let succeeded = attempts.len() as u64 - failed;

        let unread = self
            .list_alerts(&AlertQuery::unread().since(since))
            .await?
            .len() as u64;

        let locked: HashSet<String> = self
            .list_alerts(&AlertQuery::all())
            .await?
            .into_iter()
            .filter(|a| a.is_locked_at(now))
            .map(|a| a.email)
            .collect();

        Ok(SecurityStats {
            failed_logins_24h: failed,
            success_logins_24h: succeeded,
            unread_alerts: unread,
            locked_accounts: locked.len() as u64,
        })
    }

    /// Health check; true if the provider is connected and operational
    ///
    /// Default implementation delegates to `info()` and returns true if it succeeds.
    async fn health(&self) -> Result<bool> {
        self.info().await.map(|_| true)
    }
}

/// Live feed of unread-alert snapshots
///
/// A backend error is delivered once as `Err`; every later call returns
/// `Ok(None)`. Dropping the handle unsubscribes.
#[async_trait]
pub trait AlertSubscription: Send {
    /// Wait for the next snapshot
    async fn next(&mut self) -> Result<Option<AlertSnapshot>>;
}

/// Provider status information
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    /// Provider name
    pub provider: String,
    /// Total alerts stored
    pub alerts: u64,
    /// Alerts with `read == false`
    pub unread: u64,
    /// Login attempts retained
    pub login_attempts: u64,
    /// Number of open unread-alert subscriptions
    pub subscribers: usize,
}

/// Counts open subscriptions for `ProviderInfo::subscribers`
pub(crate) struct SubscriberGuard {
    count: Arc<AtomicUsize>,
}

impl SubscriberGuard {
    pub(crate) fn new(count: Arc<AtomicUsize>) -> Self {
        let open = count.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(open, "Unread feed subscribed");
        Self { count }
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        let open = self.count.fetch_sub(1, Ordering::SeqCst) - 1;
        tracing::debug!(open, "Unread feed released");
    }
}
