//! In-memory alert provider
//!
//! Single-process store for tests and embedded use. Snapshots are pushed
//! through a `tokio::sync::watch` channel, so a slow subscriber sees the
//! latest complete set rather than every intermediate one. Connectivity
//! and permission failures can be injected to exercise error paths.

use crate::error::{AlertError, Result};
use crate::provider::{AlertProvider, AlertSubscription, ProviderInfo, SubscriberGuard};
use crate::types::{AlertQuery, AlertSnapshot, LoginAttempt, NewAlert, SecurityAlert};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

/// Memory provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryConfig {
    /// Maximum login attempts retained; oldest are dropped first (0 = unbounded)
    #[serde(default = "default_max_login_attempts")]
    pub max_login_attempts: usize,
}

fn default_max_login_attempts() -> usize {
    100_000
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_login_attempts: default_max_login_attempts(),
        }
    }
}

/// Failure mode injected into a `MemoryProvider`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Behave as if the store were unreachable
    Connection,
    /// Behave as if the caller lacked rights
    Permission,
}

impl Fault {
    fn error(self, operation: &str) -> AlertError {
        match self {
            Self::Connection => {
                AlertError::Connection(format!("{}: memory store unreachable", operation))
            }
            Self::Permission => {
                AlertError::Permission(format!("{}: access to memory store denied", operation))
            }
        }
    }

    /// Error for a rejected mutation of `document`
    ///
    /// Permission stays `Permission`; an unreachable store rejects the write.
    fn write_error(self, operation: &str, document: &str) -> AlertError {
        match self {
            Self::Connection => AlertError::write(document, self.error(operation).to_string()),
            Self::Permission => self.error(operation),
        }
    }
}

/// Value carried by the feed channel
#[derive(Debug, Clone)]
struct Feed {
    /// Incremented by every `disconnect`
    epoch: u64,
    /// Fault of the latest `disconnect`
    fault: Option<Fault>,
    /// Current unread set; `None` while disconnected
    snapshot: Option<Arc<AlertSnapshot>>,
}

#[derive(Default)]
struct Inner {
    alerts: HashMap<String, SecurityAlert>,
    logins: VecDeque<LoginAttempt>,
    revision: u64,
    read_fault: Option<Fault>,
    write_fault: Option<Fault>,
    feed_fault: Option<Fault>,
}

/// In-memory security event store
pub struct MemoryProvider {
    config: MemoryConfig,
    inner: RwLock<Inner>,
    feed: watch::Sender<Feed>,
    subscribers: Arc<AtomicUsize>,
}

impl MemoryProvider {
    /// Create a provider with the given configuration
    pub fn new(config: MemoryConfig) -> Self {
        let initial = Feed {
            epoch: 0,
            fault: None,
            snapshot: Some(Arc::new(AlertSnapshot {
                revision: 0,
                alerts: Vec::new(),
            })),
        };
        let (feed, _) = watch::channel(initial);
        Self {
            config,
            inner: RwLock::new(Inner::default()),
            feed,
            subscribers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Insert a fully-formed alert, keeping its id and timestamp
    ///
    /// Intended for fixtures and imports. Rejects duplicates and alerts
    /// whose lockout precedes their creation time.
    pub async fn seed_alert(&self, alert: SecurityAlert) -> Result<()> {
        if let Some(until) = alert.lockout_until {
            if until < alert.timestamp {
                return Err(AlertError::schema(
                    &alert.id,
                    "lockoutUntil precedes timestamp",
                ));
            }
        }

        let mut inner = self.inner.write().await;
        if inner.alerts.contains_key(&alert.id) {
            return Err(AlertError::write(&alert.id, "alert already exists"));
        }
        inner.alerts.insert(alert.id.clone(), alert);
        self.publish(&mut inner);
        Ok(())
    }

    /// Fail reads (stats, lookups, new subscriptions) with `fault`, or clear it
    pub async fn fail_reads(&self, fault: Option<Fault>) {
        self.inner.write().await.read_fault = fault;
    }

    /// Fail writes (create, mark, record) with `fault`, or clear it
    pub async fn fail_writes(&self, fault: Option<Fault>) {
        self.inner.write().await.write_fault = fault;
    }

    /// Terminate every open feed with `fault`
    ///
    /// Feeds open at the time fail on their next `next()`, even if
    /// `reconnect` runs first. Subscriptions opened while disconnected
    /// fail on their first `next()`.
    pub async fn disconnect(&self, fault: Fault) {
        let mut inner = self.inner.write().await;
        inner.feed_fault = Some(fault);
        self.feed.send_modify(|feed| {
            feed.epoch += 1;
            feed.fault = Some(fault);
            feed.snapshot = None;
        });
        tracing::warn!(?fault, "Memory store feed disconnected");
    }

    /// Restore the feed after `disconnect`
    pub async fn reconnect(&self) {
        let mut inner = self.inner.write().await;
        inner.feed_fault = None;
        self.publish(&mut inner);
    }

    /// Push the current unread set to every subscriber
    fn publish(&self, inner: &mut Inner) {
        if inner.feed_fault.is_some() {
            return;
        }
        inner.revision += 1;
        let snapshot = AlertSnapshot::from_alerts(inner.revision, inner.alerts.values());
        tracing::debug!(
            revision = snapshot.revision,
            unread = snapshot.len(),
            "Unread snapshot published"
        );
        self.feed
            .send_modify(|feed| feed.snapshot = Some(Arc::new(snapshot)));
    }

    async fn update_alert(
        &self,
        alert_id: &str,
        apply: impl FnOnce(&mut SecurityAlert) -> bool + Send,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(fault) = inner.write_fault {
            return Err(fault.write_error("update", alert_id));
        }
        let alert = inner
            .alerts
            .get_mut(alert_id)
            .ok_or_else(|| AlertError::NotFound(alert_id.to_string()))?;
        if apply(alert) {
            self.publish(&mut inner);
        }
        Ok(())
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

#[async_trait]
impl AlertProvider for MemoryProvider {
    async fn subscribe_unread(&self) -> Result<Box<dyn AlertSubscription>> {
        if let Some(fault) = self.inner.read().await.read_fault {
            return Err(fault.error("subscribe"));
        }
        let rx = self.feed.subscribe();
        let epoch = rx.borrow().epoch;
        let sub = MemorySubscription {
            rx,
            epoch,
            primed: false,
            done: false,
            _guard: SubscriberGuard::new(self.subscribers.clone()),
        };
        Ok(Box::new(sub))
    }

    async fn create_alert(&self, alert: NewAlert) -> Result<SecurityAlert> {
        let alert = alert.into_alert(Utc::now())?;

        let mut inner = self.inner.write().await;
        if let Some(fault) = inner.write_fault {
            return Err(fault.write_error("create", &alert.id));
        }
        inner.alerts.insert(alert.id.clone(), alert.clone());
        self.publish(&mut inner);
        Ok(alert)
    }

    async fn get_alert(&self, alert_id: &str) -> Result<Option<SecurityAlert>> {
        let inner = self.inner.read().await;
        if let Some(fault) = inner.read_fault {
            return Err(fault.error("get_alert"));
        }
        Ok(inner.alerts.get(alert_id).cloned())
    }

    async fn list_alerts(&self, query: &AlertQuery) -> Result<Vec<SecurityAlert>> {
        let inner = self.inner.read().await;
        if let Some(fault) = inner.read_fault {
            return Err(fault.error("list_alerts"));
        }
        Ok(query.apply(inner.alerts.values()))
    }

    async fn mark_read(&self, alert_id: &str) -> Result<()> {
        self.update_alert(alert_id, |alert| !std::mem::replace(&mut alert.read, true))
            .await
    }

    async fn mark_email_sent(&self, alert_id: &str) -> Result<()> {
        self.update_alert(alert_id, |alert| {
            !std::mem::replace(&mut alert.email_sent, true)
        })
        .await
    }

    async fn record_login(&self, attempt: &LoginAttempt) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(fault) = inner.write_fault {
            return Err(fault.write_error("record_login", &attempt.id));
        }
        inner.logins.push_back(attempt.clone());
        let max = self.config.max_login_attempts;
        if max > 0 && inner.logins.len() > max {
            let excess = inner.logins.len() - max;
            inner.logins.drain(..excess);
        }
        Ok(())
    }

    async fn login_attempts(
        &self,
        email: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<LoginAttempt>> {
        let inner = self.inner.read().await;
        if let Some(fault) = inner.read_fault {
            return Err(fault.error("login_attempts"));
        }
        let mut attempts: Vec<LoginAttempt> = inner
            .logins
            .iter()
            .filter(|a| a.timestamp >= since)
            .filter(|a| email.map_or(true, |e| a.email == e))
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.timestamp);
        Ok(attempts)
    }

    async fn info(&self) -> Result<ProviderInfo> {
        let inner = self.inner.read().await;
        if let Some(fault) = inner.read_fault {
            return Err(fault.error("info"));
        }
        Ok(ProviderInfo {
            provider: "memory".to_string(),
            alerts: inner.alerts.len() as u64,
            unread: inner.alerts.values().filter(|a| !a.read).count() as u64,
            login_attempts: inner.logins.len() as u64,
            subscribers: self.subscribers.load(Ordering::SeqCst),
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Live feed handle returned by `MemoryProvider::subscribe_unread`
pub struct MemorySubscription {
    rx: watch::Receiver<Feed>,
    /// Disconnect count when the subscription was opened
    epoch: u64,
    primed: bool,
    done: bool,
    _guard: SubscriberGuard,
}

#[async_trait]
impl AlertSubscription for MemorySubscription {
    async fn next(&mut self) -> Result<Option<AlertSnapshot>> {
        if self.done {
            return Ok(None);
        }

        if self.primed {
            if self.rx.changed().await.is_err() {
                self.done = true;
                return Ok(None);
            }
        } else {
            self.primed = true;
        }

        let feed = self.rx.borrow_and_update().clone();
        match feed.snapshot {
            Some(snapshot) if feed.epoch == self.epoch => Ok(Some(snapshot.as_ref().clone())),
            _ => {
                self.done = true;
                let fault = feed.fault.unwrap_or(Fault::Connection);
                Err(fault.error("unread alert feed"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn fixture(id: &str, email: &str) -> SecurityAlert {
        SecurityAlert {
            id: id.to_string(),
            email: email.to_string(),
            failed_attempts: 5,
            timestamp: Utc::now(),
            lockout_until: None,
            email_sent: false,
            read: false,
        }
    }

    #[tokio::test]
    async fn test_first_next_replays_current_snapshot() {
        let provider = MemoryProvider::default();
        provider.seed_alert(fixture("a1", "u@x.com")).await.unwrap();

        let mut sub = provider.subscribe_unread().await.unwrap();
        let snap = sub.next().await.unwrap().unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.alerts[0].id, "a1");
    }

    #[tokio::test]
    async fn test_empty_store_yields_empty_snapshot() {
        let provider = MemoryProvider::default();
        let mut sub = provider.subscribe_unread().await.unwrap();
        let snap = sub.next().await.unwrap().unwrap();
        assert!(snap.is_empty());
    }

    #[tokio::test]
    async fn test_mark_read_removes_from_feed() {
        let provider = MemoryProvider::default();
        provider.seed_alert(fixture("a1", "u@x.com")).await.unwrap();
        provider.seed_alert(fixture("a2", "v@x.com")).await.unwrap();

        let mut sub = provider.subscribe_unread().await.unwrap();
        assert_eq!(sub.next().await.unwrap().unwrap().len(), 2);

        provider.mark_read("a1").await.unwrap();
        let snap = sub.next().await.unwrap().unwrap();
        assert_eq!(snap.len(), 1);
        assert!(!snap.contains("a1"));
    }

    #[tokio::test]
    async fn test_mark_read_idempotent() {
        let provider = MemoryProvider::default();
        provider.seed_alert(fixture("a1", "u@x.com")).await.unwrap();

        provider.mark_read("a1").await.unwrap();
        provider.mark_read("a1").await.unwrap();
        assert!(provider.get_alert("a1").await.unwrap().unwrap().read);
    }

    #[tokio::test]
    async fn test_mark_read_unknown_id() {
        let provider = MemoryProvider::default();
        let err = provider.mark_read("ghost").await.unwrap_err();
        assert!(matches!(err, AlertError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_noop_write_does_not_publish() {
        let provider = MemoryProvider::default();
        provider.seed_alert(fixture("a1", "u@x.com")).await.unwrap();
        provider.mark_read("a1").await.unwrap();

        let mut sub = provider.subscribe_unread().await.unwrap();
        let first = sub.next().await.unwrap().unwrap();

        provider.mark_read("a1").await.unwrap();
        let pending = tokio::time::timeout(std::time::Duration::from_millis(50), sub.next()).await;
        assert!(pending.is_err(), "no snapshot expected, first was {:?}", first);
    }

    #[tokio::test]
    async fn test_disconnect_terminates_feed() {
        let provider = MemoryProvider::default();
        let mut sub = provider.subscribe_unread().await.unwrap();
        sub.next().await.unwrap();

        provider.disconnect(Fault::Permission).await;
        let err = sub.next().await.unwrap_err();
        assert!(matches!(err, AlertError::Permission(_)));
        assert!(sub.next().await.unwrap().is_none());

        provider.reconnect().await;
        let mut fresh = provider.subscribe_unread().await.unwrap();
        assert!(fresh.next().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_disconnect_survives_quick_reconnect() {
        let provider = MemoryProvider::default();
        provider.seed_alert(fixture("a1", "u@x.com")).await.unwrap();
        let mut sub = provider.subscribe_unread().await.unwrap();
        sub.next().await.unwrap();

        // Reconnect lands before the subscriber polls again
        provider.disconnect(Fault::Connection).await;
        provider.reconnect().await;

        let err = sub.next().await.unwrap_err();
        assert!(matches!(err, AlertError::Connection(_)));
        assert!(sub.next().await.unwrap().is_none());

        let mut fresh = provider.subscribe_unread().await.unwrap();
        assert!(fresh.next().await.unwrap().unwrap().contains("a1"));
    }

    #[tokio::test]
    async fn test_subscribe_while_disconnected_fails_first_next() {
        let provider = MemoryProvider::default();
        provider.disconnect(Fault::Permission).await;

        let mut sub = provider.subscribe_unread().await.unwrap();
        let err = sub.next().await.unwrap_err();
        assert!(matches!(err, AlertError::Permission(_)));
    }

    #[tokio::test]
    async fn test_drop_releases_subscriber() {
        let provider = MemoryProvider::default();
        let sub = provider.subscribe_unread().await.unwrap();
        assert_eq!(provider.info().await.unwrap().subscribers, 1);
        drop(sub);
        assert_eq!(provider.info().await.unwrap().subscribers, 0);
    }

    #[tokio::test]
    async fn test_seed_rejects_duplicate_and_bad_lockout() {
        let provider = MemoryProvider::default();
        provider.seed_alert(fixture("a1", "u@x.com")).await.unwrap();
        assert!(provider.seed_alert(fixture("a1", "u@x.com")).await.is_err());

        let mut bad = fixture("a2", "u@x.com");
        bad.lockout_until = Some(bad.timestamp - Duration::minutes(1));
        assert!(matches!(
            provider.seed_alert(bad).await,
            Err(AlertError::Schema { .. })
        ));
    }

    #[tokio::test]
    async fn test_login_retention_bound() {
        let provider = MemoryProvider::new(MemoryConfig {
            max_login_attempts: 3,
        });
        for _ in 0..5 {
            provider
                .record_login(&LoginAttempt::new("u@x.com", false))
                .await
                .unwrap();
        }
        assert_eq!(provider.info().await.unwrap().login_attempts, 3);
    }

    #[tokio::test]
    async fn test_default_stats_computation() {
        let provider = MemoryProvider::default();
        let now = Utc::now();

        provider
            .record_login(&LoginAttempt::new("u@x.com", false))
            .await
            .unwrap();
        provider
            .record_login(&LoginAttempt::new("u@x.com", true))
            .await
            .unwrap();
        provider
            .record_login(&LoginAttempt::new("old@x.com", false).at(now - Duration::hours(30)))
            .await
            .unwrap();

        let mut locked = fixture("a1", "u@x.com");
        locked.lockout_until = Some(now + Duration::minutes(15));
        provider.seed_alert(locked).await.unwrap();

        let mut stale = fixture("a2", "old@x.com");
        stale.timestamp = now - Duration::hours(30);
        provider.seed_alert(stale).await.unwrap();

        let stats = provider.stats(Duration::hours(24)).await.unwrap();
        assert_eq!(stats.failed_logins_24h, 1);
        assert_eq!(stats.success_logins_24h, 1);
        assert_eq!(stats.unread_alerts, 1);
        assert_eq!(stats.locked_accounts, 1);
    }

    #[tokio::test]
    async fn test_read_fault_fails_stats() {
        let provider = MemoryProvider::default();
        provider.fail_reads(Some(Fault::Connection)).await;
        let err = provider.stats(Duration::hours(24)).await.unwrap_err();
        assert!(err.is_retrieval());

        provider.fail_reads(None).await;
        assert!(provider.stats(Duration::hours(24)).await.is_ok());
    }

    #[tokio::test]
    async fn test_write_fault_fails_mark_read() {
        let provider = MemoryProvider::default();
        provider.seed_alert(fixture("a1", "u@x.com")).await.unwrap();
        provider.fail_writes(Some(Fault::Connection)).await;

        let err = provider.mark_read("a1").await.unwrap_err();
        assert!(matches!(err, AlertError::Write { .. }));
        assert!(!provider.get_alert("a1").await.unwrap().unwrap().read);
    }

    #[tokio::test]
    async fn test_write_fault_mapping_is_uniform() {
        let provider = MemoryProvider::default();
        provider.seed_alert(fixture("a1", "u@x.com")).await.unwrap();
        provider.fail_writes(Some(Fault::Permission)).await;

        let errors = vec![
            provider.mark_read("a1").await.unwrap_err(),
            provider.mark_email_sent("a1").await.unwrap_err(),
            provider
                .create_alert(NewAlert::new("u@x.com", 5))
                .await
                .unwrap_err(),
            provider
                .record_login(&LoginAttempt::new("u@x.com", false))
                .await
                .unwrap_err(),
        ];
        for err in &errors {
            assert!(matches!(err, AlertError::Permission(_)), "got {:?}", err);
        }

        provider.fail_writes(Some(Fault::Connection)).await;
        let err = provider
            .record_login(&LoginAttempt::new("u@x.com", false))
            .await
            .unwrap_err();
        assert!(matches!(err, AlertError::Write { .. }));
    }
}
