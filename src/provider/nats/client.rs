//! NATS key-value client: connect, read, compare-and-set, watch

use super::config::{NatsConfig, StorageType};
use super::subscriber::NatsSubscription;
use crate::error::{AlertError, Result};
use crate::provider::SubscriberGuard;
use crate::schema;
use crate::types::{LoginAttempt, SecurityAlert};
use async_nats::jetstream::{self, kv};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// NATS key-value client
///
/// Low-level client over two JetStream key-value buckets. Alert flag
/// updates use revision-checked writes so concurrent writers never
/// clear a flag another writer set.
pub struct NatsClient {
    /// NATS client connection
    client: async_nats::Client,

    /// Alert documents, keyed by alert id
    alerts: kv::Store,

    /// Login attempt documents, keyed by attempt id
    logins: kv::Store,

    /// Open unread-alert watches
    subscribers: Arc<AtomicUsize>,

    /// Configuration
    config: Arc<NatsConfig>,
}

impl NatsClient {
    /// Connect to NATS and open (or create) both buckets
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        config.validate()?;
        let connect_opts = build_connect_options(&config);

        let client = connect_opts
            .connect(&config.url)
            .await
            .map_err(|e| AlertError::Connection(format!("{}: {}", config.url, e)))?;

        tracing::info!(url = %config.url, "Connected to NATS");

        let js = jetstream::new(client.clone());
        let alerts = ensure_bucket(&js, &config.alerts_bucket, config.storage, Duration::ZERO).await?;
        let logins = ensure_bucket(
            &js,
            &config.logins_bucket,
            config.storage,
            Duration::from_secs(config.login_retention_secs),
        )
        .await?;

        Ok(Self {
            client,
            alerts,
            logins,
            subscribers: Arc::new(AtomicUsize::new(0)),
            config: Arc::new(config),
        })
    }

    /// Store a newly created alert; fails if the id already exists
    pub async fn create_alert(&self, alert: &SecurityAlert) -> Result<u64> {
        let payload = serde_json::to_vec(alert)?;
        let revision = self
            .alerts
            .create(&alert.id, Bytes::from(payload))
            .await
            .map_err(|e| AlertError::write(&alert.id, e.to_string()))?;

        tracing::debug!(alert_id = %alert.id, revision, "Alert stored");
        Ok(revision)
    }

    /// Read one alert with its revision
    pub async fn alert_entry(&self, alert_id: &str) -> Result<Option<(SecurityAlert, u64)>> {
        let entry = self
            .alerts
            .entry(alert_id)
            .await
            .map_err(|e| classify("alert lookup", e))?;

        match entry {
            Some(entry) if matches!(entry.operation, kv::Operation::Put) => {
                let alert = schema::decode_alert_bytes(&entry.key, &entry.value)?;
                Ok(Some((alert, entry.revision)))
            }
            _ => Ok(None),
        }
    }

    /// Read every alert with its revision
    pub async fn alert_entries(&self) -> Result<HashMap<String, (SecurityAlert, u64)>> {
        let keys: Vec<String> = self
            .alerts
            .keys()
            .await
            .map_err(|e| classify("alert key listing", e))?
            .try_collect()
            .await
            .map_err(|e| classify("alert key listing", e))?;

        let mut entries = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some((alert, revision)) = self.alert_entry(&key).await? {
                entries.insert(key, (alert, revision));
            }
        }
        Ok(entries)
    }

    /// Set a boolean flag on an alert with compare-and-set
    ///
    /// `apply` returns false when the flag is already set, which ends the
    /// update without a write. A lost race re-reads and tries again, up
    /// to `max_update_attempts`.
    pub async fn set_alert_flag(
        &self,
        alert_id: &str,
        flag: &str,
        apply: impl Fn(&mut SecurityAlert) -> bool + Send + Sync,
    ) -> Result<()> {
        let mut last_error = String::new();

        for attempt in 1..=self.config.max_update_attempts {
            let (mut alert, revision) = self
                .alert_entry(alert_id)
                .await?
                .ok_or_else(|| AlertError::NotFound(alert_id.to_string()))?;

            if !apply(&mut alert) {
                tracing::debug!(alert_id, flag, "Flag already set");
                return Ok(());
            }

            let payload = serde_json::to_vec(&alert)?;
            match self
                .alerts
                .update(alert_id, Bytes::from(payload), revision)
                .await
            {
                Ok(new_revision) => {
                    tracing::info!(alert_id, flag, revision = new_revision, "Alert updated");
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(alert_id, flag, attempt, error = %e, "Alert update conflict");
                    last_error = e.to_string();
                }
            }
        }

        Err(AlertError::write(alert_id, last_error))
    }

    /// Store a login attempt
    pub async fn record_login(&self, attempt: &LoginAttempt) -> Result<()> {
        let payload = serde_json::to_vec(attempt)?;
        self.logins
            .put(&attempt.id, Bytes::from(payload))
            .await
            .map_err(|e| classify("login record", e))?;
        Ok(())
    }

    /// Read retained login attempts at or after `since`
    pub async fn login_attempts(
        &self,
        email: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<LoginAttempt>> {
        let keys: Vec<String> = self
            .logins
            .keys()
            .await
            .map_err(|e| classify("login key listing", e))?
            .try_collect()
            .await
            .map_err(|e| classify("login key listing", e))?;

        let mut attempts = Vec::new();
        for key in keys {
            let value = self
                .logins
                .get(&key)
                .await
                .map_err(|e| classify("login lookup", e))?;
            // Expired between listing and read
            let Some(value) = value else { continue };

            let attempt = schema::decode_login(&key, &value)?;
            if attempt.timestamp >= since && email.map_or(true, |e| attempt.email == e) {
                attempts.push(attempt);
            }
        }

        attempts.sort_by_key(|a| a.timestamp);
        Ok(attempts)
    }

    /// Count retained login attempts
    pub async fn login_count(&self) -> Result<u64> {
        let keys = self
            .logins
            .keys()
            .await
            .map_err(|e| classify("login key listing", e))?;
        let count = keys.count().await;
        Ok(count as u64)
    }

    /// Open a live unread-alert feed
    ///
    /// The watcher starts before the initial read, so a write landing in
    /// between is seen at least once; stale revisions are dropped by the
    /// subscription.
    pub async fn subscribe_unread(&self) -> Result<NatsSubscription> {
        let watch = self
            .alerts
            .watch_all()
            .await
            .map_err(|e| classify("alert watch", e))?;
        let updates = watch.map(|item| item.map_err(|e| e.to_string())).boxed();

        let initial = self.alert_entries().await?;

        tracing::info!(
            bucket = %self.config.alerts_bucket,
            alerts = initial.len(),
            "Unread alert watch opened"
        );

        let guard = SubscriberGuard::new(self.subscribers.clone());
        Ok(NatsSubscription::new(updates, initial, guard))
    }

    /// Number of open unread-alert watches
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::SeqCst)
    }

    /// Get the underlying NATS client
    pub fn nats_client(&self) -> &async_nats::Client {
        &self.client
    }

    /// Get the configuration
    pub fn config(&self) -> &NatsConfig {
        &self.config
    }
}

/// Map a NATS error onto the connectivity/permission taxonomy
pub(crate) fn classify(operation: &str, err: impl std::fmt::Display) -> AlertError {
    let message = format!("{} failed: {}", operation, err);
    let lower = message.to_ascii_lowercase();
    if lower.contains("permission") || lower.contains("authorization") {
        AlertError::Permission(message)
    } else if lower.contains("timed out") || lower.contains("timeout") {
        AlertError::Timeout(message)
    } else {
        AlertError::Connection(message)
    }
}

/// Build NATS connect options from config
fn build_connect_options(config: &NatsConfig) -> async_nats::ConnectOptions {
    let mut opts = async_nats::ConnectOptions::new()
        .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
        .request_timeout(Some(Duration::from_secs(config.request_timeout_secs)));

    if let Some(ref token) = config.token {
        opts = opts.token(token.clone());
    }

    opts
}

/// Open a key-value bucket, creating it on first use
async fn ensure_bucket(
    js: &jetstream::Context,
    bucket: &str,
    storage: StorageType,
    max_age: Duration,
) -> Result<kv::Store> {
    if let Ok(store) = js.get_key_value(bucket).await {
        tracing::debug!(bucket, "Key-value bucket opened");
        return Ok(store);
    }

    let storage = match storage {
        StorageType::File => jetstream::stream::StorageType::File,
        StorageType::Memory => jetstream::stream::StorageType::Memory,
    };

    let store = js
        .create_key_value(kv::Config {
            bucket: bucket.to_string(),
            history: 1,
            max_age,
            storage,
            ..Default::default()
        })
        .await
        .map_err(|e| classify(&format!("create bucket '{}'", bucket), e))?;

    tracing::info!(bucket, ?max_age, "Key-value bucket created");
    Ok(store)
}
