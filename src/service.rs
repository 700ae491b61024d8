//! High-level security service built on pluggable providers
//!
//! `SecurityService` is what a dashboard talks to: the live unread feed,
//! windowed statistics, and mark-as-read, on top of any `AlertProvider`.

use crate::error::{AlertError, Result};
use crate::provider::{AlertProvider, AlertSubscription, ProviderInfo};
use crate::types::{AlertQuery, SecurityAlert, SecurityStats};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on any configured duration (100 years)
pub const MAX_CONFIG_SECS: u64 = 100 * 365 * 24 * 3600;

/// Convert a configured number of seconds into a `chrono::Duration`
pub(crate) fn config_duration(field: &str, secs: u64) -> Result<chrono::Duration> {
    if secs > MAX_CONFIG_SECS {
        return Err(AlertError::Config(format!(
            "{} must be <= {} (got {})",
            field, MAX_CONFIG_SECS, secs
        )));
    }
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| AlertError::Config(format!("{} is out of range ({})", field, secs)))
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceConfig {
    /// Trailing window for the login and unread counters
    pub stats_window_secs: u64,

    /// Upper bound on a stats request (0 = no limit)
    pub stats_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            stats_window_secs: 24 * 3600,
            stats_timeout_secs: 30,
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.stats_window_secs == 0 {
            return Err(AlertError::Config(
                "stats_window_secs must be > 0".to_string(),
            ));
        }
        config_duration("stats_window_secs", self.stats_window_secs)?;
        config_duration("stats_timeout_secs", self.stats_timeout_secs)?;
        Ok(())
    }

    fn stats_window(&self) -> Result<chrono::Duration> {
        config_duration("stats_window_secs", self.stats_window_secs)
    }
}

/// High-level security alert API backed by a pluggable provider
pub struct SecurityService {
    provider: Arc<dyn AlertProvider>,
    config: ServiceConfig,
}

impl SecurityService {
    /// Create a service with the default configuration
    pub fn new(provider: impl AlertProvider + 'static) -> Self {
        Self::from_shared(Arc::new(provider))
    }

    /// Create a service over a provider that is also used elsewhere
    /// (a `LoginMonitor`, an `AlertNotifier`, a test harness)
    pub fn from_shared(provider: Arc<dyn AlertProvider>) -> Self {
        Self {
            provider,
            config: ServiceConfig::default(),
        }
    }

    /// Create a service with an explicit configuration
    pub fn with_config(
        provider: impl AlertProvider + 'static,
        config: ServiceConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            provider: Arc::new(provider),
            config,
        })
    }

    /// Get the provider name
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Get the configuration
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Open a live feed of unread alerts
    pub async fn subscribe_unread_alerts(&self) -> Result<Box<dyn AlertSubscription>> {
        let sub = self.provider.subscribe_unread().await?;
        tracing::info!(provider = self.provider.name(), "Unread alert feed opened");
        Ok(sub)
    }

    /// Compute statistics over the configured window
    ///
    /// One-shot; failures are returned to the caller and never retried here.
    pub async fn get_stats(&self) -> Result<SecurityStats> {
        let window = self.config.stats_window()?;
        let request = self.provider.stats(window);

        let result = if self.config.stats_timeout_secs > 0 {
            let limit = Duration::from_secs(self.config.stats_timeout_secs);
            tokio::time::timeout(limit, request).await.map_err(|_| {
                AlertError::Timeout(format!(
                    "stats request exceeded {}s",
                    self.config.stats_timeout_secs
                ))
            })?
        } else {
            request.await
        };

        match &result {
            Ok(stats) => tracing::debug!(
                failed = stats.failed_logins_24h,
                succeeded = stats.success_logins_24h,
                unread = stats.unread_alerts,
                locked = stats.locked_accounts,
                "Stats loaded"
            ),
            Err(e) => tracing::warn!(error = %e, "Stats request failed"),
        }
        result
    }

    /// Acknowledge an alert; acknowledging twice is not an error
    pub async fn mark_alert_read(&self, alert_id: &str) -> Result<()> {
        match self.provider.mark_read(alert_id).await {
            Ok(()) => {
                tracing::info!(alert_id, "Alert marked read");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(alert_id, error = %e, "Failed to mark alert read");
                Err(e)
            }
        }
    }

    /// Point read of an alert
    pub async fn get_alert(&self, alert_id: &str) -> Result<Option<SecurityAlert>> {
        self.provider.get_alert(alert_id).await
    }

    /// List alerts matching a query
    pub async fn list_alerts(&self, query: &AlertQuery) -> Result<Vec<SecurityAlert>> {
        self.provider.list_alerts(query).await
    }

    /// Get provider info
    pub async fn info(&self) -> Result<ProviderInfo> {
        self.provider.info().await
    }

    /// Check provider health
    pub async fn health(&self) -> Result<bool> {
        self.provider.health().await
    }

    /// Get a reference to the underlying provider
    pub fn provider(&self) -> &dyn AlertProvider {
        self.provider.as_ref()
    }

    /// Get a shared handle to the underlying provider
    pub fn shared_provider(&self) -> Arc<dyn AlertProvider> {
        Arc::clone(&self.provider)
    }
}
