//! Login monitor: raise alerts and lockouts from failed login bursts
//!
//! Records every login attempt with the provider and counts consecutive
//! failures per account inside a sliding window. When the count reaches
//! the threshold an alert is created; with lockouts enabled the alert
//! carries a `lockout_until` and further failures during the lockout do
//! not raise new alerts.
//!
//! ```rust,ignore
//! let monitor = LoginMonitor::new(provider.clone(), MonitorConfig::default())?;
//!
//! if monitor.lockout_status("user@example.com").await?.is_locked {
//!     // Reject before checking the password
//! }
//!
//! match monitor.record_attempt("user@example.com", false, Some("10.0.0.1")).await? {
//!     AttemptOutcome::AlertRaised(alert) => { /* notifier picks it up */ }
//!     _ => {}
//! }
//! ```

use crate::error::{AlertError, Result};
use crate::provider::AlertProvider;
use crate::service::config_duration;
use crate::types::{AlertQuery, LoginAttempt, NewAlert, SecurityAlert};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Login monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorConfig {
    /// Whether attempts are recorded and evaluated at all
    pub enabled: bool,

    /// Consecutive failures that raise an alert
    pub max_failed_attempts: u32,

    /// Whether an alert also locks the account
    pub lock_accounts: bool,

    /// Lockout length
    pub lockout_secs: u64,

    /// How far back consecutive failures are counted
    pub window_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_failed_attempts: 5,
            lock_accounts: true,
            lockout_secs: 15 * 60,
            window_secs: 60 * 60,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_failed_attempts == 0 {
            return Err(AlertError::Config(
                "max_failed_attempts must be >= 1".to_string(),
            ));
        }
        if self.window_secs == 0 {
            return Err(AlertError::Config("window_secs must be > 0".to_string()));
        }
        if self.lock_accounts && self.lockout_secs == 0 {
            return Err(AlertError::Config(
                "lockout_secs must be > 0 when lock_accounts is set".to_string(),
            ));
        }
        self.window()?;
        self.lockout()?;
        Ok(())
    }

    fn window(&self) -> Result<Duration> {
        config_duration("window_secs", self.window_secs)
    }

    fn lockout(&self) -> Result<Duration> {
        config_duration("lockout_secs", self.lockout_secs)
    }
}

/// Current lockout state of an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockoutStatus {
    pub email: String,

    /// Consecutive failures inside the window
    pub failed_attempts: u32,

    pub is_locked: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,
}

/// Result of recording one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Recorded; below the threshold (0 after a success)
    Allowed { failed_attempts: u32 },

    /// Threshold reached; the new alert is returned
    AlertRaised(SecurityAlert),

    /// The account is locked until the given time
    Locked { until: DateTime<Utc> },
}

/// Evaluates login attempts and raises security alerts
pub struct LoginMonitor {
    provider: Arc<dyn AlertProvider>,
    config: MonitorConfig,
}

impl LoginMonitor {
    pub fn new(provider: Arc<dyn AlertProvider>, config: MonitorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { provider, config })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Record an attempt and evaluate the account
    ///
    /// A disabled monitor records nothing and always allows.
    pub async fn record_attempt(
        &self,
        email: &str,
        success: bool,
        ip_address: Option<&str>,
    ) -> Result<AttemptOutcome> {
        if !self.config.enabled {
            return Ok(AttemptOutcome::Allowed { failed_attempts: 0 });
        }

        let mut attempt = LoginAttempt::new(email, success);
        if let Some(ip) = ip_address {
            attempt = attempt.with_ip(ip);
        }
        self.provider.record_login(&attempt).await?;

        if success {
            return Ok(AttemptOutcome::Allowed { failed_attempts: 0 });
        }

        let now = Utc::now();
        if let Some(until) = self.active_lockout(email, now).await? {
            tracing::debug!(email, %until, "Failed attempt on locked account");
            return Ok(AttemptOutcome::Locked { until });
        }

        let failures = self.consecutive_failures(email, now).await?;
        if !self.should_alert(failures) {
            return Ok(AttemptOutcome::Allowed {
                failed_attempts: failures,
            });
        }

        let mut new_alert = NewAlert::new(email, failures);
        if self.config.lock_accounts {
            let until = now
                .checked_add_signed(self.config.lockout()?)
                .ok_or_else(|| AlertError::Config("lockout end is out of range".to_string()))?;
            new_alert = new_alert.with_lockout_until(until);
        }
        let alert = self.provider.create_alert(new_alert).await?;

        tracing::info!(
            alert_id = %alert.id,
            email,
            failed_attempts = failures,
            lockout_until = ?alert.lockout_until,
            "Security alert raised"
        );

        Ok(AttemptOutcome::AlertRaised(alert))
    }

    /// Compute the current lockout state of an account
    pub async fn lockout_status(&self, email: &str) -> Result<LockoutStatus> {
        if !self.config.enabled {
            return Ok(LockoutStatus {
                email: email.to_string(),
                failed_attempts: 0,
                is_locked: false,
                locked_until: None,
            });
        }

        let now = Utc::now();
        let locked_until = self.active_lockout(email, now).await?;
        Ok(LockoutStatus {
            email: email.to_string(),
            failed_attempts: self.consecutive_failures(email, now).await?,
            is_locked: locked_until.is_some(),
            locked_until,
        })
    }

    /// Check if an account is currently locked (convenience method)
    pub async fn is_locked(&self, email: &str) -> Result<bool> {
        Ok(self.lockout_status(email).await?.is_locked)
    }

    /// With lockouts, every failure past the threshold outside a lockout
    /// alerts again; without them, one alert per full threshold of failures.
    fn should_alert(&self, failures: u32) -> bool {
        let max = self.config.max_failed_attempts;
        if self.config.lock_accounts {
            failures >= max
        } else {
            failures > 0 && failures % max == 0
        }
    }

    async fn active_lockout(&self, email: &str, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let alerts = self
            .provider
            .list_alerts(&AlertQuery::all().for_email(email))
            .await?;
        Ok(alerts
            .iter()
            .filter(|a| a.is_locked_at(now))
            .filter_map(|a| a.lockout_until)
            .max())
    }

    async fn consecutive_failures(&self, email: &str, now: DateTime<Utc>) -> Result<u32> {
        let since = now
            .checked_sub_signed(self.config.window()?)
            .ok_or_else(|| AlertError::Config("monitoring window is out of range".to_string()))?;
        let attempts = self
            .provider
            .login_attempts(Some(email), since)
            .await?;
        let failures = attempts
            .iter()
            .rev()
            .take_while(|a| !a.success)
            .count();
        Ok(u32::try_from(failures).unwrap_or(u32::MAX))
    }
}
