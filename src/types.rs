//! Core record types for the a3s-alerts system
//!
//! All types use camelCase JSON serialization for wire compatibility with
//! the stored documents.

use crate::error::{AlertError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A security alert raised for an account
///
/// Immutable after creation except for `email_sent` (set once by the
/// notifier) and `read` (set once by an operator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityAlert {
    /// Store-assigned identifier (alert-<uuid>)
    pub id: String,

    /// Account the alert is about
    pub email: String,

    /// Consecutive failed logins that triggered the alert
    pub failed_attempts: u32,

    /// Creation time
    pub timestamp: DateTime<Utc>,

    /// End of the lockout, present only if the account was locked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lockout_until: Option<DateTime<Utc>>,

    /// Whether the notification email has been confirmed sent
    #[serde(default)]
    pub email_sent: bool,

    /// Whether an operator has acknowledged the alert
    #[serde(default)]
    pub read: bool,
}

impl SecurityAlert {
    /// Whether the lockout attached to this alert is still in force at `now`
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.lockout_until.is_some_and(|until| until > now)
    }

    /// Notification email status
    pub fn email_status(&self) -> EmailStatus {
        if self.email_sent {
            EmailStatus::Sent
        } else {
            EmailStatus::Pending
        }
    }
}

/// Notification email state of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EmailStatus {
    /// Email not yet confirmed sent
    Pending,
    /// Email confirmed sent
    Sent,
}

impl fmt::Display for EmailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Sent => f.write_str("sent"),
        }
    }
}

/// Request to create an alert; the store assigns id and timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAlert {
    pub email: String,
    pub failed_attempts: u32,
    pub lockout_until: Option<DateTime<Utc>>,
}

impl NewAlert {
    /// Alert for a burst of failed logins without a lockout
    pub fn new(email: impl Into<String>, failed_attempts: u32) -> Self {
        Self {
            email: email.into(),
            failed_attempts,
            lockout_until: None,
        }
    }

    /// Attach a lockout end time
    pub fn with_lockout_until(mut self, until: DateTime<Utc>) -> Self {
        self.lockout_until = Some(until);
        self
    }

    /// Materialize the alert as the store would persist it
    pub fn into_alert(self, now: DateTime<Utc>) -> Result<SecurityAlert> {
        let id = format!("alert-{}", uuid::Uuid::new_v4());

        if self.email.trim().is_empty() {
            return Err(AlertError::schema(id, "email must not be empty"));
        }
        if let Some(until) = self.lockout_until {
            if until < now {
                return Err(AlertError::schema(
                    id,
                    format!("lockoutUntil {} precedes timestamp {}", until, now),
                ));
            }
        }

        Ok(SecurityAlert {
            id,
            email: self.email,
            failed_attempts: self.failed_attempts,
            timestamp: now,
            lockout_until: self.lockout_until,
            email_sent: false,
            read: false,
        })
    }
}

/// Aggregate counters, recomputed on every request
///
/// Missing fields decode as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityStats {
    /// Failed logins in the trailing window
    #[serde(rename = "failedLogins24h")]
    pub failed_logins_24h: u64,

    /// Successful logins in the trailing window
    #[serde(rename = "successLogins24h")]
    pub success_logins_24h: u64,

    /// Unread alerts created in the trailing window
    pub unread_alerts: u64,

    /// Accounts currently locked
    pub locked_accounts: u64,
}

/// A single login attempt, successful or not
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginAttempt {
    /// Unique attempt identifier (login-<uuid>)
    pub id: String,

    /// Account the attempt targeted
    pub email: String,

    /// Whether authentication succeeded
    pub success: bool,

    /// When the attempt happened
    pub timestamp: DateTime<Utc>,

    /// Client address, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

impl LoginAttempt {
    /// Create an attempt stamped with the current time
    pub fn new(email: impl Into<String>, success: bool) -> Self {
        Self {
            id: format!("login-{}", uuid::Uuid::new_v4()),
            email: email.into(),
            success,
            timestamp: Utc::now(),
            ip_address: None,
        }
    }

    /// Set the client address
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    /// Override the attempt time
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Filter for listing alerts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertQuery {
    /// Only alerts for this account
    pub email: Option<String>,

    /// Only alerts with `read == false`
    pub unread_only: bool,

    /// Only alerts created at or after this time
    pub since: Option<DateTime<Utc>>,

    /// Maximum number of alerts returned (most recent first)
    pub limit: Option<usize>,
}

impl AlertQuery {
    /// Query matching every alert
    pub fn all() -> Self {
        Self::default()
    }

    /// Query matching unread alerts
    pub fn unread() -> Self {
        Self {
            unread_only: true,
            ..Self::default()
        }
    }

    pub fn for_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check a single alert against the filter (ignores `limit`)
    pub fn matches(&self, alert: &SecurityAlert) -> bool {
        if self.unread_only && alert.read {
            return false;
        }
        if let Some(ref email) = self.email {
            if &alert.email != email {
                return false;
            }
        }
        if let Some(since) = self.since {
            if alert.timestamp < since {
                return false;
            }
        }
        true
    }

    /// Filter, order by recency, and truncate
    pub fn apply<'a>(&self, alerts: impl IntoIterator<Item = &'a SecurityAlert>) -> Vec<SecurityAlert> {
        let mut matched: Vec<SecurityAlert> =
            alerts.into_iter().filter(|a| self.matches(a)).cloned().collect();
        sort_by_recency(&mut matched);
        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        matched
    }
}

/// The full set of unread alerts at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertSnapshot {
    /// Monotonically increasing per subscription source
    pub revision: u64,

    /// Unread alerts, most recent first
    pub alerts: Vec<SecurityAlert>,
}

impl AlertSnapshot {
    /// Build a snapshot from arbitrary alerts, dropping read ones
    pub fn from_alerts<'a>(
        revision: u64,
        alerts: impl IntoIterator<Item = &'a SecurityAlert>,
    ) -> Self {
        Self {
            revision,
            alerts: AlertQuery::unread().apply(alerts),
        }
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&SecurityAlert> {
        self.alerts.iter().find(|a| a.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }
}

/// Order alerts newest first; equal timestamps fall back to id order
pub fn sort_by_recency(alerts: &mut [SecurityAlert]) {
    alerts.sort_by(|a, b| match b.timestamp.cmp(&a.timestamp) {
        Ordering::Equal => a.id.cmp(&b.id),
        other => other,
    });
}
