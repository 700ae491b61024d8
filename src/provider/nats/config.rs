//! NATS provider configuration

use crate::error::{AlertError, Result};
use serde::{Deserialize, Serialize};

/// JetStream storage backend for the key-value buckets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageType {
    /// Persist to disk
    #[default]
    File,
    /// Keep in server memory (lost on server restart)
    Memory,
}

/// NATS key-value store configuration
///
/// Alerts live in one bucket keyed by alert id; login attempts in a
/// second bucket whose entries expire after `login_retention_secs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NatsConfig {
    /// Server URL
    pub url: String,

    /// Optional auth token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Bucket holding alert documents
    pub alerts_bucket: String,

    /// Bucket holding login attempt documents
    pub logins_bucket: String,

    /// Storage backend for both buckets
    pub storage: StorageType,

    /// How long login attempts are retained (must cover the stats window)
    pub login_retention_secs: u64,

    /// Connect timeout
    pub connect_timeout_secs: u64,

    /// Request timeout
    pub request_timeout_secs: u64,

    /// Compare-and-set attempts for flag updates before giving up
    pub max_update_attempts: u32,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            token: None,
            alerts_bucket: "SECURITY_ALERTS".to_string(),
            logins_bucket: "SECURITY_LOGINS".to_string(),
            storage: StorageType::File,
            login_retention_secs: 7 * 24 * 3600,
            connect_timeout_secs: 5,
            request_timeout_secs: 10,
            max_update_attempts: 5,
        }
    }
}

impl NatsConfig {
    /// Check bucket names and limits before connecting
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(AlertError::Config("NATS url must not be empty".to_string()));
        }
        for bucket in [&self.alerts_bucket, &self.logins_bucket] {
            if !is_valid_bucket(bucket) {
                return Err(AlertError::Config(format!(
                    "Invalid bucket name '{}': use letters, digits, '-' or '_'",
                    bucket
                )));
            }
        }
        if self.alerts_bucket == self.logins_bucket {
            return Err(AlertError::Config(
                "Alerts and logins must use different buckets".to_string(),
            ));
        }
        if self.max_update_attempts == 0 {
            return Err(AlertError::Config(
                "max_update_attempts must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn is_valid_bucket(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
