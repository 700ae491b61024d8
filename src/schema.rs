//! Document schema: validate raw store documents into typed records
//!
//! Every document read from a backend passes through here before it
//! reaches a subscriber or the dashboard. Malformed or partial alert
//! documents fail with `AlertError::Schema`; stats documents tolerate
//! missing counters (they read as zero) but reject negative or
//! non-integer values.

use crate::error::{AlertError, Result};
use crate::types::{LoginAttempt, SecurityAlert, SecurityStats};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

/// Required top-level fields of an alert document
pub const ALERT_REQUIRED_FIELDS: &[&str] = &["email", "failedAttempts", "timestamp"];

/// Field view over a JSON object, tagged with the document name for errors
struct Document<'a> {
    name: &'a str,
    fields: &'a Map<String, Value>,
}

impl<'a> Document<'a> {
    fn new(name: &'a str, value: &'a Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self { name, fields }),
            other => Err(AlertError::schema(
                name,
                format!("expected a JSON object, got {}", type_name(other)),
            )),
        }
    }

    fn get(&self, field: &str) -> Option<&'a Value> {
        match self.fields.get(field) {
            None | Some(Value::Null) => None,
            Some(v) => Some(v),
        }
    }

    fn require(&self, field: &str) -> Result<&'a Value> {
        self.get(field).ok_or_else(|| {
            AlertError::schema(self.name, format!("missing required field '{}'", field))
        })
    }

    fn string(&self, field: &str) -> Result<String> {
        match self.require(field)? {
            Value::String(s) if !s.trim().is_empty() => Ok(s.clone()),
            Value::String(_) => Err(self.invalid(field, "must not be empty")),
            other => Err(self.invalid(field, &format!("expected string, got {}", type_name(other)))),
        }
    }

    fn count(&self, field: &str) -> Result<Option<u64>> {
        match self.get(field) {
            None => Ok(None),
            Some(v) => v
                .as_u64()
                .map(Some)
                .ok_or_else(|| self.invalid(field, "expected a non-negative integer")),
        }
    }

    fn flag(&self, field: &str) -> Result<bool> {
        match self.get(field) {
            None => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => Err(self.invalid(field, &format!("expected bool, got {}", type_name(other)))),
        }
    }

    fn time(&self, field: &str) -> Result<Option<DateTime<Utc>>> {
        self.get(field)
            .map(|v| decode_time(v).map_err(|reason| self.invalid(field, &reason)))
            .transpose()
    }

    fn invalid(&self, field: &str, reason: &str) -> AlertError {
        AlertError::schema(self.name, format!("field '{}' {}", field, reason))
    }
}

/// Decode an alert document stored under `key`
///
/// If the document carries its own `id` it must agree with the key.
pub fn decode_alert(key: &str, value: &Value) -> Result<SecurityAlert> {
    let doc = Document::new(key, value)?;

    if let Some(id) = doc.get("id") {
        if id.as_str() != Some(key) {
            return Err(doc.invalid("id", &format!("does not match document key '{}'", key)));
        }
    }

    let email = doc.string("email")?;
    doc.require("failedAttempts")?;
    let failed_attempts: u32 = doc
        .count("failedAttempts")?
        .unwrap_or_default()
        .try_into()
        .map_err(|_| doc.invalid("failedAttempts", "out of range"))?;
    doc.require("timestamp")?;
    let timestamp = doc
        .time("timestamp")?
        .ok_or_else(|| doc.invalid("timestamp", "missing"))?;
    let lockout_until = doc.time("lockoutUntil")?;

    if let Some(until) = lockout_until {
        if until < timestamp {
            return Err(doc.invalid(
                "lockoutUntil",
                &format!("({}) precedes timestamp ({})", until, timestamp),
            ));
        }
    }

    Ok(SecurityAlert {
        id: key.to_string(),
        email,
        failed_attempts,
        timestamp,
        lockout_until,
        email_sent: doc.flag("emailSent")?,
        read: doc.flag("read")?,
    })
}

/// Decode an alert document from raw bytes
pub fn decode_alert_bytes(key: &str, bytes: &[u8]) -> Result<SecurityAlert> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| AlertError::schema(key, format!("invalid JSON: {}", e)))?;
    decode_alert(key, &value)
}

/// Decode a stats document; absent counters read as zero
pub fn decode_stats(value: &Value) -> Result<SecurityStats> {
    let doc = Document::new("stats", value)?;
    Ok(SecurityStats {
        failed_logins_24h: doc.count("failedLogins24h")?.unwrap_or(0),
        success_logins_24h: doc.count("successLogins24h")?.unwrap_or(0),
        unread_alerts: doc.count("unreadAlerts")?.unwrap_or(0),
        locked_accounts: doc.count("lockedAccounts")?.unwrap_or(0),
    })
}

/// Decode a login attempt document stored under `key`
pub fn decode_login(key: &str, bytes: &[u8]) -> Result<LoginAttempt> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| AlertError::schema(key, format!("invalid JSON: {}", e)))?;
    let doc = Document::new(key, &value)?;

    let success = match doc.require("success")? {
        Value::Bool(b) => *b,
        other => return Err(doc.invalid("success", &format!("expected bool, got {}", type_name(other)))),
    };
    doc.require("timestamp")?;

    Ok(LoginAttempt {
        id: key.to_string(),
        email: doc.string("email")?,
        success,
        timestamp: doc
            .time("timestamp")?
            .ok_or_else(|| doc.invalid("timestamp", "missing"))?,
        ip_address: doc.get("ipAddress").and_then(|v| v.as_str()).map(str::to_string),
    })
}

/// Timestamps are RFC 3339 strings or Unix milliseconds
fn decode_time(value: &Value) -> std::result::Result<DateTime<Utc>, String> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| format!("is not an RFC 3339 timestamp: {}", e)),
        Value::Number(n) => {
            let millis = n
                .as_i64()
                .ok_or_else(|| "expected integer milliseconds".to_string())?;
            Utc.timestamp_millis_opt(millis)
                .single()
                .ok_or_else(|| format!("{} is out of range", millis))
        }
        other => Err(format!("expected timestamp, got {}", type_name(other))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
