//! Error types for a3s-alerts

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur talking to the security alert store
#[derive(Debug, Error)]
pub enum AlertError {
    /// The store cannot be reached (connect, transport, or stream failure)
    #[error("Connection error: {0}")]
    Connection(String),

    /// The caller lacks rights for the requested operation
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Alert not found
    #[error("Alert not found: {0}")]
    NotFound(String),

    /// A mutation was rejected by the store
    #[error("Failed to update alert '{alert_id}': {reason}")]
    Write {
        alert_id: String,
        reason: String,
    },

    /// A stored document does not match the expected shape
    #[error("Malformed document '{document}': {reason}")]
    Schema {
        document: String,
        reason: String,
    },

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// A notification email could not be handed to the mail transport
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Coarse error classes reported to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorClass {
    Connectivity,
    Permission,
    NotFound,
    Write,
    Schema,
}

impl AlertError {
    /// Build a schema error for a document
    pub fn schema(document: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Schema {
            document: document.into(),
            reason: reason.into(),
        }
    }

    /// Build a write error for an alert
    pub fn write(alert_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Write {
            alert_id: alert_id.into(),
            reason: reason.into(),
        }
    }

    /// Classify the error for display
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Connection(_) | Self::Timeout(_) | Self::Delivery(_) => {
                ErrorClass::Connectivity
            }
            Self::Permission(_) => ErrorClass::Permission,
            Self::NotFound(_) => ErrorClass::NotFound,
            Self::Write { .. } | Self::Config(_) => ErrorClass::Write,
            Self::Schema { .. } | Self::Serialization(_) => ErrorClass::Schema,
        }
    }

    /// True for failures of a one-shot read (stats, point lookups)
    ///
    /// These are the errors a caller may retry manually; nothing in this
    /// crate retries them automatically.
    pub fn is_retrieval(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Permission(_) | Self::Timeout(_)
        )
    }
}

/// Result type alias for alert operations
pub type Result<T> = std::result::Result<T, AlertError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            AlertError::Connection("down".into()).class(),
            ErrorClass::Connectivity
        );
        assert_eq!(
            AlertError::Timeout("5s".into()).class(),
            ErrorClass::Connectivity
        );
        assert_eq!(
            AlertError::Delivery("smtp down".into()).class(),
            ErrorClass::Connectivity
        );
        assert_eq!(
            AlertError::Permission("nope".into()).class(),
            ErrorClass::Permission
        );
        assert_eq!(
            AlertError::NotFound("alert-1".into()).class(),
            ErrorClass::NotFound
        );
        assert_eq!(
            AlertError::write("alert-1", "rejected").class(),
            ErrorClass::Write
        );
        assert_eq!(
            AlertError::schema("alert-1", "missing email").class(),
            ErrorClass::Schema
        );
    }

    #[test]
    fn test_is_retrieval() {
        assert!(AlertError::Connection("x".into()).is_retrieval());
        assert!(AlertError::Permission("x".into()).is_retrieval());
        assert!(!AlertError::NotFound("x".into()).is_retrieval());
        assert!(!AlertError::write("a", "b").is_retrieval());
        assert!(!AlertError::Delivery("x".into()).is_retrieval());
    }

    #[test]
    fn test_error_display() {
        let err = AlertError::write("alert-42", "revision mismatch");
        assert_eq!(
            err.to_string(),
            "Failed to update alert 'alert-42': revision mismatch"
        );

        let err = AlertError::schema("alert-7", "missing field 'email'");
        assert!(err.to_string().contains("alert-7"));
    }
}
