//! Error types for schemaforge

use thiserror::Error;

/// Result type for schemaforge operations
pub type Result<T> = std::result::Result<T, ForgeError>;

/// A single field-level reason a candidate schema was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Field the violation is about
    pub field: String,
    /// Human-readable reason
    pub reason: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// schemaforge errors
#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("Schema registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("Subject not found: {0}")]
    SubjectNotFound(String),

    #[error("Version not found: {subject} version {version}")]
    VersionNotFound { subject: String, version: String },

    #[error("Subject already exists: {0}")]
    SubjectAlreadyExists(String),

    #[error("Incompatible schema for {subject}: {}", join_violations(.violations))]
    IncompatibleSchema {
        subject: String,
        violations: Vec<Violation>,
    },

    #[error("Invalid schema: {}", .0.join("; "))]
    InvalidSchema(Vec<String>),

    #[error("Unsupported target language: {0}")]
    UnsupportedTarget(String),

    #[error("Unsupported type for field '{field}': {field_type}")]
    UnsupportedFieldType { field: String, field_type: String },

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Schema immutability violation: {subject} id {id} is already registered")]
    ImmutabilityViolation { subject: String, id: u32 },

    #[error("Delivery to topic '{topic}' failed: {reason}")]
    DeliveryFailed { topic: String, reason: String },

    #[error("Failed to deserialize {subject} message: {reason}")]
    DeserializationFailed { subject: String, reason: String },

    #[error("Serialization failed for {subject}: {reason}")]
    SerializationFailed { subject: String, reason: String },

    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("Invalid handle state: cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Semver error: {0}")]
    Semver(#[from] semver::Error),

    #[error("Avro error: {0}")]
    Avro(#[from] apache_avro::Error),
}

impl ForgeError {
    /// Whether retrying the same call later may succeed without changing input
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ForgeError::RegistryUnavailable(_)
                | ForgeError::DeliveryFailed { .. }
                | ForgeError::BrokerUnavailable(_)
        )
    }

    /// Fields named by an `IncompatibleSchema` rejection
    pub fn violating_fields(&self) -> Vec<&str> {
        match self {
            ForgeError::IncompatibleSchema { violations, .. } => {
                violations.iter().map(|v| v.field.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

impl From<config_crate::ConfigError> for ForgeError {
    fn from(err: config_crate::ConfigError) -> Self {
        ForgeError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incompatible_display_names_fields() {
        let err = ForgeError::IncompatibleSchema {
            subject: "UserSignupEvent".to_string(),
            violations: vec![Violation {
                field: "email".to_string(),
                reason: "required field removed".to_string(),
            }],
        };
        assert_eq!(
            err.to_string(),
            "Incompatible schema for UserSignupEvent: email: required field removed"
        );
        assert_eq!(err.violating_fields(), vec!["email"]);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ForgeError::RegistryUnavailable("down".into()).is_retryable());
        assert!(ForgeError::DeliveryFailed {
            topic: "t".into(),
            reason: "nack".into()
        }
        .is_retryable());
        assert!(!ForgeError::SubjectNotFound("x".into()).is_retryable());
        assert!(!ForgeError::UnsupportedTarget("cobol".into()).is_retryable());
    }
}
