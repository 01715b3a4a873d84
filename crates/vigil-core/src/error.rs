use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for the Vigil system.
///
/// Subsystem crates define their own error types and implement
/// `From<SubsystemError> for VigilError` so that `?` works across crate
/// boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VigilError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for VigilError {
    fn from(err: toml::de::Error) -> Self {
        VigilError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for VigilError {
    fn from(err: toml::ser::Error) -> Self {
        VigilError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for VigilError {
    fn from(err: serde_json::Error) -> Self {
        VigilError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Vigil operations.
pub type Result<T> = std::result::Result<T, VigilError>;

// =============================================================================
// ConnectorError
// =============================================================================

/// Failure category a connector reports instead of raising.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorErrorKind {
    Timeout,
    Unavailable,
    Auth,
    Malformed,
}

impl fmt::Display for ConnectorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectorErrorKind::Timeout => "timeout",
            ConnectorErrorKind::Unavailable => "unavailable",
            ConnectorErrorKind::Auth => "auth",
            ConnectorErrorKind::Malformed => "malformed",
        };
        f.write_str(s)
    }
}

/// Typed failure captured inside a `ConnectorResult`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ConnectorError {
    pub kind: ConnectorErrorKind,
    pub message: String,
}

impl ConnectorError {
    pub fn new(kind: ConnectorErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ConnectorErrorKind::Timeout, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ConnectorErrorKind::Unavailable, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ConnectorErrorKind::Auth, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ConnectorErrorKind::Malformed, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VigilError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: VigilError = io_err.into();
        assert!(matches!(err, VigilError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_display_all_variants() {
        let cases: Vec<(VigilError, &str)> = vec![
            (
                VigilError::Config("bad key".to_string()),
                "Configuration error: bad key",
            ),
            (
                VigilError::Cache("poisoned".to_string()),
                "Cache error: poisoned",
            ),
            (
                VigilError::Session("gone".to_string()),
                "Session error: gone",
            ),
            (
                VigilError::Api("bind failed".to_string()),
                "API error: bind failed",
            ),
            (
                VigilError::Serialization("invalid json".to_string()),
                "Serialization error: invalid json",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let vigil_err: VigilError = err.unwrap_err().into();
        assert!(matches!(vigil_err, VigilError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let vigil_err: VigilError = err.unwrap_err().into();
        assert!(matches!(vigil_err, VigilError::Serialization(_)));
    }

    #[test]
    fn test_connector_error_display() {
        let err = ConnectorError::timeout("prometheus did not answer in 5000ms");
        assert_eq!(
            err.to_string(),
            "timeout: prometheus did not answer in 5000ms"
        );
        assert_eq!(ConnectorError::auth("401").to_string(), "auth: 401");
    }

    #[test]
    fn test_connector_error_into_vigil_error() {
        let err: VigilError = ConnectorError::unavailable("connection refused").into();
        assert!(matches!(err, VigilError::Connector(_)));
        assert_eq!(
            err.to_string(),
            "Connector error: unavailable: connection refused"
        );
    }

    #[test]
    fn test_connector_error_serializes_kind_snake_case() {
        let json = serde_json::to_value(ConnectorError::malformed("bad body")).unwrap();
        assert_eq!(json["kind"], "malformed");
        assert_eq!(json["message"], "bad body");
    }
}
