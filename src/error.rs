//! Error Handling Infrastructure
//!
//! This module defines all error types used by the gateway.
//! Every error maps to a stable error code, and its `Display` text is what the
//! calling agent sees as the tool's failure result.
//!
//! # Error Categories
//! - `ConnectionFailed`: Database handle could not be established or retargeted
//! - `QueryFailed`: Statement execution or result retrieval failed
//! - `PlanUnavailable`: `EXPLAIN` did not yield exactly one plan row
//! - `PlanMismatch`: The plan type contradicts the declared statement kind
//! - `NotFound`: Describe-table target does not exist
//! - `EncodingFailed`: Tabular encoding failed
//! - `InvalidInput`: Missing or ill-typed tool arguments
//! - `ConfigError`: Unusable configuration (bad DSN, unreadable config file)
//! - `Cancelled`: Caller cancellation or statement timeout

use thiserror::Error;

/// Main error type for gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Database connection could not be established or used
    #[error("{0}")]
    ConnectionFailed(String),

    /// Statement execution or result retrieval failed
    #[error("{0}")]
    QueryFailed(String),

    /// `EXPLAIN` did not return exactly one row
    #[error("unable to check query plan, refusing to execute")]
    PlanUnavailable,

    /// `EXPLAIN` reported a plan type that contradicts the declared kind
    #[error("query plan does not match expected pattern, refusing to execute")]
    PlanMismatch,

    /// Describe-table target does not exist
    #[error("table {0} does not exist")]
    NotFound(String),

    /// Tabular encoding failed (missing key or write failure)
    #[error("{0}")]
    EncodingFailed(String),

    /// Invalid input or missing required parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error (bad connection target, unreadable config file)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Invocation aborted before the statement completed
    #[error("{0}")]
    Cancelled(String),
}

impl GatewayError {
    /// Convert error to error code string
    ///
    /// Error codes are stable and suitable for programmatic handling by agents.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::QueryFailed(_) => "QUERY_FAILED",
            Self::PlanUnavailable => "PLAN_UNAVAILABLE",
            Self::PlanMismatch => "PLAN_MISMATCH",
            Self::NotFound(_) => "NOT_FOUND",
            Self::EncodingFailed(_) => "ENCODING_FAILED",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::Cancelled(_) => "CANCELLED",
        }
    }

    /// Get human-readable error message
    ///
    /// The message never contains credentials; connection targets are redacted
    /// before they reach an error.
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Create a connection failed error
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    /// Create a query failed error
    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::QueryFailed(message.into())
    }

    /// Create a not-found error for a table name
    pub fn not_found(table: impl Into<String>) -> Self {
        Self::NotFound(table.into())
    }

    /// Create an encoding error
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed(message.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Create a cancellation error
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled(message.into())
    }

    /// Whether the guard refused to run the statement
    #[must_use]
    pub const fn is_plan_rejection(&self) -> bool {
        matches!(self, Self::PlanUnavailable | Self::PlanMismatch)
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(GatewayError::connection_failed("test").error_code(), "CONNECTION_FAILED");
        assert_eq!(GatewayError::query_failed("test").error_code(), "QUERY_FAILED");
        assert_eq!(GatewayError::PlanUnavailable.error_code(), "PLAN_UNAVAILABLE");
        assert_eq!(GatewayError::PlanMismatch.error_code(), "PLAN_MISMATCH");
        assert_eq!(GatewayError::not_found("t").error_code(), "NOT_FOUND");
        assert_eq!(GatewayError::encoding_failed("test").error_code(), "ENCODING_FAILED");
        assert_eq!(GatewayError::invalid_input("test").error_code(), "INVALID_INPUT");
        assert_eq!(GatewayError::config_error("test").error_code(), "CONFIG_ERROR");
        assert_eq!(GatewayError::cancelled("test").error_code(), "CANCELLED");
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            GatewayError::PlanUnavailable.message(),
            "unable to check query plan, refusing to execute"
        );
        assert_eq!(
            GatewayError::PlanMismatch.message(),
            "query plan does not match expected pattern, refusing to execute"
        );
        assert_eq!(
            GatewayError::not_found("missing_table").message(),
            "table missing_table does not exist"
        );

        // Driver errors are surfaced verbatim
        let err = GatewayError::query_failed("Table 'db.t' doesn't exist");
        assert_eq!(err.message(), "Table 'db.t' doesn't exist");
    }

    #[test]
    fn test_plan_rejection() {
        assert!(GatewayError::PlanUnavailable.is_plan_rejection());
        assert!(GatewayError::PlanMismatch.is_plan_rejection());
        assert!(!GatewayError::query_failed("x").is_plan_rejection());
    }

    #[test]
    fn test_error_constructors() {
        let err = GatewayError::connection_failed("test");
        assert!(matches!(err, GatewayError::ConnectionFailed(_)));

        let err = GatewayError::query_failed("test");
        assert!(matches!(err, GatewayError::QueryFailed(_)));

        let err = GatewayError::not_found("test");
        assert!(matches!(err, GatewayError::NotFound(_)));

        let err = GatewayError::encoding_failed("test");
        assert!(matches!(err, GatewayError::EncodingFailed(_)));

        let err = GatewayError::invalid_input("test");
        assert!(matches!(err, GatewayError::InvalidInput(_)));

        let err = GatewayError::config_error("test");
        assert!(matches!(err, GatewayError::ConfigError(_)));

        let err = GatewayError::cancelled("test");
        assert!(matches!(err, GatewayError::Cancelled(_)));
    }
}
