//! Error types for the ventilation coordinator
//!
//! This module provides the error taxonomy shared by the coordinator, the
//! command dispatcher and the configuration layer, together with structured
//! error codes and logging helpers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for coordinator operations
pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Error types for coordinator operations
///
/// Every variant carries a plain message so errors can be cloned and handed
/// to every caller waiting on a shared fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// Communication-layer failure (unreachable device, broken socket)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The device rejected or failed a specific operation
    #[error("Device error: {0}")]
    Device(String),

    /// Caller-supplied parameters did not match the command schema
    #[error("Validation error: {0}")]
    Validation(String),

    /// No command is registered under the requested name
    #[error("Unrecognized command: {0}")]
    UnknownCommand(String),

    /// Fatal start-up configuration problem
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A fetch did not complete within the configured timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The coordinator was torn down while the operation was pending
    #[error("Coordinator shut down: {0}")]
    ShutDown(String),

    /// Unexpected internal failure
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Structured error code for machine-readable error handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Transport errors (1000-1099)
    DeviceUnreachable,
    FetchTimeout,

    // Device errors (1300-1399)
    DeviceRejected,

    // Input errors (1400-1499)
    ValidationFailed,
    UnknownCommand,

    // Configuration errors (1200-1299)
    ConfigurationInvalid,

    // Internal errors (1900-1999)
    CoordinatorStopped,
    InternalError,
}

impl ErrorCode {
    /// Get numeric error code
    pub fn as_number(&self) -> u32 {
        match self {
            ErrorCode::DeviceUnreachable => 1001,
            ErrorCode::FetchTimeout => 1002,
            ErrorCode::ConfigurationInvalid => 1201,
            ErrorCode::DeviceRejected => 1301,
            ErrorCode::ValidationFailed => 1401,
            ErrorCode::UnknownCommand => 1402,
            ErrorCode::CoordinatorStopped => 1901,
            ErrorCode::InternalError => 1902,
        }
    }

    /// Get error category
    pub fn category(&self) -> &'static str {
        match self.as_number() {
            1000..=1099 => "transport",
            1200..=1299 => "configuration",
            1300..=1399 => "device",
            1400..=1499 => "input",
            1900..=1999 => "internal",
            _ => "unknown",
        }
    }
}

/// Error severity levels for monitoring
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Low severity - information only
    Info,
    /// Medium severity - warning condition
    Warning,
    /// High severity - error condition
    Error,
    /// Critical severity - immediate attention required
    Critical,
}

/// Structured error context with additional metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Error code for machine processing
    pub code: ErrorCode,
    /// Component that generated the error
    pub component: String,
    /// Operation that was being performed
    pub operation: String,
    /// Additional metadata about the error
    pub metadata: HashMap<String, serde_json::Value>,
    /// Timestamp when error occurred
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ErrorContext {
    /// Create new error context
    pub fn new(code: ErrorCode, component: &str, operation: &str) -> Self {
        Self {
            code,
            component: component.to_string(),
            operation: operation.to_string(),
            metadata: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    /// Add metadata to error context
    pub fn with_metadata<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<serde_json::Value>,
    {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl CoordinatorError {
    /// Create a transport error
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a device error
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Self::Device(msg.into())
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an unknown command error
    pub fn unknown_command<S: Into<String>>(name: S) -> Self {
        Self::UnknownCommand(name.into())
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a shut down error
    pub fn shut_down<S: Into<String>>(msg: S) -> Self {
        Self::ShutDown(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Map the error to its structured error code
    pub fn to_error_code(&self) -> ErrorCode {
        match self {
            CoordinatorError::Transport(_) => ErrorCode::DeviceUnreachable,
            CoordinatorError::Timeout(_) => ErrorCode::FetchTimeout,
            CoordinatorError::Device(_) => ErrorCode::DeviceRejected,
            CoordinatorError::Validation(_) => ErrorCode::ValidationFailed,
            CoordinatorError::UnknownCommand(_) => ErrorCode::UnknownCommand,
            CoordinatorError::Configuration(_) => ErrorCode::ConfigurationInvalid,
            CoordinatorError::ShutDown(_) => ErrorCode::CoordinatorStopped,
            CoordinatorError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            CoordinatorError::Configuration(_) => ErrorSeverity::Critical,
            CoordinatorError::Transport(_) | CoordinatorError::Timeout(_) => {
                ErrorSeverity::Warning
            }
            CoordinatorError::Validation(_) | CoordinatorError::UnknownCommand(_) => {
                ErrorSeverity::Warning
            }
            CoordinatorError::ShutDown(_) => ErrorSeverity::Info,
            CoordinatorError::Device(_) | CoordinatorError::Internal(_) => ErrorSeverity::Error,
        }
    }

    /// Check if retrying the same operation later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinatorError::Transport(_) | CoordinatorError::Timeout(_)
        )
    }

    /// Errors raised by the caller's own input rather than the device
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            CoordinatorError::Validation(_) | CoordinatorError::UnknownCommand(_)
        )
    }
}

impl From<config::ConfigError> for CoordinatorError {
    fn from(err: config::ConfigError) -> Self {
        CoordinatorError::Configuration(err.to_string())
    }
}

impl From<toml::ser::Error> for CoordinatorError {
    fn from(err: toml::ser::Error) -> Self {
        CoordinatorError::Internal(format!("TOML serialization failed: {err}"))
    }
}

impl From<std::io::Error> for CoordinatorError {
    fn from(err: std::io::Error) -> Self {
        CoordinatorError::Transport(err.to_string())
    }
}

/// Error logging utilities
pub struct ErrorReporter;

impl ErrorReporter {
    /// Log an error at the level matching its severity
    pub fn log_error(error: &CoordinatorError, context: Option<ErrorContext>) {
        let code = error.to_error_code();
        let context = context.unwrap_or_else(|| ErrorContext::new(code.clone(), "unknown", "unknown"));

        match error.severity() {
            ErrorSeverity::Critical | ErrorSeverity::Error => {
                tracing::error!(
                    error_code = code.as_number(),
                    category = code.category(),
                    component = %context.component,
                    operation = %context.operation,
                    metadata = ?context.metadata,
                    "{}",
                    error
                );
            }
            ErrorSeverity::Warning => {
                tracing::warn!(
                    error_code = code.as_number(),
                    category = code.category(),
                    component = %context.component,
                    operation = %context.operation,
                    metadata = ?context.metadata,
                    "{}",
                    error
                );
            }
            ErrorSeverity::Info => {
                tracing::info!(
                    error_code = code.as_number(),
                    category = code.category(),
                    component = %context.component,
                    operation = %context.operation,
                    "{}",
                    error
                );
            }
        }
    }

    /// Format error for command callers
    pub fn format_api_error(error: &CoordinatorError) -> serde_json::Value {
        let code = error.to_error_code();
        serde_json::json!({
            "error": {
                "code": code.as_number(),
                "category": code.category(),
                "message": error.to_string(),
                "retryable": error.is_retryable(),
            }
        })
    }
}

/// Macro for easy structured error logging
#[macro_export]
macro_rules! log_structured_error {
    ($error:expr, $component:expr, $operation:expr) => {
        $crate::error::ErrorReporter::log_error(
            &$error,
            Some($crate::error::ErrorContext::new(
                $error.to_error_code(),
                $component,
                $operation,
            )),
        )
    };
}
