//! Result and error types for the resilience engine.

use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in the engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// No selector strategy located the element
    #[error("Element not found: {description} (tried {} strategies)", .attempted.len())]
    NotFound {
        /// Logical element description
        description: String,
        /// Strategies attempted, in order
        attempted: Vec<String>,
    },

    /// A retried operation failed on every attempt
    #[error("{label} failed after {attempts} attempts: {message}")]
    RetryExhausted {
        /// Operation label
        label: String,
        /// Number of attempts made
        attempts: u32,
        /// Message of the last failure
        message: String,
    },

    /// Automation driver error
    #[error("Driver error: {message}")]
    Driver {
        /// Error message
        message: String,
    },

    /// The page was closed or crashed
    #[error("Page is closed")]
    PageClosed,

    /// Operation timed out
    #[error("Operation timed out after {ms}ms")]
    Timeout {
        /// Timeout in milliseconds
        ms: u64,
    },

    /// Navigation error
    #[error("Navigation to {url} failed: {message}")]
    Navigation {
        /// URL that failed
        url: String,
        /// Error message
        message: String,
    },

    /// Script evaluation error
    #[error("Script evaluation failed: {message}")]
    Script {
        /// Error message
        message: String,
    },

    /// Screenshot error
    #[error("Screenshot failed: {message}")]
    Screenshot {
        /// Error message
        message: String,
    },

    /// Failure raised by a caller-supplied operation
    #[error("{0}")]
    Operation(String),

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl EngineError {
    /// Create a driver error
    #[must_use]
    pub fn driver(message: impl Into<String>) -> Self {
        Self::Driver {
            message: message.into(),
        }
    }

    /// Create an operation error
    #[must_use]
    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation(message.into())
    }

    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a timeout error from a duration
    #[must_use]
    pub fn timeout(duration: std::time::Duration) -> Self {
        Self::Timeout {
            ms: duration.as_millis() as u64,
        }
    }

    /// Whether this is a resolution failure
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether the page went away underneath the operation
    #[must_use]
    pub const fn is_page_closed(&self) -> bool {
        matches!(self, Self::PageClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_not_found_names_element() {
        let err = EngineError::NotFound {
            description: "Add Block Button".to_string(),
            attempted: vec!["primary".into(), "fallback[0]".into()],
        };
        let text = err.to_string();
        assert!(text.contains("Add Block Button"));
        assert!(text.contains("2 strategies"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_operation_displays_message_verbatim() {
        assert_eq!(EngineError::operation("flaky").to_string(), "flaky");
    }

    #[test]
    fn test_timeout_from_duration() {
        let err = EngineError::timeout(Duration::from_millis(1500));
        assert!(matches!(err, EngineError::Timeout { ms: 1500 }));
    }

    #[test]
    fn test_retry_exhausted_message() {
        let err = EngineError::RetryExhausted {
            label: "publish".into(),
            attempts: 3,
            message: "button detached".into(),
        };
        assert_eq!(
            err.to_string(),
            "publish failed after 3 attempts: button detached"
        );
    }

    #[test]
    fn test_page_closed_predicate() {
        assert!(EngineError::PageClosed.is_page_closed());
        assert!(!EngineError::driver("x").is_page_closed());
    }
}
