//! Error types for mapper wiring and transaction demarcation.

use std::fmt;
use std::sync::Arc;

/// Wiring and demarcation errors
///
/// Represents the error conditions that can occur while discovering mapper
/// requirements, bootstrapping session managers, or demarcating transactions
/// in mapper-di.
///
/// Configuration-class errors (`Configuration`, `UnsatisfiedFactory`,
/// `AmbiguousFactory`) are surfaced at bootstrap and abort startup; per-call
/// errors (`Transaction`, `Delegate`, `TypeMismatch`) are always visible to
/// the caller.
///
/// # Examples
///
/// ```rust
/// use mapper_di::WireError;
///
/// let config = WireError::Configuration("no session factory producers configured".to_string());
/// assert!(config.is_configuration());
/// println!("Error: {}", config);
///
/// let tx = WireError::Transaction("commit failed: connection lost".to_string());
/// assert!(!tx.is_configuration());
/// ```
#[derive(Debug, Clone)]
pub enum WireError {
    /// Invalid, missing, or mismatched provider definition (fatal at bootstrap)
    Configuration(String),
    /// No session factory matches the requested name or qualifiers
    UnsatisfiedFactory(String),
    /// More than one factory matches where a unique match is required
    AmbiguousFactory(String),
    /// Begin/commit/rollback failure reported by the underlying resource
    Transaction(String),
    /// Failure raised by the wrapped call itself, re-raised verbatim
    Delegate(Arc<dyn std::error::Error + Send + Sync>),
    /// Downcast of a dispatched result failed
    TypeMismatch(&'static str),
}

impl WireError {
    /// Wraps a foreign error as a delegate failure.
    pub fn delegate<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        WireError::Delegate(Arc::new(err))
    }

    /// True for errors that indicate a misconfiguration and must abort bootstrap.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            WireError::Configuration(_)
                | WireError::UnsatisfiedFactory(_)
                | WireError::AmbiguousFactory(_)
        )
    }
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            WireError::UnsatisfiedFactory(msg) => {
                write!(f, "No matching session factory: {}", msg)
            }
            WireError::AmbiguousFactory(msg) => {
                write!(f, "Ambiguous session factory: {}", msg)
            }
            WireError::Transaction(msg) => write!(f, "Transaction failure: {}", msg),
            WireError::Delegate(err) => write!(f, "Delegate failure: {}", err),
            WireError::TypeMismatch(name) => write!(f, "Type mismatch for: {}", name),
        }
    }
}

impl std::error::Error for WireError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WireError::Delegate(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

/// Result type for wiring operations
///
/// A convenience type alias for `Result<T, WireError>` used throughout
/// mapper-di.
pub type WireResult<T> = Result<T, WireError>;
