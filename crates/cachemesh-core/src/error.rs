//! Error types shared by every cachemesh crate.
//!
//! The error taxonomy follows the handling policy of the orchestrator:
//! connection-level errors are absorbed and logged at the facade boundary,
//! integrity errors are surfaced to callers, configuration errors fail the
//! operation that needed the missing configuration.

use std::fmt;

/// Errors that can occur during cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The distributed tier could not be reached or the call timed out.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection failure.
        message: String,
    },

    /// A stored value failed an integrity check (auth-tag mismatch,
    /// malformed codec framing). Never silently recovered.
    #[error("Integrity error: {message}")]
    Integrity {
        /// Description of the integrity violation.
        message: String,
    },

    /// A value could not be encoded or decoded for a recoverable reason.
    #[error("Codec error: {message}")]
    Codec {
        /// Description of the codec failure.
        message: String,
    },

    /// The operation required configuration that is missing or invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// A value could not be serialized to or from JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The circuit breaker rejected the call without attempting it.
    #[error("Circuit open: distributed tier calls are currently rejected")]
    CircuitOpen,

    /// The value factory passed to `get_or_set` failed.
    #[error("Factory error: {message}")]
    Factory {
        /// Description of the factory failure.
        message: String,
    },

    /// An internal invariant was violated.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl CacheError {
    /// Creates a new `Connection` error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a new `Integrity` error.
    #[must_use]
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    /// Creates a new `Codec` error.
    #[must_use]
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Factory` error.
    #[must_use]
    pub fn factory(message: impl Into<String>) -> Self {
        Self::Factory {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a connection-level error.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::CircuitOpen)
    }

    /// Returns `true` if this is an integrity violation.
    #[must_use]
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }

    /// Returns `true` if the facade may absorb this error and fall back,
    /// instead of propagating it to the caller.
    ///
    /// Integrity and factory errors are never absorbable: returning wrong
    /// data is worse than a miss, and a failing factory has no fallback.
    #[must_use]
    pub fn is_absorbable(&self) -> bool {
        !matches!(
            self,
            Self::Integrity { .. } | Self::Factory { .. } | Self::Configuration { .. }
        )
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } | Self::CircuitOpen => ErrorCategory::Infrastructure,
            Self::Integrity { .. } => ErrorCategory::Integrity,
            Self::Codec { .. } | Self::Serialization(_) => ErrorCategory::Codec,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Factory { .. } => ErrorCategory::Factory,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Categories of cache errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network/connection failure of the distributed tier.
    Infrastructure,
    /// Corrupted or tampered stored data.
    Integrity,
    /// Encode/decode failure.
    Codec,
    /// Missing or invalid configuration.
    Configuration,
    /// `get_or_set` factory failure.
    Factory,
    /// Internal error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Integrity => write!(f, "integrity"),
            Self::Codec => write!(f, "codec"),
            Self::Configuration => write!(f, "configuration"),
            Self::Factory => write!(f, "factory"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::connection("redis unreachable");
        assert_eq!(err.to_string(), "Connection error: redis unreachable");

        let err = CacheError::integrity("auth tag mismatch");
        assert_eq!(err.to_string(), "Integrity error: auth tag mismatch");
    }

    #[test]
    fn test_error_predicates() {
        assert!(CacheError::connection("x").is_connection());
        assert!(CacheError::CircuitOpen.is_connection());
        assert!(!CacheError::connection("x").is_integrity());
        assert!(CacheError::integrity("x").is_integrity());
    }

    #[test]
    fn test_absorbable() {
        assert!(CacheError::connection("x").is_absorbable());
        assert!(CacheError::CircuitOpen.is_absorbable());
        assert!(!CacheError::integrity("x").is_absorbable());
        assert!(!CacheError::factory("x").is_absorbable());
        assert!(!CacheError::configuration("x").is_absorbable());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            CacheError::connection("x").category(),
            ErrorCategory::Infrastructure
        );
        assert_eq!(
            CacheError::integrity("x").category(),
            ErrorCategory::Integrity
        );
        assert_eq!(
            CacheError::configuration("x").category(),
            ErrorCategory::Configuration
        );
        assert_eq!(ErrorCategory::Integrity.to_string(), "integrity");
    }
}
