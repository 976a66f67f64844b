//! Error types for the caching core

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for cache operations.
///
/// A cache *miss* is not an error; lookups report misses by value (see
/// [`crate::store::EntryLookup`]). This enum covers the failures that
/// callers downgrade to misses or warnings.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error during a store operation
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(prewarm::cache::io),
        help("Check file permissions and ensure the cache directory is writable")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "rename")
        operation: String,
    },

    /// Configuration or validation error
    #[error("cache configuration error: {message}")]
    #[diagnostic(code(prewarm::cache::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Serialization error
    #[error("serialization error: {message}")]
    #[diagnostic(code(prewarm::cache::serialization))]
    Serialization {
        /// Error message describing the serialization issue
        message: String,
    },

    /// A cached entry disagrees with the expected slots declared by the
    /// wrapper. Downgraded to a miss by the façade.
    #[error("cache inconsistency for {hash}: unexpected cached slot '{slot}'")]
    #[diagnostic(
        code(prewarm::cache::inconsistency),
        help("The entry was produced by a wrapper declaring different outputs; it will be treated as a miss")
    )]
    Inconsistency {
        /// Hex fingerprint of the offending entry
        hash: String,
        /// The slot id present in the cache but not declared
        slot: String,
    },

    /// The remote cache tier failed. Never fatal; logged as a warning.
    #[error("remote cache error: {message}")]
    #[diagnostic(code(prewarm::cache::remote))]
    Remote {
        /// Error message from the remote implementation
        message: String,
    },
}

impl Error {
    /// Create an I/O error with path context
    #[must_use]
    pub fn io(source: std::io::Error, path: impl AsRef<Path>, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a remote-tier error
    #[must_use]
    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote {
            message: msg.into(),
        }
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_display_includes_path_and_operation() {
        let err = Error::io(
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            "/tmp/cache/entry",
            "read",
        );
        let msg = err.to_string();
        assert!(msg.contains("read"));
        assert!(msg.contains("/tmp/cache/entry"));
    }

    #[test]
    fn io_error_without_path() {
        let err = Error::io_no_path(
            std::io::Error::new(std::io::ErrorKind::Other, "boom"),
            "flush",
        );
        assert_eq!(err.to_string(), "I/O flush failed");
    }

    #[test]
    fn inconsistency_display() {
        let err = Error::Inconsistency {
            hash: "abcd".to_string(),
            slot: "object".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("abcd"));
        assert!(msg.contains("object"));
    }

    #[test]
    fn remote_display() {
        let err = Error::remote("connection refused");
        assert!(err.to_string().contains("connection refused"));
    }
}
