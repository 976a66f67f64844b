//! Error types for the wrapper framework

use miette::Diagnostic;
use thiserror::Error;

/// Error type for wrapper and driver operations.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// The wrapped tool could not be started. Fatal: there is nothing
    /// to fall back to.
    #[error("failed to execute '{program}'")]
    #[diagnostic(
        code(prewarm::wrappers::tool_exec),
        help("Check that the program exists and is executable")
    )]
    ToolExec {
        /// The program that could not be started
        program: String,
        /// The underlying spawn error
        #[source]
        source: std::io::Error,
    },

    /// The wrapper itself failed. The driver falls back to plain
    /// execution without caching.
    #[error("wrapper error: {message}")]
    #[diagnostic(code(prewarm::wrappers::wrapper))]
    Wrapper {
        /// Description of the wrapper failure
        message: String,
    },

    /// A caching-core error surfaced through a wrapper step.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] prewarm_cache::Error),
}

impl Error {
    /// Create a wrapper-rejection error
    #[must_use]
    pub fn wrapper(msg: impl Into<String>) -> Self {
        Self::Wrapper {
            message: msg.into(),
        }
    }

    /// `true` when the driver must not fall back to plain execution.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ToolExec { .. })
    }
}

/// Result type for wrapper operations
pub type Result<T> = std::result::Result<T, Error>;
