//! Error types for the Ruby runner.
//!
//! Only host-side failures are errors. A guest program that raises, times
//! out or exits non-zero is reported as data in
//! [`ExecutionResult`](crate::runner::session::ExecutionResult).

use std::sync::Arc;

use thiserror::Error;

/// Errors raised by the runner itself.
///
/// The type is `Clone` so a single failed initialization can be handed to
/// every caller waiting on it.
#[derive(Error, Debug, Clone)]
pub enum RunnerError {
    /// The runtime binary could not be downloaded.
    #[error("failed to fetch runtime binary from {url}: {reason}")]
    Fetch {
        /// The URL that was requested.
        url: String,
        /// Why the request failed.
        reason: String,
    },

    /// The downloaded bytes are not a usable interpreter module.
    #[error("failed to compile runtime binary: {0}")]
    Compile(String),

    /// The compiled module could not be linked or prepared for instantiation.
    #[error("failed to initialize runtime: {0}")]
    RuntimeInit(String),

    /// The durable binary cache could not be opened or written.
    #[error("binary cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Invalid configuration or arguments.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error while touching the binary cache.
    #[error("I/O error: {0}")]
    Io(#[source] Arc<std::io::Error>),
}

impl RunnerError {
    /// Build a fetch error for `url`.
    pub fn fetch(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        RunnerError::Fetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Check if this error came from downloading the runtime binary.
    pub fn is_fetch(&self) -> bool {
        matches!(self, RunnerError::Fetch { .. })
    }

    /// Check if this error came from compiling the runtime binary.
    pub fn is_compile(&self) -> bool {
        matches!(self, RunnerError::Compile(_))
    }

    /// Check if this error is an initialization failure (fetch, compile or link).
    ///
    /// These leave the runtime uninitialized; calling `initialize()` again retries.
    pub fn is_initialization(&self) -> bool {
        matches!(
            self,
            RunnerError::Fetch { .. } | RunnerError::Compile(_) | RunnerError::RuntimeInit(_)
        )
    }
}

impl From<std::io::Error> for RunnerError {
    fn from(err: std::io::Error) -> Self {
        RunnerError::Io(Arc::new(err))
    }
}

/// Result type alias for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;
