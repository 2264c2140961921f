//! Unified error types for the orchestrator.

use thiserror::Error;

/// Top-level error type for building and running an orchestrated process.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration file could not be resolved, read, or parsed.
    #[error("config: {0}")]
    Config(String),

    /// Two services were registered under the same name.
    #[error("registry: duplicate service name '{0}'")]
    DuplicateService(String),

    /// OS signal handlers could not be installed.
    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}

impl Error {
    /// Builds an [`Error::Config`] from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Builds an [`Error::Config`] from a message and its underlying cause.
    pub fn config_with(message: impl AsRef<str>, cause: impl std::fmt::Display) -> Self {
        Self::Config(format!("{}: {cause}", message.as_ref()))
    }
}
