//! Error types for the context-switched remote invocation core.

use std::time::Duration;

use thiserror::Error;

use crate::context::ContextId;

/// Directory/lookup errors. Propagated unchanged to the caller; the core
/// never retries naming operations.
#[derive(Debug, Error)]
pub enum NamingError {
    #[error("Failed to connect to naming service: {0}")]
    ConnectionFailed(String),

    #[error("Name not found: {0}")]
    NotFound(String),

    #[error("Entry '{name}' implements '{actual}', expected '{expected}'")]
    TypeMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Naming operation interrupted")]
    Interrupted,

    #[error("Naming provider error: {0}")]
    Provider(String),
}

/// Delegate cache errors. Creation failures are never cached, so a later
/// call may retry after configuration changes.
#[derive(Debug, Error)]
pub enum DelegateError {
    #[error("Required configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("Failed to create serialization delegate '{implementation}': {source}")]
    CreationFailed {
        implementation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("No active resolution context on this thread")]
    NoActiveContext,

    #[error("Delegate codec error: {0}")]
    Codec(String),
}

/// Wraps a non-naming failure raised while executing work inside a switched
/// context. Used on the release/teardown path, where the original failure
/// type cannot be preserved across the call boundary.
#[derive(Debug, Error)]
#[error("Failure inside context {context}: {source}")]
pub struct ContextSwitchError {
    pub context: ContextId,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl ContextSwitchError {
    pub fn new(
        context: ContextId,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            context,
            source: source.into(),
        }
    }
}

/// Remote-dispatch collaborator failures.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Dispatch interrupted")]
    Interrupted,

    #[error("Connection to remote endpoint lost: {0}")]
    ConnectionLost(String),

    #[error("Remote call failed: {0}")]
    Remote(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Per-invocation errors surfaced by the session proxy.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("Missing required configuration: {0}")]
    MissingConfiguration(&'static str),

    #[error(transparent)]
    Naming(#[from] NamingError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Delegate(#[from] DelegateError),

    #[error(transparent)]
    ContextSwitch(#[from] ContextSwitchError),

    #[error("Invocation exceeded timeout of {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Response decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Archive-scan failures when building a resolution context from a library
/// directory. Raised at build time, before any call is attempted.
#[derive(Debug, Error)]
pub enum ContextBuildError {
    #[error("Archive directory not found: {0}")]
    DirectoryNotFound(std::path::PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(std::path::PathBuf),

    #[error("Failed to scan archive directory: {0}")]
    Scan(#[from] walkdir::Error),
}

/// Configuration loading/validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load failed: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
