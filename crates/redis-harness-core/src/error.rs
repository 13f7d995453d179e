//! Error types for redis-harness.
//!
//! Provisioning errors are surfaced to the caller of `acquire`. Teardown
//! errors use the same type internally but are only logged, never returned
//! from the public release APIs.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    // Provisioning errors
    #[error("Resource not found: {resource} (searched: {searched:?})")]
    ResourceNotFound {
        resource: String,
        searched: Vec<PathBuf>,
    },

    #[error("Config template mismatch: expected exactly one `{directive}` line, found {occurrences}")]
    TemplateMismatch {
        directive: String,
        occurrences: usize,
    },

    #[error("Server exited during startup ({})", exit_label(.exit_code))]
    StartupFailed { exit_code: Option<i32> },

    #[error("Failed to spawn {}: {source}", .binary.display())]
    SpawnFailed {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not connect to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    // Teardown errors (logged, never propagated)
    #[error("Teardown failed for pid {pid}: {message}")]
    Teardown { pid: u32, message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Registry error: {message}")]
    Registry { message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

impl From<std::io::Error> for HarnessError {
    fn from(err: std::io::Error) -> Self {
        HarnessError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl HarnessError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        HarnessError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Whether this error came out of the provisioning pipeline.
    ///
    /// Such errors fail the `acquire` call and leave no registry entry, so a
    /// later call for the same identity starts over.
    pub fn is_provisioning_failure(&self) -> bool {
        matches!(
            self,
            HarnessError::ResourceNotFound { .. }
                | HarnessError::TemplateMismatch { .. }
                | HarnessError::StartupFailed { .. }
                | HarnessError::SpawnFailed { .. }
                | HarnessError::ConnectionFailed { .. }
                | HarnessError::Io { .. }
        )
    }
}
