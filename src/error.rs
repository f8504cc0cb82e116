//! Error types for the agent coordination layer
//!
//! This module provides structured error definitions using thiserror. Every
//! failure is returned from the operation that detected it; nothing is
//! retried automatically.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for coordination operations
#[derive(Error, Debug)]
pub enum CommsError {
    /// Backing store could not be read or written
    #[error("Storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Backing store content is present but structurally invalid
    #[error("Parse error: {0}")]
    Parse(String),

    /// Agent name already registered with this coordinator
    #[error("Agent already registered: {0}")]
    DuplicateAgent(String),

    /// Lifecycle operation outside of the started state
    #[error("Coordinator is not started")]
    NotStarted,

    /// Lifecycle transition the coordinator does not support
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Agent name cannot be used as a document key
    #[error("Invalid agent name: {0:?}")]
    InvalidAgentName(String),

    /// Concurrent writers kept moving the revision underneath us
    #[error("Revision conflict persisted after {retries} retries")]
    Conflict { retries: u32 },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for coordination operations
pub type Result<T> = std::result::Result<T, CommsError>;

impl CommsError {
    /// Wrap an I/O error with the path it happened on
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CommsError::Storage {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for CommsError {
    fn from(err: serde_json::Error) -> Self {
        CommsError::Parse(err.to_string())
    }
}
