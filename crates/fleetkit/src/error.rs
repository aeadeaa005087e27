//! Error types for the operation engine.
//!
//! Every variant here is an infrastructure failure: the engine itself could
//! not run. Individual unit failures and validation failures are never
//! errors; they travel as data inside [`crate::BatchReport`] and
//! [`crate::TransactionResult`].

use std::path::PathBuf;
use thiserror::Error;

/// Errors that stop a batch, transaction or cache call outright.
#[derive(Debug, Error)]
pub enum Error {
    /// The worker pool for a batch could not be created
    #[error("failed to build worker pool: {0}")]
    WorkerPool(String),

    /// The private scratch directory for a transaction could not be created
    #[error("failed to create scratch directory: {source}")]
    ScratchDir {
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Filesystem error on a specific path
    #[error("IO error on {path}: {source}")]
    Io {
        /// Path being read or written
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// A collaborator (store, backup, index, supervisor) failed
    #[error("{collaborator} failed: {message}")]
    Collaborator {
        /// Which collaborator reported the failure
        collaborator: &'static str,
        /// Failure details
        message: String,
    },

    /// An original file changed on disk between prepare and commit
    #[error("{0} was modified during the transaction")]
    ConcurrentModification(PathBuf),

    /// A commit-phase replace failed; already-replaced files were restored
    #[error("commit failed on {path}: {message} ({restored} file(s) restored)")]
    CommitFailed {
        /// File whose replace failed
        path: PathBuf,
        /// Failure details
        message: String,
        /// Number of already-replaced files rolled back
        restored: usize,
    },

    /// The cache side file exists but cannot be read
    #[error("cache side file {path} unreadable: {source}")]
    CacheFile {
        /// Side file path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Computing a cache payload failed
    #[error("cache refresh for '{key}' failed: {message}")]
    Compute {
        /// Cache key
        key: String,
        /// Failure details
        message: String,
    },

    /// The operation was cancelled before it could finish
    #[error("operation cancelled")]
    Cancelled,

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a collaborator failure.
    pub fn collaborator(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self::Collaborator {
            collaborator,
            message: message.into(),
        }
    }

    /// Shorthand for an IO error on a path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error came from a user interrupt rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
