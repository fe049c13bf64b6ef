//! Error types for shadowstore.

use crate::scope::ScopeState;
use crate::types::{SessionId, ShadowPath};
use std::fmt;
use std::io;
use thiserror::Error;

/// Errors raised by a single store operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// File or directory not found.
    #[error("Path not found: {path}")]
    NotFound {
        path: String
    },

    /// The path resolves outside the storage root.
    #[error("Path escapes the storage root: {path}")]
    SecurityViolation {
        path: String
    },

    /// The entry at the path has the wrong shape for the operation.
    #[error("Structural conflict at {path}: {reason}")]
    StructuralConflict {
        path: ShadowPath,
        reason: String
    },

    /// File already exists and overwriting was not requested.
    #[error("Path already exists: {path}")]
    AlreadyExists {
        path: String
    },

    /// Non-recursive delete of a directory that still has entries.
    #[error("Directory not empty: {path}")]
    DirectoryNotEmpty {
        path: ShadowPath
    },

    /// Invalid path or identifier.
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath {
        path: String,
        reason: String
    },

    /// Underlying storage failure on a known path.
    #[error("I/O error on {path}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Configuration file that does not parse.
    #[error("Invalid configuration in {path}")]
    Config {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Wraps an I/O error, keeping `NotFound` as a first-class variant.
    pub fn from_io(path: impl Into<String>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound { path },
            _ => StoreError::Io { path, source },
        }
    }

    pub fn not_found(path: &ShadowPath) -> Self {
        StoreError::NotFound { path: path.to_string() }
    }

    pub fn conflict(path: &ShadowPath, reason: impl Into<String>) -> Self {
        StoreError::StructuralConflict {
            path: path.clone(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// The kind of staged change being replayed onto a base store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommitAction {
    Write,
    DeleteFile,
    DeleteDirectory,
}

impl fmt::Display for CommitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitAction::Write => write!(f, "write"),
            CommitAction::DeleteFile => write!(f, "delete file"),
            CommitAction::DeleteDirectory => write!(f, "delete directory"),
        }
    }
}

/// One staged change that could not be applied.
#[derive(Debug, Error)]
#[error("failed to {action} {path}")]
pub struct CommitFailure {
    pub path: ShadowPath,
    pub action: CommitAction,
    #[source]
    pub source: StoreError,
}

/// All failed changes of one overlay.
#[derive(Debug, Error)]
#[error("{} staged change(s) in '{}' could not be applied", .failures.len(), .name)]
pub struct OverlayCommitError {
    /// Shadow path of the overlay
    pub name: String,
    pub failures: Vec<CommitFailure>,
}

/// Errors raised by a transaction scope.
#[derive(Debug, Error)]
pub enum ScopeError {
    /// One entry per overlay that had at least one failed change.
    #[error("{} shadow overlay(s) failed to commit", .0.len())]
    Commit(Vec<OverlayCommitError>),

    /// The scope is not in a state that allows the operation.
    #[error("Session {id} is {state}, expected active")]
    InvalidState {
        id: SessionId,
        state: ScopeState,
    },

    /// A session was made ambient on a tokio runtime without a task slot.
    #[error("Session {id} must be opened inside AmbientContext::scope on a tokio runtime")]
    OutsideFlow {
        id: SessionId,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ScopeError {
    /// Paths of every change that failed to commit, in replay order.
    pub fn failed_paths(&self) -> Vec<&ShadowPath> {
        match self {
            ScopeError::Commit(overlays) => overlays
                .iter()
                .flat_map(|overlay| overlay.failures.iter().map(|failure| &failure.path))
                .collect(),
            _ => Vec::new(),
        }
    }
}
