//! Error types for the upload engine.
//!
//! Errors are split by where they surface:
//! - `DispatchError` is returned synchronously when a transfer cannot be started.
//! - `TransferFailure` is the terminal error of a task that was dispatched but did
//!   not succeed; it travels through completion events, never through `?` at dispatch.
//! - `DeletionError` is the aggregate failure of a bulk delete.
//! - `StorageError` is what a storage backend reports.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::storage::StorageRef;

/// Errors reported by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Logical path cannot be turned into a storage reference
    #[error("invalid storage path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// No object exists at the referenced location
    #[error("object not found: {path}")]
    NotFound { path: String },

    /// Backend refused the operation
    #[error("storage rejected the request: {reason}")]
    Rejected { reason: String },

    /// Local I/O failure inside the backend
    #[error("storage I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors that prevent a transfer (or a whole batch) from being dispatched.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Destination path is malformed
    #[error("invalid destination path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Backend refused to start the upload
    #[error("backend rejected upload to '{path}'")]
    Rejected {
        path: String,
        #[source]
        source: StorageError,
    },

    /// An explicit path list was shorter than the file list
    #[error("no destination path given for file #{index} ({file})")]
    MissingDestination { index: usize, file: String },

    /// A single file exceeds the configured per-file limit
    #[error("file '{file}' is {size} bytes, limit is {limit} bytes")]
    FileTooLarge { file: String, size: u64, limit: u64 },

    /// The batch exceeds the configured total limit
    #[error("batch totals {total} bytes, limit is {limit} bytes")]
    BatchTooLarge { total: u64, limit: u64 },

    /// Dispatch was attempted outside of a tokio runtime
    #[error("transfers must be dispatched from within a tokio runtime")]
    NoRuntime,
}

impl DispatchError {
    pub(crate) fn from_storage(path: &str, err: StorageError) -> Self {
        match err {
            StorageError::InvalidPath { path, reason } => DispatchError::InvalidPath { path, reason },
            other => DispatchError::Rejected {
                path: path.to_string(),
                source: other,
            },
        }
    }
}

/// Terminal failure of a dispatched transfer.
///
/// Cloneable because every observer of a task receives its own copy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferFailure {
    /// Backend reported an error snapshot or event
    #[error("upload to '{path}' failed: {reason}")]
    Failed { path: String, reason: String },

    /// Backend canceled the upload
    #[error("upload to '{path}' was canceled by the backend")]
    Canceled { path: String },

    /// Event stream closed before any terminal state was reported
    #[error("upload to '{path}' ended without a terminal state")]
    Interrupted { path: String },

    /// Upload succeeded but the retrieval URL could not be resolved
    #[error("could not resolve download url for '{path}': {reason}")]
    DownloadUrl { path: String, reason: String },
}

impl TransferFailure {
    /// Destination path of the failed transfer.
    pub fn path(&self) -> &str {
        match self {
            Self::Failed { path, .. }
            | Self::Canceled { path }
            | Self::Interrupted { path }
            | Self::DownloadUrl { path, .. } => path,
        }
    }
}

/// Returned by `BatchReport::into_completed` when some tasks did not succeed.
#[derive(Debug, Clone, Error)]
#[error("{} of {} uploads failed", failures.len(), failures.len() + succeeded)]
pub struct BatchError {
    /// `(task index, failure)` for every failed task, in index order
    pub failures: Vec<(usize, TransferFailure)>,
    /// Number of tasks that succeeded
    pub succeeded: usize,
}

/// Returned by `CleanupManager::delete_all` when at least one deletion failed.
///
/// Deletions that succeeded are not rolled back.
#[derive(Debug, Error)]
#[error("{} of {} deletions failed", failures.len(), failures.len() + succeeded)]
pub struct DeletionError {
    pub failures: Vec<(StorageRef, StorageError)>,
    pub succeeded: usize,
}

impl DeletionError {
    /// References whose deletion failed.
    pub fn failed_references(&self) -> impl Iterator<Item = &StorageRef> {
        self.failures.iter().map(|(reference, _)| reference)
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
