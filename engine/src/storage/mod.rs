//! Boundary to the object-storage backend.
//!
//! The engine never moves bytes itself. A `StorageBackend` resolves logical
//! paths, starts uploads and pushes their progress back through a
//! `TransferHandle`, resolves retrieval URLs and deletes objects.

mod local;

pub use local::LocalStorage;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::StorageError;
use crate::model::{Metadata, SourceFile, StatusSnapshot};

/// Addressable location of an object inside the backend.
///
/// Always normalized: no leading or trailing `/`, no empty, `.` or `..` segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StorageRef {
    path: String,
}

impl StorageRef {
    /// Validate and normalize a logical path.
    pub fn parse(path: &str) -> Result<Self, StorageError> {
        let invalid = |reason: &str| StorageError::InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Err(invalid("path is empty"));
        }
        if trimmed.chars().any(|c| c.is_control()) {
            return Err(invalid("path contains control characters"));
        }
        for segment in trimmed.split('/') {
            match segment {
                "" => return Err(invalid("path contains an empty segment")),
                "." | ".." => return Err(invalid("relative segments are not allowed")),
                _ => {}
            }
        }

        Ok(StorageRef {
            path: trimmed.to_string(),
        })
    }

    /// Full logical path, e.g. `uploads/photo.png`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Final path segment, e.g. `photo.png`.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

impl fmt::Display for StorageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// One push from a running upload.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// Percentage in [0, 100]
    Progress(f64),
    /// Raw status snapshot
    Snapshot(StatusSnapshot),
    /// Upload failed outside of a snapshot (e.g. connection lost)
    Failed(String),
}

/// Receiving side of an upload, handed to the engine by `StorageBackend::put`.
///
/// The upload is finished when every `TransferReporter` has been dropped.
#[derive(Debug)]
pub struct TransferHandle {
    events: mpsc::UnboundedReceiver<TransferEvent>,
}

impl TransferHandle {
    /// Create a connected reporter/handle pair.
    pub fn channel() -> (TransferReporter, TransferHandle) {
        let (sender, events) = mpsc::unbounded_channel();
        (TransferReporter { sender }, TransferHandle { events })
    }

    /// Next event, or `None` once the backend is done reporting.
    pub async fn next_event(&mut self) -> Option<TransferEvent> {
        self.events.recv().await
    }
}

/// Sending side of an upload, kept by the backend while it transfers.
#[derive(Debug, Clone)]
pub struct TransferReporter {
    sender: mpsc::UnboundedSender<TransferEvent>,
}

impl TransferReporter {
    // A closed channel means nobody observes this upload anymore; the
    // backend keeps transferring regardless.
    pub fn progress(&self, percent: f64) {
        let _ = self.sender.send(TransferEvent::Progress(percent));
    }

    pub fn snapshot(&self, snapshot: StatusSnapshot) {
        let _ = self.sender.send(TransferEvent::Snapshot(snapshot));
    }

    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self.sender.send(TransferEvent::Failed(reason.into()));
    }
}

/// Capabilities the engine needs from an object store.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Resolve a logical path to a backend location.
    fn reference(&self, path: &str) -> Result<StorageRef, StorageError> {
        StorageRef::parse(path)
    }

    /// Begin uploading `file` to `reference`.
    ///
    /// Must return immediately; the upload continues in the background and
    /// reports through the returned handle until it reaches a terminal state.
    fn put(
        &self,
        reference: &StorageRef,
        file: &SourceFile,
        metadata: &Metadata,
    ) -> Result<TransferHandle, StorageError>;

    /// Fully-qualified retrieval URL, including an access token.
    async fn download_url(&self, reference: &StorageRef) -> Result<String, StorageError>;

    /// Remove the object at `reference`.
    async fn delete(&self, reference: &StorageRef) -> Result<(), StorageError>;
}
