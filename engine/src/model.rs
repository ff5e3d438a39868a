//! Core data model for uploads.
//!
//! This module defines the values that flow between the coordinator, the tasks
//! and the presentation layer:
//! - SourceFile: the local bytes being uploaded
//! - StatusSnapshot / SnapshotState: raw backend status pushes
//! - TaskState / TaskStatus: lifecycle of one upload
//! - CompletedTransfer: the record produced once an upload succeeds

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::Path;

use bytes::Bytes;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::TransferFailure;
use crate::storage::StorageRef;

/// Object metadata as string key/value pairs (e.g. `cache-control`).
pub type Metadata = BTreeMap<String, String>;

/// Caller-supplied tag attached to a task and handed back in its completion record.
///
/// The engine only ever writes the `index` key (for batch uploads).
pub type CorrelationData = serde_json::Map<String, serde_json::Value>;

/// Result of a single upload once it reached a terminal state.
pub type TransferOutcome = Result<CompletedTransfer, TransferFailure>;

/// Immutable handle to the local data being uploaded.
///
/// Cloning is cheap; the bytes are reference counted.
#[derive(Clone, PartialEq, Eq)]
pub struct SourceFile {
    name: String,
    data: Bytes,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        SourceFile {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Read a file from disk, naming it after its final path component.
    pub fn read(path: &Path) -> io::Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("not a file path: {}", path.display()),
                )
            })?
            .to_string();
        let data = std::fs::read(path)?;
        Ok(SourceFile::new(name, data))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

impl fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceFile")
            .field("name", &self.name)
            .field("size", &self.data.len())
            .finish()
    }
}

// Presentation layers get the name and size, never the payload.
impl Serialize for SourceFile {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("SourceFile", 2)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("size", &self.size())?;
        state.end()
    }
}

/// Backend-side state carried by a status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotState {
    Running,
    Paused,
    Success,
    Canceled,
    Error,
}

impl SnapshotState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SnapshotState::Success | SnapshotState::Canceled | SnapshotState::Error)
    }
}

/// A raw status push from the storage backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub state: SnapshotState,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    /// Metadata as the backend currently knows it
    pub metadata: Metadata,
}

impl StatusSnapshot {
    pub fn new(state: SnapshotState, bytes_transferred: u64, total_bytes: u64) -> Self {
        StatusSnapshot {
            state,
            bytes_transferred,
            total_bytes,
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Lifecycle of one upload.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskState {
    /// Dispatched, backend has not reported anything yet
    Pending,
    /// Backend reported progress or a non-terminal snapshot
    InProgress,
    /// Upload confirmed and retrieval URL resolved
    Succeeded(CompletedTransfer),
    /// Upload failed after dispatch
    Failed(TransferFailure),
}

impl TaskState {
    /// Returns true if no further changes are expected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded(_) | TaskState::Failed(_))
    }

    /// The terminal result, if this state is terminal.
    pub fn outcome(&self) -> Option<TransferOutcome> {
        match self {
            TaskState::Succeeded(completed) => Some(Ok(completed.clone())),
            TaskState::Failed(failure) => Some(Err(failure.clone())),
            TaskState::Pending | TaskState::InProgress => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::InProgress => "in_progress",
            TaskState::Succeeded(_) => "succeeded",
            TaskState::Failed(_) => "failed",
        }
    }
}

/// Everything known about a task at one instant.
///
/// The update counters let observers tell a fresh report from one they
/// already saw, even when the reported value is unchanged.
#[derive(Debug, Clone)]
pub struct TaskStatus {
    pub state: TaskState,
    /// Last observed progress in [0, 100], never decreasing
    pub progress: f64,
    /// Number of progress reports received so far
    pub progress_updates: u64,
    /// Most recent raw snapshot
    pub snapshot: Option<StatusSnapshot>,
    /// Number of snapshots received so far
    pub snapshot_updates: u64,
}

impl TaskStatus {
    pub(crate) fn pending() -> Self {
        TaskStatus {
            state: TaskState::Pending,
            progress: 0.0,
            progress_updates: 0,
            snapshot: None,
            snapshot_updates: 0,
        }
    }

    /// Record a progress report. Out-of-range values are clamped and a
    /// lower value than the last one keeps the last one.
    pub(crate) fn record_progress(&mut self, percent: f64) {
        let percent = if percent.is_nan() { 0.0 } else { percent.clamp(0.0, 100.0) };
        self.progress = self.progress.max(percent);
        self.progress_updates += 1;
        self.mark_in_progress();
    }

    pub(crate) fn record_snapshot(&mut self, snapshot: StatusSnapshot) {
        self.snapshot = Some(snapshot);
        self.snapshot_updates += 1;
        self.mark_in_progress();
    }

    fn mark_in_progress(&mut self) {
        if self.state == TaskState::Pending {
            self.state = TaskState::InProgress;
        }
    }
}

/// Record of a successful upload. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedTransfer {
    /// Where the object lives in the backend
    pub reference: StorageRef,
    pub destination_path: String,
    pub source_file: SourceFile,
    pub correlation_data: Option<CorrelationData>,
    /// Metadata as confirmed by the backend after the upload
    pub final_metadata: Metadata,
    /// Retrieval URL including the ephemeral access token
    pub access_url: String,
    /// `access_url` with the token stripped; only usable for public objects
    pub stable_url: String,
}

impl CompletedTransfer {
    /// The `index` stamped into the correlation data of batch uploads.
    pub fn batch_index(&self) -> Option<usize> {
        self.correlation_data
            .as_ref()
            .and_then(|data| data.get("index"))
            .and_then(|index| index.as_u64())
            .map(|index| index as usize)
    }
}
