//! # Upload Engine - Batch Upload Orchestration
//!
//! Coordinates batches of independent uploads against an object-storage
//! backend and exposes per-file and aggregate progress and completion.
//! Designed as the foundation for multiple front ends (CLI, GUI, services).
//!
//! ## Overview
//!
//! - Every file becomes a [`TransferTask`] that starts uploading immediately
//! - Progress of a batch is folded into one aggregate percentage stream
//! - Completion is reported per item (finish order) and per batch (file order)
//! - Failures surface as `Err` outcomes instead of stalling the batch
//! - Completed uploads can be deleted in bulk with [`CleanupManager`]
//!
//! ## Basic Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use engine::{EngineConfig, LocalStorage, SourceFile, StorageBackend, TransferCoordinator};
//! use futures_util::StreamExt;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::default();
//! let backend: Arc<dyn StorageBackend> = Arc::new(LocalStorage::new(&config.local));
//! let coordinator = TransferCoordinator::with_config(backend, config);
//!
//! let files = vec![SourceFile::new("a.txt", "hello"), SourceFile::new("b.txt", "world")];
//! let session = coordinator.upload_many("uploads", files, None, None)?;
//!
//! // Aggregate progress starts at 0
//! let mut progress = session.aggregate_progress();
//! tokio::spawn(async move {
//!     while let Some(percent) = progress.next().await {
//!         println!("{percent:.0}%");
//!     }
//! });
//!
//! // Wait for the whole batch
//! for upload in session.batch_completion().await.into_completed()? {
//!     println!("{} -> {}", upload.destination_path, upload.stable_url);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core data structures (SourceFile, TaskState, CompletedTransfer)
//! - **error**: Error types and handling
//! - **storage**: Storage backend trait and the local filesystem backend
//! - **task**: A single upload and its streams
//! - **coordinator**: Fan-out of files into tasks
//! - **progress**: Aggregate progress and batch observers
//! - **completion**: Per-item and batch completion
//! - **session**: The batch handed back to callers
//! - **cleanup**: Bulk deletion
//! - **ledger**: Caller-owned record of completed uploads
//! - **config**: TOML configuration

pub mod cleanup;
pub mod completion;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod model;
pub mod progress;
pub mod session;
pub mod storage;
pub mod task;
pub mod url;

#[cfg(test)]
mod testing;

// Re-export main types and functions
pub use cleanup::CleanupManager;
pub use completion::{batch_completion, per_item_completions, BatchReport};
pub use config::{EngineConfig, LocalStorageConfig, UploadLimits};
pub use coordinator::{DestinationPaths, TransferCoordinator};
pub use error::{BatchError, ConfigError, DeletionError, DispatchError, StorageError, TransferFailure};
pub use ledger::UploadLedger;
pub use model::{
    CompletedTransfer, CorrelationData, Metadata, SnapshotState, SourceFile, StatusSnapshot,
    TaskState, TaskStatus, TransferOutcome,
};
pub use progress::{aggregate_progress, BatchObserver};
pub use session::BatchSession;
pub use storage::{LocalStorage, StorageBackend, StorageRef, TransferEvent, TransferHandle, TransferReporter};
pub use task::{TransferRequest, TransferTask};
pub use url::stable_url;
