//! Scripted storage backend for tests.
//!
//! Uploads never progress on their own; the test pushes every event through
//! the methods below, addressed by normalized path.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::model::{Metadata, SnapshotState, SourceFile, StatusSnapshot};
use crate::storage::{StorageBackend, StorageRef, TransferHandle, TransferReporter};

#[derive(Default)]
pub(crate) struct ScriptedStorage {
    state: Mutex<Script>,
}

#[derive(Default)]
struct Script {
    reporters: HashMap<String, TransferReporter>,
    dispatched: Vec<String>,
    reject_put: HashSet<String>,
    fail_url: HashSet<String>,
    fail_delete: HashSet<String>,
    deleted: Vec<String>,
}

impl ScriptedStorage {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(ScriptedStorage::default())
    }

    pub(crate) fn reject_put(&self, path: &str) {
        self.state.lock().unwrap().reject_put.insert(path.to_string());
    }

    pub(crate) fn fail_download_url(&self, path: &str) {
        self.state.lock().unwrap().fail_url.insert(path.to_string());
    }

    pub(crate) fn fail_delete(&self, path: &str) {
        self.state.lock().unwrap().fail_delete.insert(path.to_string());
    }

    /// Paths passed to `put`, in call order.
    pub(crate) fn dispatched(&self) -> Vec<String> {
        self.state.lock().unwrap().dispatched.clone()
    }

    /// Paths successfully deleted, in completion order.
    pub(crate) fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub(crate) fn progress(&self, path: &str, percent: f64) {
        self.reporter(path).progress(percent);
    }

    pub(crate) fn snapshot(&self, path: &str, snapshot: StatusSnapshot) {
        self.reporter(path).snapshot(snapshot);
    }

    /// Report 100%, a confirmed success snapshot, and close the upload.
    pub(crate) fn succeed(&self, path: &str) {
        let reporter = self.take(path);
        let mut metadata = Metadata::new();
        metadata.insert("confirmed".to_string(), "true".to_string());
        reporter.progress(100.0);
        reporter.snapshot(StatusSnapshot::new(SnapshotState::Success, 1, 1).with_metadata(metadata));
    }

    pub(crate) fn fail(&self, path: &str, reason: &str) {
        self.take(path).fail(reason);
    }

    /// Close the upload without a terminal report.
    pub(crate) fn close(&self, path: &str) {
        drop(self.take(path));
    }

    fn reporter(&self, path: &str) -> TransferReporter {
        self.state
            .lock()
            .unwrap()
            .reporters
            .get(path)
            .cloned()
            .unwrap_or_else(|| panic!("no upload in flight for {path}"))
    }

    fn take(&self, path: &str) -> TransferReporter {
        self.state
            .lock()
            .unwrap()
            .reporters
            .remove(path)
            .unwrap_or_else(|| panic!("no upload in flight for {path}"))
    }
}

#[async_trait]
impl StorageBackend for ScriptedStorage {
    fn put(
        &self,
        reference: &StorageRef,
        _file: &SourceFile,
        _metadata: &Metadata,
    ) -> Result<TransferHandle, StorageError> {
        let mut script = self.state.lock().unwrap();
        if script.reject_put.contains(reference.path()) {
            return Err(StorageError::Rejected {
                reason: "scripted rejection".to_string(),
            });
        }
        let (reporter, handle) = TransferHandle::channel();
        script.reporters.insert(reference.path().to_string(), reporter);
        script.dispatched.push(reference.path().to_string());
        Ok(handle)
    }

    async fn download_url(&self, reference: &StorageRef) -> Result<String, StorageError> {
        if self.state.lock().unwrap().fail_url.contains(reference.path()) {
            return Err(StorageError::NotFound {
                path: reference.path().to_string(),
            });
        }
        Ok(format!(
            "https://storage.test/o/{}?alt=media&token=tok",
            reference.path()
        ))
    }

    async fn delete(&self, reference: &StorageRef) -> Result<(), StorageError> {
        tokio::task::yield_now().await;
        let mut script = self.state.lock().unwrap();
        if script.fail_delete.contains(reference.path()) {
            return Err(StorageError::Rejected {
                reason: "scripted delete failure".to_string(),
            });
        }
        script.deleted.push(reference.path().to_string());
        Ok(())
    }
}
