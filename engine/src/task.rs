//! A single upload and its observable lifecycle.
//!
//! `TransferTask::dispatch` starts the upload on the backend and spawns a
//! driver on the current tokio runtime. The driver is the only writer of the
//! task's status. The current status lives in a `watch` channel (for
//! `status()` and completion futures), and every progress report and
//! snapshot is also queued to each stream subscriber, so no subscriber
//! misses an update because it polled late.

use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DispatchError, TransferFailure};
use crate::model::{
    CompletedTransfer, CorrelationData, Metadata, SnapshotState, SourceFile, StatusSnapshot,
    TaskState, TaskStatus, TransferOutcome,
};
use crate::storage::{StorageBackend, StorageRef, TransferEvent, TransferHandle};
use crate::url::stable_url;

/// What to upload and where.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub file: SourceFile,
    pub destination_path: String,
    pub metadata: Metadata,
    pub correlation_data: Option<CorrelationData>,
}

/// Handle to one dispatched upload. Cloning shares the same upload.
#[derive(Debug, Clone)]
pub struct TransferTask {
    inner: Arc<TaskInner>,
}

#[derive(Debug)]
struct TaskInner {
    id: Uuid,
    reference: StorageRef,
    destination_path: String,
    source_file: SourceFile,
    requested_metadata: Metadata,
    correlation_data: Option<CorrelationData>,
    status: watch::Receiver<TaskStatus>,
    feeds: Mutex<Feeds>,
}

/// Per-subscriber queues. Closed once the driver is done.
#[derive(Debug, Default)]
struct Feeds {
    progress: Vec<mpsc::UnboundedSender<f64>>,
    snapshots: Vec<mpsc::UnboundedSender<StatusSnapshot>>,
    closed: bool,
}

impl Feeds {
    fn close(&mut self) {
        self.closed = true;
        self.progress.clear();
        self.snapshots.clear();
    }
}

impl TransferTask {
    /// Start uploading immediately.
    ///
    /// Must be called from within a tokio runtime. Fails only if the
    /// destination path is malformed or the backend refuses the upload
    /// synchronously; failures after this point surface through
    /// [`completion`](Self::completion).
    pub fn dispatch(
        backend: &Arc<dyn StorageBackend>,
        request: TransferRequest,
        token_delimiter: &str,
    ) -> Result<Self, DispatchError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| DispatchError::NoRuntime)?;

        let TransferRequest {
            file,
            destination_path,
            metadata,
            correlation_data,
        } = request;

        let reference = backend
            .reference(&destination_path)
            .map_err(|e| DispatchError::from_storage(&destination_path, e))?;
        let handle = backend
            .put(&reference, &file, &metadata)
            .map_err(|e| DispatchError::from_storage(&destination_path, e))?;

        let (status_tx, status_rx) = watch::channel(TaskStatus::pending());
        let inner = Arc::new(TaskInner {
            id: Uuid::new_v4(),
            reference,
            destination_path,
            source_file: file,
            requested_metadata: metadata,
            correlation_data,
            status: status_rx,
            feeds: Mutex::new(Feeds::default()),
        });

        debug!("Dispatched upload {} to {}", inner.id, inner.reference);

        let driver = Driver {
            backend: Arc::clone(backend),
            task: Arc::clone(&inner),
            status: status_tx,
            token_delimiter: token_delimiter.to_string(),
        };
        runtime.spawn(driver.run(handle));

        Ok(TransferTask { inner })
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn reference(&self) -> &StorageRef {
        &self.inner.reference
    }

    /// Path as requested by the caller (before normalization).
    pub fn destination_path(&self) -> &str {
        &self.inner.destination_path
    }

    pub fn source_file(&self) -> &SourceFile {
        &self.inner.source_file
    }

    /// Metadata sent with the upload; the backend's record may differ.
    pub fn requested_metadata(&self) -> &Metadata {
        &self.inner.requested_metadata
    }

    pub fn correlation_data(&self) -> Option<&CorrelationData> {
        self.inner.correlation_data.as_ref()
    }

    /// Current status.
    pub fn status(&self) -> TaskStatus {
        self.inner.status.borrow().clone()
    }

    pub fn state(&self) -> TaskState {
        self.inner.status.borrow().state.clone()
    }

    /// Last observed progress percentage.
    pub fn progress(&self) -> f64 {
        self.inner.status.borrow().progress
    }

    /// Progress percentages, one per backend report.
    ///
    /// A subscriber that joins late first receives the latest value, then
    /// every later report in order. Ends once the task is terminal. Values
    /// never decrease.
    pub fn progress_stream(&self) -> BoxStream<'static, f64> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut feeds = lock(&self.inner.feeds);
        {
            let status = self.inner.status.borrow();
            if status.progress_updates > 0 {
                let _ = tx.send(status.progress);
            }
        }
        if !feeds.closed {
            feeds.progress.push(tx);
        }
        drain(rx)
    }

    /// Raw backend snapshots, one per backend push, ending once the task is
    /// terminal. A late subscriber first receives the latest snapshot.
    pub fn snapshot_stream(&self) -> BoxStream<'static, StatusSnapshot> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut feeds = lock(&self.inner.feeds);
        if let Some(snapshot) = &self.inner.status.borrow().snapshot {
            let _ = tx.send(snapshot.clone());
        }
        if !feeds.closed {
            feeds.snapshots.push(tx);
        }
        drain(rx)
    }

    /// Resolves once the task is terminal, with its completion record or failure.
    ///
    /// Every call resolves to the same outcome.
    pub async fn completion(&self) -> TransferOutcome {
        let mut status = self.inner.status.clone();
        // An error here means the driver is gone without a terminal state.
        let outcome = status
            .wait_for(|s| s.state.is_terminal())
            .await
            .map(|current| current.state.outcome())
            .ok()
            .flatten();
        outcome.unwrap_or_else(|| {
            Err(TransferFailure::Interrupted {
                path: self.inner.reference.path().to_string(),
            })
        })
    }
}

fn drain<T: Send + 'static>(rx: mpsc::UnboundedReceiver<T>) -> BoxStream<'static, T> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|value| (value, rx)) }).boxed()
}

// Subscribing and publishing both hold this lock while touching the status,
// so a new subscriber sees every update exactly once.
fn lock(feeds: &Mutex<Feeds>) -> MutexGuard<'_, Feeds> {
    feeds.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Consumes backend events for one task and publishes its status.
struct Driver {
    backend: Arc<dyn StorageBackend>,
    task: Arc<TaskInner>,
    status: watch::Sender<TaskStatus>,
    token_delimiter: String,
}

impl Driver {
    async fn run(self, mut handle: TransferHandle) {
        let path = self.task.reference.path().to_string();
        let mut confirmed: Option<StatusSnapshot> = None;

        // The last success snapshot carries the complete metadata, so wait
        // for the backend to close the stream before resolving.
        let failure = loop {
            let Some(event) = handle.next_event().await else {
                break None;
            };
            match event {
                TransferEvent::Progress(percent) => self.publish_progress(percent),
                TransferEvent::Snapshot(snapshot) => {
                    let state = snapshot.state;
                    if state == SnapshotState::Success {
                        confirmed = Some(snapshot.clone());
                    }
                    self.publish_snapshot(snapshot);
                    match state {
                        SnapshotState::Canceled => {
                            break Some(TransferFailure::Canceled { path: path.clone() })
                        }
                        SnapshotState::Error => {
                            break Some(TransferFailure::Failed {
                                path: path.clone(),
                                reason: "backend reported an error snapshot".to_string(),
                            })
                        }
                        _ => {}
                    }
                }
                TransferEvent::Failed(reason) => {
                    break Some(TransferFailure::Failed {
                        path: path.clone(),
                        reason,
                    })
                }
            }
        };

        let state = match (failure, confirmed) {
            (Some(failure), _) => TaskState::Failed(failure),
            (None, Some(snapshot)) => match self.complete(snapshot).await {
                Ok(completed) => TaskState::Succeeded(completed),
                Err(failure) => TaskState::Failed(failure),
            },
            (None, None) => TaskState::Failed(TransferFailure::Interrupted { path }),
        };

        match &state {
            TaskState::Succeeded(completed) => info!("Upload complete: {}", completed.stable_url),
            TaskState::Failed(failure) => warn!("{}", failure),
            _ => {}
        }
        {
            let mut feeds = lock(&self.task.feeds);
            self.status.send_modify(|s| s.state = state);
            feeds.close();
        }
    }

    fn publish_progress(&self, percent: f64) {
        let mut feeds = lock(&self.task.feeds);
        let mut current = 0.0;
        self.status.send_modify(|s| {
            s.record_progress(percent);
            current = s.progress;
        });
        feeds.progress.retain(|tx| tx.send(current).is_ok());
    }

    fn publish_snapshot(&self, snapshot: StatusSnapshot) {
        let mut feeds = lock(&self.task.feeds);
        feeds.snapshots.retain(|tx| tx.send(snapshot.clone()).is_ok());
        self.status.send_modify(|s| s.record_snapshot(snapshot));
    }

    async fn complete(&self, snapshot: StatusSnapshot) -> Result<CompletedTransfer, TransferFailure> {
        let task = &self.task;
        let access_url = self
            .backend
            .download_url(&task.reference)
            .await
            .map_err(|e| TransferFailure::DownloadUrl {
                path: task.reference.path().to_string(),
                reason: e.to_string(),
            })?;

        Ok(CompletedTransfer {
            reference: task.reference.clone(),
            destination_path: task.destination_path.clone(),
            source_file: task.source_file.clone(),
            correlation_data: task.correlation_data.clone(),
            final_metadata: snapshot.metadata,
            stable_url: stable_url(&access_url, &self.token_delimiter),
            access_url,
        })
    }
}

// A driver dropped without finishing (runtime shutdown) must not leave
// subscribers waiting.
impl Drop for Driver {
    fn drop(&mut self) {
        lock(&self.task.feeds).close();
    }
}
