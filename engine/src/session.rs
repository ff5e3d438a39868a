//! A dispatched batch and its three views.

use futures_util::stream::{BoxStream, StreamExt};
use futures_util::FutureExt;
use tracing::debug;

use crate::completion::{self, BatchReport};
use crate::model::TransferOutcome;
use crate::progress::{self, BatchObserver};
use crate::task::TransferTask;

/// Everything a caller gets back from `TransferCoordinator::upload_many`.
///
/// Each view can be obtained any number of times; every call subscribes
/// independently to the same tasks.
#[derive(Debug, Clone)]
pub struct BatchSession {
    tasks: Vec<TransferTask>,
}

impl BatchSession {
    pub(crate) fn new(tasks: Vec<TransferTask>) -> Self {
        BatchSession { tasks }
    }

    /// Tasks in batch order.
    pub fn tasks(&self) -> &[TransferTask] {
        &self.tasks
    }

    pub fn task(&self, index: usize) -> Option<&TransferTask> {
        self.tasks.get(index)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// See [`progress::aggregate_progress`].
    pub fn aggregate_progress(&self) -> BoxStream<'static, f64> {
        progress::aggregate_progress(&self.tasks)
    }

    /// See [`completion::per_item_completions`].
    pub fn item_completions(&self) -> BoxStream<'static, TransferOutcome> {
        completion::per_item_completions(&self.tasks)
    }

    /// See [`completion::batch_completion`].
    pub async fn batch_completion(&self) -> BatchReport {
        completion::batch_completion(&self.tasks).await
    }

    /// Feed every progress value and completion to `observer` until the
    /// batch is done, then return the report.
    pub async fn drive(&self, observer: &dyn BatchObserver) -> BatchReport {
        observer.on_batch_started(self);

        let mut progress = self.aggregate_progress();
        let mut items = completion::indexed_completions(&self.tasks);
        let mut remaining = self.tasks.len();

        while remaining > 0 {
            tokio::select! {
                biased;
                Some(percent) = progress.next() => observer.on_progress(self, percent),
                item = items.next() => match item {
                    Some((index, outcome)) => {
                        remaining -= 1;
                        observer.on_item_completed(self, index, &outcome);
                    }
                    None => break,
                },
            }
        }

        // Flush values already published by the last tasks to finish.
        while let Some(Some(percent)) = progress.next().now_or_never() {
            observer.on_progress(self, percent);
        }

        let report = self.batch_completion().await;
        debug!(
            "Batch of {} finished, {} failed",
            report.len(),
            report.failures().count()
        );
        observer.on_batch_completed(self, &report);
        report
    }
}
