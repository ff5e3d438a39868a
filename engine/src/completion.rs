//! Per-item and whole-batch completion views.

use std::future::Future;

use futures_util::future::join_all;
use futures_util::stream::{BoxStream, FuturesUnordered, StreamExt};
use serde::Serialize;

use crate::error::{BatchError, TransferFailure};
use crate::model::{CompletedTransfer, TransferOutcome};
use crate::task::TransferTask;

/// One outcome per task, in the order tasks finish.
///
/// Ends after the last task. Failed tasks yield their `Err` so the stream
/// never waits on an upload that will not complete.
pub fn per_item_completions(tasks: &[TransferTask]) -> BoxStream<'static, TransferOutcome> {
    indexed_completions(tasks)
        .map(|(_, outcome)| outcome)
        .boxed()
}

/// Like [`per_item_completions`], paired with each task's position in `tasks`.
pub(crate) fn indexed_completions(
    tasks: &[TransferTask],
) -> BoxStream<'static, (usize, TransferOutcome)> {
    tasks
        .iter()
        .cloned()
        .enumerate()
        .map(|(index, task)| async move { (index, task.completion().await) })
        .collect::<FuturesUnordered<_>>()
        .boxed()
}

/// Resolves once every task is terminal, with outcomes in task order.
pub fn batch_completion(tasks: &[TransferTask]) -> impl Future<Output = BatchReport> + Send + 'static {
    let tasks = tasks.to_vec();
    async move {
        let outcomes = join_all(tasks.iter().map(|task| task.completion())).await;
        BatchReport { outcomes }
    }
}

/// Outcome of every task in a batch, in batch order.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    outcomes: Vec<TransferOutcome>,
}

impl BatchReport {
    pub fn outcomes(&self) -> &[TransferOutcome] {
        &self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Completed transfers, in batch order.
    pub fn succeeded(&self) -> impl Iterator<Item = &CompletedTransfer> {
        self.outcomes.iter().filter_map(|o| o.as_ref().ok())
    }

    /// Failures with their batch index.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &TransferFailure)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.as_ref().err().map(|e| (i, e)))
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(Result::is_ok)
    }

    /// All completion records, or every failure if any task failed.
    pub fn into_completed(self) -> Result<Vec<CompletedTransfer>, BatchError> {
        let total = self.outcomes.len();
        let mut completed = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for (index, outcome) in self.outcomes.into_iter().enumerate() {
            match outcome {
                Ok(record) => completed.push(record),
                Err(failure) => failures.push((index, failure)),
            }
        }
        if failures.is_empty() {
            Ok(completed)
        } else {
            Err(BatchError {
                failures,
                succeeded: completed.len(),
            })
        }
    }
}

/// Serialized summary: `{ "succeeded": [...], "failed": [{ "index", "error" }] }`.
impl Serialize for BatchReport {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        #[derive(Serialize)]
        struct Failed {
            index: usize,
            path: String,
            error: String,
        }

        let succeeded: Vec<&CompletedTransfer> = self.succeeded().collect();
        let failed: Vec<Failed> = self
            .failures()
            .map(|(index, failure)| Failed {
                index,
                path: failure.path().to_string(),
                error: failure.to_string(),
            })
            .collect();

        let mut state = serializer.serialize_struct("BatchReport", 2)?;
        state.serialize_field("succeeded", &succeeded)?;
        state.serialize_field("failed", &failed)?;
        state.end()
    }
}
