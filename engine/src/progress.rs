//! Progress aggregation and batch observers.
//!
//! `aggregate_progress` folds the progress of sibling tasks into one
//! percentage stream. `BatchObserver` decouples the engine from whatever
//! presents a batch (CLI, GUI, etc.); see `BatchSession::drive`.

use futures_util::stream::{self, BoxStream, StreamExt};

use crate::completion::BatchReport;
use crate::model::TransferOutcome;
use crate::session::BatchSession;
use crate::task::TransferTask;

/// Average progress of `tasks`, in percent.
///
/// Every task counts as 0 until it reports, so the first value is always `0`.
/// After that, one value is emitted per progress report from any task. Values
/// reflect the latest known progress of each task, not a consistent snapshot.
///
/// The stream never ends on its own; stop reading once it reaches 100 or the
/// batch has completed. An empty task list yields `100` once.
pub fn aggregate_progress(tasks: &[TransferTask]) -> BoxStream<'static, f64> {
    let count = tasks.len();
    if count == 0 {
        return stream::once(async { 100.0 }).chain(stream::pending()).boxed();
    }

    let sources = tasks.iter().enumerate().map(|(index, task)| {
        task.progress_stream()
            .map(move |percent| (index, percent))
            .boxed()
    });

    let mut latest = vec![0.0_f64; count];
    let averages = stream::select_all(sources).map(move |(index, percent)| {
        latest[index] = percent;
        latest.iter().sum::<f64>() / count as f64
    });

    stream::once(async { 0.0 })
        .chain(averages)
        .chain(stream::pending())
        .boxed()
}

/// Receives updates while a batch is driven to completion.
///
/// All methods are called from the task driving the batch, in order:
/// `on_batch_started`, then any interleaving of `on_progress` and
/// `on_item_completed`, then `on_batch_completed` exactly once.
pub trait BatchObserver: Send + Sync {
    /// Called before anything else.
    fn on_batch_started(&self, session: &BatchSession);

    /// Called for every aggregate progress value.
    fn on_progress(&self, session: &BatchSession, percent: f64);

    /// Called once per task as it reaches a terminal state.
    ///
    /// `index` is the task's position in the session.
    fn on_item_completed(&self, session: &BatchSession, index: usize, outcome: &TransferOutcome);

    /// Called once every task is terminal.
    fn on_batch_completed(&self, session: &BatchSession, report: &BatchReport);
}
