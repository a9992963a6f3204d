//! Task Reporter
//!
//! Write-only channel a running task uses to emit partial output.

use tokio::sync::mpsc;

use super::CancellationToken;
use crate::tasks::{TaskEvent, TaskId};

/// Emits partial output for one scheduled task
///
/// Chunks reach the task's [`TaskHandle`](super::TaskHandle) in the order
/// they were reported. Once the task's token is cancelled, further chunks are
/// dropped: reporting after cancellation is a bug in the body, and it must not
/// touch state that has already been finalized.
pub struct TaskReporter<T> {
    task_id: TaskId,
    token: CancellationToken,
    tx: mpsc::UnboundedSender<TaskEvent<T>>,
}

impl<T> TaskReporter<T> {
    pub(crate) fn new(
        task_id: TaskId,
        token: CancellationToken,
        tx: mpsc::UnboundedSender<TaskEvent<T>>,
    ) -> Self {
        Self { task_id, token, tx }
    }

    /// The task this reporter belongs to
    #[must_use]
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Report one chunk of partial output
    pub fn report_partial(&self, chunk: T) {
        if self.token.is_cancelled() {
            tracing::trace!(task_id = %self.task_id, "Dropping partial reported after cancellation");
            return;
        }
        if self.tx.send(TaskEvent::Partial(chunk)).is_err() {
            tracing::trace!(task_id = %self.task_id, "Task handle dropped, partial discarded");
        }
    }
}

impl<T> Clone for TaskReporter<T> {
    fn clone(&self) -> Self {
        Self {
            task_id: self.task_id.clone(),
            token: self.token.clone(),
            tx: self.tx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_preserves_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = TaskReporter::new(TaskId::new("t"), CancellationToken::new(), tx);

        reporter.report_partial("one");
        reporter.report_partial("two");

        assert_eq!(rx.try_recv().unwrap(), TaskEvent::Partial("one"));
        assert_eq!(rx.try_recv().unwrap(), TaskEvent::Partial("two"));
    }

    #[test]
    fn test_report_after_cancel_is_dropped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let reporter = TaskReporter::new(TaskId::new("t"), token.clone(), tx);

        reporter.report_partial("before");
        token.cancel();
        reporter.report_partial("after");

        assert_eq!(rx.try_recv().unwrap(), TaskEvent::Partial("before"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_report_without_receiver_is_harmless() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let reporter = TaskReporter::new(TaskId::new("t"), CancellationToken::new(), tx);
        reporter.report_partial(1_u32);
        assert_eq!(reporter.task_id().as_str(), "t");
    }
}
