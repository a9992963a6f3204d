//! Scheduler Implementation
//!
//! Admission, execution and termination of conflict-keyed tasks.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{CancellationToken, TaskReporter};
use crate::tasks::{CancellationPolicy, TaskDescriptor, TaskError, TaskEvent, TaskId, TaskStatus};

// ============================================================================
// Registry
// ============================================================================

/// Scheduler-owned record of an admitted task
struct RunningTask {
    descriptor: TaskDescriptor,
    token: CancellationToken,
    started_at: Instant,
    status: TaskStatus,
    /// Admission sequence number; distinguishes reuses of the same id
    seq: u64,
}

impl RunningTask {
    fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.descriptor.id.clone(),
            category: self.descriptor.category.clone(),
            priority: self.descriptor.priority,
            conflict_keys: self.descriptor.conflict_keys.iter().cloned().collect(),
            status: self.status,
            elapsed: self.started_at.elapsed(),
        }
    }
}

#[derive(Default)]
struct Registry {
    /// Admitted tasks that still own their conflict keys
    live: HashMap<TaskId, RunningTask>,
    /// Conflict key -> live task ids
    by_key: HashMap<String, BTreeSet<TaskId>>,
    /// Cancelled tasks whose bodies have not returned yet
    draining: HashMap<TaskId, RunningTask>,
    next_seq: u64,
}

impl Registry {
    fn first_conflict_key<'a>(&self, descriptor: &'a TaskDescriptor) -> Option<&'a String> {
        descriptor
            .conflict_keys
            .iter()
            .find(|key| self.by_key.get(*key).is_some_and(|ids| !ids.is_empty()))
    }

    fn conflicting_ids(&self, descriptor: &TaskDescriptor) -> BTreeSet<TaskId> {
        descriptor
            .conflict_keys
            .iter()
            .filter_map(|key| self.by_key.get(key))
            .flatten()
            .cloned()
            .collect()
    }

    fn admit(&mut self, descriptor: TaskDescriptor, token: CancellationToken) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;

        for key in &descriptor.conflict_keys {
            self.by_key
                .entry(key.clone())
                .or_default()
                .insert(descriptor.id.clone());
        }
        self.live.insert(
            descriptor.id.clone(),
            RunningTask {
                descriptor,
                token,
                started_at: Instant::now(),
                status: TaskStatus::Running,
                seq,
            },
        );
        seq
    }

    fn unlink(&mut self, id: &TaskId) -> Option<RunningTask> {
        let task = self.live.remove(id)?;
        for key in &task.descriptor.conflict_keys {
            if let Some(ids) = self.by_key.get_mut(key) {
                ids.remove(id);
                if ids.is_empty() {
                    self.by_key.remove(key);
                }
            }
        }
        Some(task)
    }

    fn cancel(&mut self, id: &TaskId) -> bool {
        let Some(mut task) = self.unlink(id) else {
            return false;
        };
        task.token.cancel();
        task.status = TaskStatus::Cancelling;
        tracing::debug!(
            task_id = %id,
            category = %task.descriptor.category,
            "Cancellation requested"
        );
        self.draining.insert(id.clone(), task);
        true
    }

    fn finish(&mut self, id: &TaskId, seq: u64) {
        if self.live.get(id).is_some_and(|t| t.seq == seq) {
            self.unlink(id);
        } else if self.draining.get(id).is_some_and(|t| t.seq == seq) {
            self.draining.remove(id);
        }
    }
}

// ============================================================================
// Handles and snapshots
// ============================================================================

/// Receiving end of one task's lifecycle events
///
/// Yields any number of [`TaskEvent::Partial`] followed by exactly one
/// terminal event.
pub struct TaskHandle<T> {
    id: TaskId,
    events: mpsc::UnboundedReceiver<TaskEvent<T>>,
}

impl<T> TaskHandle<T> {
    /// The task this handle observes
    #[must_use]
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Take the next queued event without waiting
    pub fn try_next(&mut self) -> Option<TaskEvent<T>> {
        self.events.try_recv().ok()
    }

    /// Wait for the next event
    ///
    /// Returns `None` once the terminal event has been consumed.
    pub async fn next(&mut self) -> Option<TaskEvent<T>> {
        self.events.recv().await
    }

    /// Drive the handle to completion, returning every event in order
    pub async fn join(mut self) -> Vec<TaskEvent<T>> {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }
}

/// Point-in-time view of a scheduled task
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskSnapshot {
    /// Task identifier
    pub id: TaskId,
    /// Task category
    pub category: String,
    /// Advisory priority
    pub priority: i32,
    /// Conflict keys, sorted
    pub conflict_keys: Vec<String>,
    /// `Running`, or `Cancelling` while a cancelled body winds down
    pub status: TaskStatus,
    /// Time since admission
    pub elapsed: Duration,
}

// ============================================================================
// Scheduler
// ============================================================================

/// Runs at most one winning task per conflict key
///
/// Cheap to clone; clones share one registry.
#[derive(Clone, Default)]
pub struct Scheduler {
    registry: Arc<Mutex<Registry>>,
}

impl Scheduler {
    /// Create an empty scheduler
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit and start a task
    ///
    /// Admission is decided synchronously: under `CancelOld` every live task
    /// sharing a conflict key is signalled and unregistered before the new
    /// task is registered. A rejected or duplicate task never runs; its handle
    /// already holds the [`TaskEvent::Failed`] when this returns.
    ///
    /// The body runs on the Tokio runtime. If its token has been cancelled
    /// by the time it returns, the terminal event is
    /// [`TaskEvent::Cancelled`] whatever the body returned.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn schedule<T, F, Fut>(&self, descriptor: TaskDescriptor, body: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken, TaskReporter<T>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = descriptor.id.clone();
        let handle = TaskHandle {
            id: id.clone(),
            events: rx,
        };
        let token = CancellationToken::new();

        let seq = {
            let mut registry = self.registry.lock();

            if registry.live.contains_key(&id) {
                tracing::warn!(task_id = %id, "Refusing to schedule duplicate task id");
                let _ = tx.send(TaskEvent::Failed(TaskError::DuplicateTask(id)));
                return handle;
            }

            match descriptor.cancellation_policy {
                CancellationPolicy::CancelOld => {
                    for conflicting in registry.conflicting_ids(&descriptor) {
                        registry.cancel(&conflicting);
                    }
                }
                CancellationPolicy::RejectNew => {
                    if let Some(key) = registry.first_conflict_key(&descriptor) {
                        tracing::debug!(
                            task_id = %id,
                            conflict_key = %key,
                            "Rejecting task due to conflict"
                        );
                        let _ = tx.send(TaskEvent::Failed(TaskError::ConflictRejected {
                            key: key.clone(),
                        }));
                        return handle;
                    }
                }
                CancellationPolicy::AllowParallel => {}
            }

            tracing::debug!(
                task_id = %id,
                category = %descriptor.category,
                priority = descriptor.priority,
                policy = %descriptor.cancellation_policy,
                "Task admitted"
            );
            registry.admit(descriptor, token.clone())
        };

        let reporter = TaskReporter::new(id.clone(), token.clone(), tx.clone());
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            let joined = tokio::spawn(body(token.clone(), reporter)).await;

            let cancelled = {
                let mut registry = registry.lock();
                registry.finish(&id, seq);
                token.is_cancelled()
            };

            let event = match joined {
                _ if cancelled => TaskEvent::Cancelled,
                Ok(Ok(result)) => TaskEvent::Complete(result),
                Ok(Err(TaskError::Cancelled)) => TaskEvent::Cancelled,
                Ok(Err(err)) => TaskEvent::Failed(err),
                Err(join_err) if join_err.is_panic() => {
                    TaskEvent::Failed(TaskError::Panicked(panic_message(join_err)))
                }
                Err(_) => TaskEvent::Cancelled,
            };

            match &event {
                TaskEvent::Failed(err) => {
                    tracing::warn!(task_id = %id, error = %err, "Task failed");
                }
                _ => tracing::debug!(
                    task_id = %id,
                    status = %terminal_status(&event),
                    "Task finished"
                ),
            }

            if tx.send(event).is_err() {
                tracing::trace!(task_id = %id, "Task handle dropped before terminal event");
            }
        });

        handle
    }

    /// Cancel one live task by id
    ///
    /// Returns `false` if no live task has this id. The task's handle still
    /// receives [`TaskEvent::Cancelled`] once its body returns.
    pub fn cancel_task(&self, id: &TaskId) -> bool {
        self.registry.lock().cancel(id)
    }

    /// Cancel every live task holding `key`
    ///
    /// Returns how many tasks were cancelled.
    pub fn cancel_by_conflict_key(&self, key: &str) -> usize {
        let mut registry = self.registry.lock();
        let ids: Vec<TaskId> = registry
            .by_key
            .get(key)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();

        let cancelled = ids.iter().filter(|id| registry.cancel(id)).count();
        if cancelled > 0 {
            tracing::debug!(conflict_key = %key, count = cancelled, "Cancelled tasks by conflict key");
        }
        cancelled
    }

    /// Whether a task with this id is live (admitted and not cancelled)
    #[must_use]
    pub fn is_live(&self, id: &TaskId) -> bool {
        self.registry.lock().live.contains_key(id)
    }

    /// Number of live tasks holding `key`
    #[must_use]
    pub fn live_count(&self, key: &str) -> usize {
        self.registry.lock().by_key.get(key).map_or(0, BTreeSet::len)
    }

    /// Ids of live tasks holding `key`, sorted
    #[must_use]
    pub fn live_ids(&self, key: &str) -> Vec<TaskId> {
        self.registry
            .lock()
            .by_key
            .get(key)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every live and draining task, sorted by id
    #[must_use]
    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        let registry = self.registry.lock();
        let mut tasks: Vec<TaskSnapshot> = registry
            .live
            .values()
            .chain(registry.draining.values())
            .map(RunningTask::snapshot)
            .collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        tasks
    }
}

fn terminal_status<T>(event: &TaskEvent<T>) -> TaskStatus {
    match event {
        TaskEvent::Partial(_) => TaskStatus::Running,
        TaskEvent::Complete(_) => TaskStatus::Done,
        TaskEvent::Failed(_) => TaskStatus::Failed,
        TaskEvent::Cancelled => TaskStatus::Cancelled,
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string()),
        Err(err) => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::sync::oneshot;

    const KEY: &str = "chat-stream";

    fn explode() -> Result<String, TaskError> {
        panic!("kaboom")
    }

    fn descriptor(id: &str, policy: CancellationPolicy) -> TaskDescriptor {
        TaskDescriptor::new(TaskId::new(id), "test")
            .with_conflict_key(KEY)
            .with_policy(policy)
    }

    /// Schedule a body that reports nothing and waits for cancellation
    fn schedule_waiting(scheduler: &Scheduler, desc: TaskDescriptor) -> TaskHandle<String> {
        scheduler.schedule(desc, |token, _reporter| async move {
            token.cancelled().await;
            Err::<String, _>(TaskError::Cancelled)
        })
    }

    #[tokio::test]
    async fn test_partials_then_complete() {
        let scheduler = Scheduler::new();
        let handle = scheduler.schedule(
            descriptor("a", CancellationPolicy::CancelOld),
            |_token, reporter| async move {
                reporter.report_partial("Hi".to_string());
                reporter.report_partial(" there".to_string());
                Ok("done".to_string())
            },
        );

        let events = handle.join().await;
        assert_eq!(
            events,
            vec![
                TaskEvent::Partial("Hi".to_string()),
                TaskEvent::Partial(" there".to_string()),
                TaskEvent::Complete("done".to_string()),
            ]
        );
        assert_eq!(scheduler.live_count(KEY), 0);
        assert!(scheduler.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_body_error_is_delivered() {
        let scheduler = Scheduler::new();
        let handle: TaskHandle<String> = scheduler.schedule(
            descriptor("a", CancellationPolicy::CancelOld),
            |_token, _reporter| async move { Err::<String, _>(TaskError::Failed("boom".to_string())) },
        );

        let events = handle.join().await;
        assert_eq!(
            events,
            vec![TaskEvent::Failed(TaskError::Failed("boom".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_cancel_old_supersedes_live_task() {
        let scheduler = Scheduler::new();
        let first = schedule_waiting(&scheduler, descriptor("a", CancellationPolicy::CancelOld));
        assert!(scheduler.is_live(&TaskId::new("a")));

        let second = schedule_waiting(&scheduler, descriptor("b", CancellationPolicy::CancelOld));

        // Admission of b happened only after a was signalled and unregistered
        assert_eq!(scheduler.live_ids(KEY), vec![TaskId::new("b")]);
        assert!(!scheduler.is_live(&TaskId::new("a")));

        assert_eq!(first.join().await, vec![TaskEvent::Cancelled]);

        assert_eq!(scheduler.cancel_by_conflict_key(KEY), 1);
        assert_eq!(second.join().await, vec![TaskEvent::Cancelled]);
        assert_eq!(scheduler.live_count(KEY), 0);
    }

    #[tokio::test]
    async fn test_cancel_old_ignores_priority() {
        let scheduler = Scheduler::new();
        let high = schedule_waiting(
            &scheduler,
            descriptor("high", CancellationPolicy::CancelOld).with_priority(100),
        );
        let _low = schedule_waiting(
            &scheduler,
            descriptor("low", CancellationPolicy::CancelOld).with_priority(-5),
        );

        assert_eq!(high.join().await, vec![TaskEvent::Cancelled]);
        assert_eq!(scheduler.live_ids(KEY), vec![TaskId::new("low")]);
        scheduler.cancel_by_conflict_key(KEY);
    }

    #[tokio::test]
    async fn test_reject_new_fails_synchronously() {
        let scheduler = Scheduler::new();
        let _first = schedule_waiting(&scheduler, descriptor("a", CancellationPolicy::CancelOld));

        let mut rejected =
            schedule_waiting(&scheduler, descriptor("b", CancellationPolicy::RejectNew));

        assert_eq!(
            rejected.try_next(),
            Some(TaskEvent::Failed(TaskError::ConflictRejected {
                key: KEY.to_string()
            }))
        );
        assert_eq!(scheduler.live_ids(KEY), vec![TaskId::new("a")]);
        scheduler.cancel_by_conflict_key(KEY);
    }

    #[tokio::test]
    async fn test_reject_new_without_conflict_is_admitted() {
        let scheduler = Scheduler::new();
        let handle = scheduler.schedule(
            descriptor("a", CancellationPolicy::RejectNew),
            |_token, _reporter| async move { Ok(7_u32) },
        );
        assert_eq!(handle.join().await, vec![TaskEvent::Complete(7)]);
    }

    #[tokio::test]
    async fn test_allow_parallel_keeps_both() {
        let scheduler = Scheduler::new();
        let a = schedule_waiting(&scheduler, descriptor("a", CancellationPolicy::AllowParallel));
        let b = schedule_waiting(&scheduler, descriptor("b", CancellationPolicy::AllowParallel));

        assert_eq!(scheduler.live_count(KEY), 2);
        assert_eq!(scheduler.cancel_by_conflict_key(KEY), 2);
        assert_eq!(a.join().await, vec![TaskEvent::Cancelled]);
        assert_eq!(b.join().await, vec![TaskEvent::Cancelled]);
    }

    #[tokio::test]
    async fn test_cancel_old_sweeps_every_shared_key() {
        let scheduler = Scheduler::new();
        let a = schedule_waiting(
            &scheduler,
            TaskDescriptor::new(TaskId::new("a"), "test").with_conflict_key("x"),
        );
        let b = schedule_waiting(
            &scheduler,
            TaskDescriptor::new(TaskId::new("b"), "test").with_conflict_key("y"),
        );
        let c = schedule_waiting(
            &scheduler,
            TaskDescriptor::new(TaskId::new("c"), "test")
                .with_conflict_key("x")
                .with_conflict_key("y"),
        );

        assert_eq!(a.join().await, vec![TaskEvent::Cancelled]);
        assert_eq!(b.join().await, vec![TaskEvent::Cancelled]);
        assert_eq!(scheduler.live_ids("x"), vec![TaskId::new("c")]);
        assert_eq!(scheduler.live_ids("y"), vec![TaskId::new("c")]);

        scheduler.cancel_task(&TaskId::new("c"));
        assert_eq!(c.join().await, vec![TaskEvent::Cancelled]);
    }

    #[tokio::test]
    async fn test_duplicate_id_is_refused() {
        let scheduler = Scheduler::new();
        let _first = schedule_waiting(&scheduler, descriptor("a", CancellationPolicy::AllowParallel));
        let mut dup = schedule_waiting(&scheduler, descriptor("a", CancellationPolicy::AllowParallel));

        assert_eq!(
            dup.try_next(),
            Some(TaskEvent::Failed(TaskError::DuplicateTask(TaskId::new("a"))))
        );
        assert_eq!(scheduler.live_count(KEY), 1);
        scheduler.cancel_by_conflict_key(KEY);
    }

    #[tokio::test]
    async fn test_cancellation_wins_over_late_success() {
        let scheduler = Scheduler::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let handle = scheduler.schedule(
            descriptor("a", CancellationPolicy::CancelOld),
            |_token, reporter| async move {
                let _ = release_rx.await;
                // Ignores the token on purpose: reports and succeeds anyway
                reporter.report_partial("late".to_string());
                Ok("ignored".to_string())
            },
        );

        assert!(scheduler.cancel_task(&TaskId::new("a")));
        release_tx.send(()).unwrap();

        assert_eq!(handle.join().await, vec![TaskEvent::Cancelled]);
    }

    #[tokio::test]
    async fn test_panicking_body_is_contained() {
        let scheduler = Scheduler::new();
        let handle: TaskHandle<String> = scheduler.schedule(
            descriptor("a", CancellationPolicy::CancelOld),
            |_token, _reporter| async move { explode() },
        );

        assert_eq!(
            handle.join().await,
            vec![TaskEvent::Failed(TaskError::Panicked("kaboom".to_string()))]
        );
        assert_eq!(scheduler.live_count(KEY), 0);
    }

    #[tokio::test]
    async fn test_snapshot_reports_draining_tasks() {
        let scheduler = Scheduler::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let handle: TaskHandle<String> = scheduler.schedule(
            descriptor("a", CancellationPolicy::CancelOld).with_priority(4),
            |_token, _reporter| async move {
                let _ = release_rx.await;
                Err::<String, _>(TaskError::Cancelled)
            },
        );

        let running = scheduler.snapshot();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].status, TaskStatus::Running);
        assert_eq!(running[0].priority, 4);
        assert_eq!(running[0].conflict_keys, vec![KEY.to_string()]);

        scheduler.cancel_by_conflict_key(KEY);
        let draining = scheduler.snapshot();
        assert_eq!(draining.len(), 1);
        assert_eq!(draining[0].status, TaskStatus::Cancelling);

        release_tx.send(()).unwrap();
        assert_eq!(handle.join().await, vec![TaskEvent::Cancelled]);
        assert!(scheduler.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_unknown_task_is_noop() {
        let scheduler = Scheduler::new();
        assert!(!scheduler.cancel_task(&TaskId::new("missing")));
        assert_eq!(scheduler.cancel_by_conflict_key("missing"), 0);
    }
}
