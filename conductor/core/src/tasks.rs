//! Task Types
//!
//! Descriptors, statuses, errors and lifecycle events for the long-running,
//! cancelable operations driven by the [`Scheduler`](crate::scheduler::Scheduler).
//! This module defines the data structures; the scheduler handles admission
//! and execution.
//!
//! # Design Philosophy
//!
//! A task is identified by its [`TaskId`] and grouped with other tasks through
//! its conflict keys. Two tasks conflict when their key sets intersect, and the
//! newcomer's [`CancellationPolicy`] decides what happens. Everything a task
//! produces reaches its owner as a [`TaskEvent`] over a single channel, so the
//! consumer handles partial output and the terminal outcome in one `match`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Task identifier, unique per scheduling attempt
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    /// Create a new task ID from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique task ID with the given prefix
    #[must_use]
    pub fn generate(prefix: &str) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        use std::time::{SystemTime, UNIX_EPOCH};

        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let count = COUNTER.fetch_add(1, Ordering::SeqCst);
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();

        Self(format!("{prefix}-{timestamp:x}{count:04x}"))
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the scheduler does when a new task conflicts with a live one
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CancellationPolicy {
    /// Cancel every conflicting live task, then admit the new one
    #[default]
    CancelOld,
    /// Refuse the new task with [`TaskError::ConflictRejected`]
    RejectNew,
    /// Admit the new task alongside the existing ones
    AllowParallel,
}

impl CancellationPolicy {
    /// Human-readable label
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::CancelOld => "cancel-old",
            Self::RejectNew => "reject-new",
            Self::AllowParallel => "allow-parallel",
        }
    }
}

impl std::fmt::Display for CancellationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Everything the scheduler needs to know about a task before running it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Unique identifier for this scheduling attempt
    pub id: TaskId,
    /// Kind of work (e.g. `chat/stream`); informational only
    pub category: String,
    /// Advisory priority. Stored, never used for admission.
    pub priority: i32,
    /// Conflict keys; two tasks conflict iff these sets intersect
    pub conflict_keys: BTreeSet<String>,
    /// Admission policy applied when a conflict is found
    pub cancellation_policy: CancellationPolicy,
}

impl TaskDescriptor {
    /// Create a descriptor with no conflict keys and the default policy
    pub fn new(id: TaskId, category: impl Into<String>) -> Self {
        Self {
            id,
            category: category.into(),
            priority: 0,
            conflict_keys: BTreeSet::new(),
            cancellation_policy: CancellationPolicy::default(),
        }
    }

    /// Set the advisory priority
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Add a conflict key
    #[must_use]
    pub fn with_conflict_key(mut self, key: impl Into<String>) -> Self {
        self.conflict_keys.insert(key.into());
        self
    }

    /// Set the cancellation policy
    #[must_use]
    pub fn with_policy(mut self, policy: CancellationPolicy) -> Self {
        self.cancellation_policy = policy;
        self
    }

    /// Whether this task conflicts with another descriptor
    #[must_use]
    pub fn conflicts_with(&self, other: &TaskDescriptor) -> bool {
        !self.conflict_keys.is_disjoint(&other.conflict_keys)
    }
}

/// Status of a scheduled task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Admitted and running
    Running,
    /// Cancellation requested, body has not returned yet
    Cancelling,
    /// Body returned successfully
    Done,
    /// Body returned an error
    Failed,
    /// Body observed cancellation
    Cancelled,
}

impl TaskStatus {
    /// Human-readable label
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Cancelling => "Cancelling",
            Self::Done => "Done",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Whether this status indicates the task is finished
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Errors a task can terminate with
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The remote service rejected our credentials
    #[error("{0}")]
    Authorization(String),

    /// Generic failure inside the task body
    #[error("{0}")]
    Failed(String),

    /// Refused admission under [`CancellationPolicy::RejectNew`]
    #[error("task rejected due to conflict on key '{key}'")]
    ConflictRejected {
        /// The conflict key that was already held
        key: String,
    },

    /// A task with this id is already live
    #[error("task {0} is already scheduled")]
    DuplicateTask(TaskId),

    /// The body noticed its token was cancelled.
    ///
    /// Never delivered as a [`TaskEvent::Failed`]; the scheduler turns it
    /// into [`TaskEvent::Cancelled`].
    #[error("task was cancelled")]
    Cancelled,

    /// The body panicked
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Whether this error should trigger the login redirect
    #[must_use]
    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Authorization(_))
    }
}

/// Lifecycle event of one scheduled task
///
/// Any number of `Partial` events are followed by exactly one terminal event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskEvent<T> {
    /// A chunk of incremental output
    Partial(T),
    /// The body finished with a result
    Complete(T),
    /// The body failed, or the task was never admitted
    Failed(TaskError),
    /// The task observed cancellation
    Cancelled,
}

impl<T> TaskEvent<T> {
    /// Whether this event ends the task's lifecycle
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Partial(_))
    }
}
