//! Cooperative Task Scheduler
//!
//! This module runs long-running, cancelable, incrementally-producing
//! operations and decides which of them is authoritative for a logical slot.
//! Slots are named by conflict keys; the newcomer's
//! [`CancellationPolicy`](crate::tasks::CancellationPolicy) resolves clashes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Scheduler                                │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │                        Registry                             │  │
//! │  │   live:     task_id -> RunningTask                          │  │
//! │  │   by_key:   "chat-stream" -> {task_id}                      │  │
//! │  │   draining: cancelled tasks whose body has not returned     │  │
//! │  └────────────────────────────────────────────────────────────┘  │
//! │        │ schedule()                        ▲ finish()             │
//! │        ▼                                   │                      │
//! │   tokio::spawn(body(token, reporter)) ─────┘                      │
//! │        │                                                          │
//! │        └── TaskEvent::{Partial, Complete, Failed, Cancelled} ──▶ TaskHandle
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Contract with task bodies
//!
//! Cancellation is cooperative. The scheduler only signals the
//! [`CancellationToken`]; the body must check it at each of its own await
//! points and stop reporting once it fires. A [`TaskReporter`] silently drops
//! chunks reported after cancellation, so a slow body can never write into
//! state that has moved on.
//!
//! # Example
//!
//! ```ignore
//! use chat_conductor_core::scheduler::Scheduler;
//! use chat_conductor_core::tasks::{CancellationPolicy, TaskDescriptor, TaskEvent, TaskId};
//!
//! let scheduler = Scheduler::new();
//! let descriptor = TaskDescriptor::new(TaskId::generate("demo"), "demo")
//!     .with_conflict_key("demo-slot")
//!     .with_policy(CancellationPolicy::CancelOld);
//!
//! let mut handle = scheduler.schedule(descriptor, |token, reporter| async move {
//!     for word in ["a", "b", "c"] {
//!         if token.is_cancelled() {
//!             return Err(chat_conductor_core::TaskError::Cancelled);
//!         }
//!         reporter.report_partial(word.to_string());
//!     }
//!     Ok(String::new())
//! });
//!
//! while let Some(event) = handle.next().await {
//!     if event.is_terminal() {
//!         break;
//!     }
//! }
//! ```

mod cancellation;
mod reporter;
mod task_scheduler;

pub use cancellation::CancellationToken;
pub use reporter::TaskReporter;
pub use task_scheduler::{Scheduler, TaskHandle, TaskSnapshot};
