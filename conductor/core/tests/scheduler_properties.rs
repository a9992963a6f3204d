//! Scheduler properties under realistic chat-stream usage
//!
//! - Exclusivity of the chat-stream key across many supersessions
//! - A superseding task only starts after its predecessor was signalled
//! - Partial output is delivered in report order
//! - Every admitted task terminates exactly once

use std::sync::Arc;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::oneshot;

use chat_conductor_core::{
    CancellationPolicy, CancellationToken, Scheduler, TaskDescriptor, TaskError, TaskEvent,
    TaskHandle, TaskId, CHAT_STREAM_KEY,
};

fn chat_descriptor(id: &TaskId) -> TaskDescriptor {
    TaskDescriptor::new(id.clone(), "chat/stream")
        .with_priority(1)
        .with_conflict_key(CHAT_STREAM_KEY)
        .with_policy(CancellationPolicy::CancelOld)
}

/// Schedule a body that idles until cancelled
fn schedule_idle(scheduler: &Scheduler, id: &TaskId) -> TaskHandle<String> {
    scheduler.schedule(chat_descriptor(id), |token, _reporter| async move {
        token.cancelled().await;
        Err(TaskError::Cancelled)
    })
}

async fn terminal_events(handle: TaskHandle<String>) -> Vec<TaskEvent<String>> {
    handle
        .join()
        .await
        .into_iter()
        .filter(TaskEvent::is_terminal)
        .collect()
}

#[tokio::test]
async fn test_chat_key_is_exclusive_across_supersessions() {
    let scheduler = Scheduler::new();
    let mut handles = Vec::new();

    for _ in 0..20 {
        let id = TaskId::generate(CHAT_STREAM_KEY);
        handles.push(schedule_idle(&scheduler, &id));
        assert_eq!(scheduler.live_count(CHAT_STREAM_KEY), 1);
        assert_eq!(scheduler.live_ids(CHAT_STREAM_KEY), vec![id]);
    }

    assert_eq!(scheduler.cancel_by_conflict_key(CHAT_STREAM_KEY), 1);
    assert_eq!(scheduler.live_count(CHAT_STREAM_KEY), 0);

    // Every superseded task still terminates exactly once, as cancelled
    for handle in handles {
        assert_eq!(terminal_events(handle).await, vec![TaskEvent::Cancelled]);
    }
}

#[tokio::test]
async fn test_successor_starts_after_predecessor_is_signalled() {
    let scheduler = Scheduler::new();
    let first_token: Arc<Mutex<Option<CancellationToken>>> = Arc::new(Mutex::new(None));

    let (started_tx, started_rx) = oneshot::channel();
    let slot = Arc::clone(&first_token);
    let first = scheduler.schedule(
        chat_descriptor(&TaskId::generate(CHAT_STREAM_KEY)),
        move |token, reporter| async move {
            *slot.lock() = Some(token.clone());
            let _ = started_tx.send(());
            token.cancelled().await;
            // Reporting after cancellation must have no effect
            reporter.report_partial("late".to_string());
            Err(TaskError::Cancelled)
        },
    );
    started_rx.await.unwrap();

    let slot = Arc::clone(&first_token);
    let second = scheduler.schedule(
        chat_descriptor(&TaskId::generate(CHAT_STREAM_KEY)),
        move |_token, reporter| async move {
            let predecessor_cancelled = slot
                .lock()
                .as_ref()
                .is_some_and(CancellationToken::is_cancelled);
            reporter.report_partial(predecessor_cancelled.to_string());
            Ok(String::new())
        },
    );

    assert_eq!(
        second.join().await,
        vec![
            TaskEvent::Partial("true".to_string()),
            TaskEvent::Complete(String::new())
        ]
    );
    assert_eq!(first.join().await, vec![TaskEvent::Cancelled]);
}

#[tokio::test]
async fn test_partials_arrive_in_report_order() {
    let scheduler = Scheduler::new();
    let words: Vec<String> = (0..100).map(|i| format!("w{i} ")).collect();
    let expected = words.concat();

    let body_words = words.clone();
    let handle = scheduler.schedule(
        chat_descriptor(&TaskId::generate(CHAT_STREAM_KEY)),
        move |_token, reporter| async move {
            for word in body_words {
                reporter.report_partial(word);
                tokio::task::yield_now().await;
            }
            Ok(String::new())
        },
    );

    let events = handle.join().await;
    let folded: String = events
        .iter()
        .filter_map(|event| match event {
            TaskEvent::Partial(chunk) => Some(chunk.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(folded, expected);
    assert_eq!(events.last(), Some(&TaskEvent::Complete(String::new())));
}

#[tokio::test]
async fn test_reject_new_leaves_chat_stream_alone() {
    let scheduler = Scheduler::new();
    let live_id = TaskId::generate(CHAT_STREAM_KEY);
    let live = schedule_idle(&scheduler, &live_id);

    let rejected = scheduler.schedule(
        TaskDescriptor::new(TaskId::generate("indexing"), "indexing")
            .with_conflict_key(CHAT_STREAM_KEY)
            .with_policy(CancellationPolicy::RejectNew),
        |_token, _reporter| async move { Ok(String::new()) },
    );

    assert_eq!(
        terminal_events(rejected).await,
        vec![TaskEvent::Failed(TaskError::ConflictRejected {
            key: CHAT_STREAM_KEY.to_string()
        })]
    );
    assert!(scheduler.is_live(&live_id));

    assert!(scheduler.cancel_task(&live_id));
    assert_eq!(terminal_events(live).await, vec![TaskEvent::Cancelled]);
}

#[tokio::test]
async fn test_authorization_error_passes_through() {
    let scheduler = Scheduler::new();
    let handle = scheduler.schedule(
        chat_descriptor(&TaskId::generate(CHAT_STREAM_KEY)),
        |_token, _reporter| async move {
            Err::<String, _>(TaskError::Authorization("Unauthorized".to_string()))
        },
    );

    let events = terminal_events(handle).await;
    assert_eq!(
        events,
        vec![TaskEvent::Failed(TaskError::Authorization(
            "Unauthorized".to_string()
        ))]
    );
    assert_eq!(scheduler.live_count(CHAT_STREAM_KEY), 0);
}
