//! Terminal rendering of conductor state and notifications

use std::io::Write;

use chat_conductor_core::{
    ChatBackend, Conductor, ConductorMessage, Conversation, GuidedSession, MessageRole,
    Scheduler,
};
use chrono::{DateTime, Local};

pub fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

/// Print one notification; returns true when the input prompt should be shown again
pub fn message(msg: &ConductorMessage) -> bool {
    match msg {
        ConductorMessage::Token { text, .. } => {
            print!("{text}");
            let _ = std::io::stdout().flush();
            false
        }
        ConductorMessage::StreamEnd { .. } => {
            println!();
            true
        }
        ConductorMessage::StreamError { error, .. } => {
            println!();
            println!("[error] {error}");
            true
        }
        ConductorMessage::GuidedReply {
            text,
            current_step,
            total_steps,
            ..
        } => {
            println!("{text}");
            println!("[step {current_step}/{total_steps}]");
            true
        }
        ConductorMessage::StatusChanged { status } => {
            tracing::debug!(%status, "Status changed");
            false
        }
        ConductorMessage::ConversationsChanged => false,
    }
}

/// Print the active conversation's history
pub fn print_active<B: ChatBackend + 'static>(conductor: &Conductor<B>) {
    let Some(conv) = conductor.active_conversation() else {
        return;
    };
    println!("== {} ==", conv.title);
    for msg in &conv.messages {
        let who = match msg.role {
            MessageRole::User => "you",
            MessageRole::Assistant => "ai",
        };
        println!("{who}: {}", msg.content);
    }
}

pub fn print_conversations<B: ChatBackend + 'static>(conductor: &Conductor<B>) {
    let conversations = conductor.conversations();
    if conversations.is_empty() {
        println!("No conversations yet");
        return;
    }
    let active = conductor.active_conversation().map(|c| &c.id);
    for (index, conv) in conversations.iter().enumerate() {
        let marker = if Some(&conv.id) == active { '*' } else { ' ' };
        println!(
            "{marker}{:>3}. {} ({} messages, {})",
            index + 1,
            conv.title,
            conv.messages.len(),
            updated(conv)
        );
    }
}

pub fn print_guided(session: Option<&GuidedSession>) {
    let Some(session) = session else {
        println!("No guided session");
        return;
    };
    println!(
        "Step {}/{} ({:.0}%)",
        session.current_step, session.total_steps, session.progress_percentage
    );
    for step in &session.learning_path {
        let marker = if step.step == session.current_step { '>' } else { ' ' };
        println!("{marker}{:>3}. {}", step.step, step.title);
    }
    if !session.weak_points.is_empty() {
        println!("Needs review: {}", session.weak_points.join(", "));
    }
}

pub fn print_tasks(scheduler: &Scheduler) {
    let tasks = scheduler.snapshot();
    if tasks.is_empty() {
        println!("No live tasks");
        return;
    }
    for task in tasks {
        println!(
            "{} [{}] {} keys={} {:.1}s",
            task.id,
            task.status.label(),
            task.category,
            task.conflict_keys.join(","),
            task.elapsed.as_secs_f64()
        );
    }
}

fn updated(conv: &Conversation) -> String {
    i64::try_from(conv.updated_at)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .map_or_else(
            || "unknown".to_string(),
            |t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
        )
}
