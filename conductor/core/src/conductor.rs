//! Conductor - The Orchestration Core
//!
//! The Conductor turns user intents (send, stop, switch, delete, clear, ...)
//! into store transitions and scheduled chat streams, and folds stream output
//! back into the store. It orchestrates:
//! - the conversation store (single source of truth)
//! - the task scheduler (one live chat stream at a time)
//! - the chat backend
//! - persistence, the login redirect and an optional UI surface
//!
//! # Design Philosophy
//!
//! The Conductor is UI-agnostic and owned by one logical thread: every
//! intent takes `&mut self` and runs to completion synchronously, so no
//! surface can ever observe a half-applied transition. Stream output arrives
//! as [`TaskEvent`]s and is only folded when the surface drives
//! [`poll_tasks`](Conductor::poll_tasks), [`next_event`](Conductor::next_event)
//! or [`wait_idle`](Conductor::wait_idle).
//!
//! Every chat stream runs under the [`CHAT_STREAM_KEY`] conflict key with
//! [`CancellationPolicy::CancelOld`], so a new stream always supersedes the old
//! one. A superseded stream keeps draining until its terminal event, but only
//! the current stream may write into the store or change the status. Output
//! the current stream already reported is folded before it is cancelled, so
//! stopping never loses text the backend delivered.
//!
//! Guided learning turns share the same key: a guided turn and a chat stream
//! supersede each other. A guided turn has no placeholder; its reply is
//! appended whole when the task completes.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::backend::{ChatBackend, ChatRequest, GuidedReply, GuidedRequest, StreamEvent};
use crate::config::ConductorConfig;
use crate::conversation::{Conversation, ConversationId, MessageId};
use crate::effects::{AuthEffects, LogOnlyAuthEffects};
use crate::guided::{GuidedSession, GUIDED_TASK_CATEGORY};
use crate::messages::ConductorMessage;
use crate::persistence::{ChatPersistence, MemoryPersistence, PersistenceError};
use crate::reasoning::ReasoningFormatter;
use crate::scheduler::{CancellationToken, Scheduler, TaskHandle, TaskReporter};
use crate::store::{ChatStatus, ConversationStore, GuidedTurn, Turn};
use crate::tasks::{CancellationPolicy, TaskDescriptor, TaskError, TaskEvent, TaskId};

/// Conflict key shared by every chat stream
pub const CHAT_STREAM_KEY: &str = "chat-stream";

/// Task category of chat streams
pub const CHAT_TASK_CATEGORY: &str = "chat/stream";

/// Advisory priority of chat streams
const CHAT_TASK_PRIORITY: i32 = 1;

/// Output of a chat task
#[derive(Debug)]
enum TurnOutput {
    /// A formatted chunk of a streamed answer
    Text(String),
    /// The whole reply to a guided turn
    Guided(GuidedReply),
}

/// One scheduled chat task and where its output goes
struct StreamSlot {
    task_id: TaskId,
    conversation_id: ConversationId,
    /// Streaming placeholder; `None` for guided turns
    message_id: Option<MessageId>,
    handle: TaskHandle<TurnOutput>,
    finished: bool,
}

/// The Conductor - headless orchestration core
pub struct Conductor<B: ChatBackend> {
    /// Chat backend
    backend: Arc<B>,
    /// Task scheduler
    scheduler: Scheduler,
    /// Conversations and session state
    store: ConversationStore,
    /// Snapshot storage
    persistence: Arc<dyn ChatPersistence>,
    /// Login redirect
    auth_effects: Arc<dyn AuthEffects>,
    /// Channel to the UI surface, if one is attached
    surface: Option<mpsc::UnboundedSender<ConductorMessage>>,
    /// Streams whose terminal event has not been observed yet
    streams: Vec<StreamSlot>,
    /// The stream allowed to fold into the store
    current_task: Option<TaskId>,
}

impl<B: ChatBackend + 'static> Conductor<B> {
    /// Create a new Conductor with the given backend
    ///
    /// Starts with in-memory persistence and log-only auth effects; use the
    /// `with_*` builders to replace them.
    pub fn new(backend: B, config: &ConductorConfig) -> Self {
        Self {
            backend: Arc::new(backend),
            scheduler: Scheduler::new(),
            store: ConversationStore::with_mode(
                config.default_mode.clone(),
                config.retrieval_augmented,
            ),
            persistence: Arc::new(MemoryPersistence::new()),
            auth_effects: Arc::new(LogOnlyAuthEffects),
            surface: None,
            streams: Vec::new(),
            current_task: None,
        }
    }

    /// Use a different snapshot storage
    #[must_use]
    pub fn with_persistence(mut self, persistence: Arc<dyn ChatPersistence>) -> Self {
        self.persistence = persistence;
        self
    }

    /// Use different auth effects
    #[must_use]
    pub fn with_auth_effects(mut self, effects: Arc<dyn AuthEffects>) -> Self {
        self.auth_effects = effects;
        self
    }

    /// Attach a UI surface
    #[must_use]
    pub fn with_surface(mut self, tx: mpsc::UnboundedSender<ConductorMessage>) -> Self {
        self.surface = Some(tx);
        self
    }

    /// Share a scheduler with other components
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Restore the last saved snapshot
    ///
    /// Returns whether a snapshot was found. Call before the first intent.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage exists but cannot be read.
    pub fn restore(&mut self) -> Result<bool, PersistenceError> {
        let Some(snapshot) = self.persistence.load()? else {
            return Ok(false);
        };
        self.store.restore(snapshot);
        tracing::info!(
            conversations = self.store.conversations().len(),
            "Restored chat history"
        );
        self.notify(ConductorMessage::ConversationsChanged);
        Ok(true)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// The conversation store
    #[must_use]
    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// The task scheduler
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Backend name
    #[must_use]
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// The active conversation
    #[must_use]
    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.store.active_conversation()
    }

    /// All conversations, newest first
    #[must_use]
    pub fn conversations(&self) -> &[Conversation] {
        self.store.conversations()
    }

    /// Current chat status
    #[must_use]
    pub fn status(&self) -> ChatStatus {
        self.store.status()
    }

    /// Message of the last failure
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.store.last_error()
    }

    /// The stream currently allowed to fold into the store
    #[must_use]
    pub fn current_task(&self) -> Option<&TaskId> {
        self.current_task.as_ref()
    }

    /// Progress of the guided learning session
    #[must_use]
    pub fn guided_session(&self) -> Option<&GuidedSession> {
        self.store.guided_session()
    }

    /// Whether any stream still owes a terminal event
    #[must_use]
    pub fn has_pending_streams(&self) -> bool {
        !self.streams.is_empty()
    }

    // ========================================================================
    // Intents
    // ========================================================================

    /// Send a user message to the active conversation
    ///
    /// Creates a conversation if none is active. Any live stream is cancelled
    /// first. Returns the id of the new chat task, or `None` for a blank prompt.
    pub fn send_intent(&mut self, prompt: impl Into<String>) -> Option<TaskId> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            tracing::debug!("Ignoring blank prompt");
            return None;
        }

        self.cancel_stream();
        let turn = self.store.begin_turn(prompt);
        if turn.created_conversation {
            self.notify(ConductorMessage::ConversationsChanged);
        }
        Some(self.start_stream(turn))
    }

    /// Re-ask the last user message of the active conversation
    ///
    /// Returns `None` if there is nothing to retry.
    pub fn retry_intent(&mut self) -> Option<TaskId> {
        self.cancel_stream();
        let Some(turn) = self.store.begin_retry() else {
            tracing::debug!("Nothing to retry");
            self.notify(ConductorMessage::StatusChanged {
                status: self.store.status(),
            });
            self.persist();
            return None;
        };
        Some(self.start_stream(turn))
    }

    /// Send a user message as a guided learning turn
    ///
    /// Like [`send_intent`](Self::send_intent), but the reply arrives whole
    /// from the guided endpoint and updates the guided session. `topic` names
    /// the conversation when one has to be created and is sent along with the
    /// request. Returns `None` for a blank prompt.
    pub fn guided_send_intent(
        &mut self,
        prompt: impl Into<String>,
        topic: Option<String>,
    ) -> Option<TaskId> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            tracing::debug!("Ignoring blank guided prompt");
            return None;
        }

        self.cancel_stream();
        let turn = self.store.begin_guided_turn(prompt, topic.as_deref());
        if turn.created_conversation {
            self.notify(ConductorMessage::ConversationsChanged);
        }
        Some(self.start_guided(turn, topic))
    }

    /// Forget the guided learning session
    ///
    /// The next guided turn starts a new session on the service.
    pub fn clear_guided_session_intent(&mut self) {
        if self.store.clear_guided_session() {
            tracing::debug!("Cleared guided session");
        }
    }

    /// Stop the live stream
    ///
    /// Text already folded stays in the conversation.
    pub fn stop_intent(&mut self) {
        let cancelled = self.cancel_stream();
        tracing::debug!(cancelled, "Stop requested");
        self.set_status(ChatStatus::Idle);
        self.persist();
    }

    /// Create an empty conversation and make it active
    pub fn new_conversation_intent(&mut self) -> ConversationId {
        self.cancel_stream();
        let id = self.store.create_conversation();
        tracing::debug!(conversation_id = %id, "Created conversation");
        self.notify(ConductorMessage::ConversationsChanged);
        self.notify(ConductorMessage::StatusChanged {
            status: self.store.status(),
        });
        self.persist();
        id
    }

    /// Make another conversation active
    ///
    /// The live stream is cancelled even if `id` is unknown.
    pub fn select_conversation_intent(&mut self, id: &ConversationId) -> bool {
        self.cancel_stream();
        let selected = self.store.select_conversation(id);
        if selected {
            self.notify(ConductorMessage::ConversationsChanged);
        } else {
            tracing::debug!(conversation_id = %id, "Ignoring switch to unknown conversation");
        }
        self.notify(ConductorMessage::StatusChanged {
            status: self.store.status(),
        });
        self.persist();
        selected
    }

    /// Delete a conversation
    ///
    /// Does not cancel a live stream; its output simply stops landing once
    /// the streamed-into conversation is gone.
    pub fn delete_conversation_intent(&mut self, id: &ConversationId) -> bool {
        let deleted = self.store.delete_conversation(id);
        if deleted {
            tracing::debug!(conversation_id = %id, "Deleted conversation");
            self.notify(ConductorMessage::ConversationsChanged);
            self.persist();
        } else {
            tracing::debug!(conversation_id = %id, "Ignoring delete of unknown conversation");
        }
        deleted
    }

    /// Delete every conversation
    pub fn clear_history_intent(&mut self) {
        self.cancel_stream();
        self.store.clear_history();
        self.notify(ConductorMessage::ConversationsChanged);
        self.notify(ConductorMessage::StatusChanged {
            status: self.store.status(),
        });
        self.persist();
    }

    /// Set the base chat mode for future requests
    pub fn set_mode_intent(&mut self, mode: impl Into<String>) {
        self.store.set_mode(mode);
        self.persist();
    }

    /// Toggle retrieval augmentation for future requests
    pub fn set_retrieval_intent(&mut self, enabled: bool) {
        self.store.set_retrieval_augmented(enabled);
        self.persist();
    }

    // ========================================================================
    // Event processing
    // ========================================================================

    /// Fold every pending task event
    ///
    /// Call this regularly to process incoming tokens.
    /// Returns true if there was activity.
    pub fn poll_tasks(&mut self) -> bool {
        let mut slots = std::mem::take(&mut self.streams);
        let mut activity = false;

        for slot in &mut slots {
            while !slot.finished {
                let Some(event) = slot.handle.try_next() else {
                    break;
                };
                activity = true;
                if event.is_terminal() {
                    slot.finished = true;
                }
                self.apply_event(slot, event);
            }
        }

        slots.retain(|slot| !slot.finished);
        slots.append(&mut self.streams);
        self.streams = slots;
        activity
    }

    /// Wait for at least one task event, then fold everything pending
    ///
    /// Returns false immediately if no stream is pending.
    pub async fn next_event(&mut self) -> bool {
        if self.streams.is_empty() {
            return false;
        }

        let (index, event) = {
            let pending = self.streams.iter_mut().enumerate().map(|(index, slot)| {
                Box::pin(async move { (index, slot.handle.next().await) })
            });
            futures::future::select_all(pending).await.0
        };

        let mut slot = self.streams.remove(index);
        let event = event.unwrap_or_else(|| {
            tracing::warn!(task_id = %slot.task_id, "Task channel closed without a terminal event");
            TaskEvent::Cancelled
        });
        if event.is_terminal() {
            slot.finished = true;
        }
        self.apply_event(&slot, event);
        if !slot.finished {
            self.streams.insert(index, slot);
        }

        self.poll_tasks();
        true
    }

    /// Drive the Conductor until every stream has terminated
    pub async fn wait_idle(&mut self) {
        self.poll_tasks();
        while self.next_event().await {}
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Schedule the chat stream for a freshly started turn
    fn start_stream(&mut self, turn: Turn) -> TaskId {
        let messages = self.store.request_messages(&turn.conversation_id);
        let request = ChatRequest::new(&messages, self.store.effective_mode());

        let task_id = TaskId::generate(CHAT_STREAM_KEY);
        let descriptor = TaskDescriptor::new(task_id.clone(), CHAT_TASK_CATEGORY)
            .with_priority(CHAT_TASK_PRIORITY)
            .with_conflict_key(CHAT_STREAM_KEY)
            .with_policy(CancellationPolicy::CancelOld);

        tracing::debug!(
            task_id = %task_id,
            conversation_id = %turn.conversation_id,
            mode = %request.mode,
            messages = request.messages.len(),
            "Starting chat stream"
        );

        let backend = Arc::clone(&self.backend);
        let handle = self.scheduler.schedule(descriptor, move |token, reporter| {
            run_chat_stream(backend, request, token, reporter)
        });

        self.track(task_id, turn.conversation_id, Some(turn.assistant_message_id), handle)
    }

    /// Schedule the guided request for a freshly started guided turn
    fn start_guided(&mut self, turn: GuidedTurn, topic: Option<String>) -> TaskId {
        let messages = self.store.request_messages(&turn.conversation_id);
        let session_id = self.store.guided_session().map(|g| g.session_id.clone());
        let request = GuidedRequest::new(&messages)
            .with_session_id(session_id)
            .with_topic(topic);

        let task_id = TaskId::generate(CHAT_STREAM_KEY);
        let descriptor = TaskDescriptor::new(task_id.clone(), GUIDED_TASK_CATEGORY)
            .with_priority(CHAT_TASK_PRIORITY)
            .with_conflict_key(CHAT_STREAM_KEY)
            .with_policy(CancellationPolicy::CancelOld);

        tracing::debug!(
            task_id = %task_id,
            conversation_id = %turn.conversation_id,
            session_id = ?request.session_id,
            messages = request.messages.len(),
            "Starting guided turn"
        );

        let backend = Arc::clone(&self.backend);
        let handle = self.scheduler.schedule(descriptor, move |token, _reporter| {
            run_guided_turn(backend, request, token)
        });

        self.track(task_id, turn.conversation_id, None, handle)
    }

    /// Make a freshly scheduled task the current one
    fn track(
        &mut self,
        task_id: TaskId,
        conversation_id: ConversationId,
        message_id: Option<MessageId>,
        handle: TaskHandle<TurnOutput>,
    ) -> TaskId {
        self.streams.push(StreamSlot {
            task_id: task_id.clone(),
            conversation_id,
            message_id,
            handle,
            finished: false,
        });
        self.current_task = Some(task_id.clone());

        self.notify(ConductorMessage::StatusChanged {
            status: ChatStatus::Streaming,
        });
        self.persist();
        task_id
    }

    /// Cancel the live chat stream and retire its slot
    ///
    /// Output the current stream already reported is folded first. The
    /// retired placeholder then stops accepting output and the status leaves
    /// `streaming`; callers notify the surface. Returns whether a stream was
    /// live.
    fn cancel_stream(&mut self) -> bool {
        self.drain_current();
        let cancelled = self.scheduler.cancel_by_conflict_key(CHAT_STREAM_KEY);
        if let Some(task_id) = self.current_task.take() {
            if let Some(slot) = self.streams.iter().find(|s| s.task_id == task_id) {
                if let Some(message_id) = &slot.message_id {
                    self.store
                        .finalize_message(&slot.conversation_id, message_id);
                }
            }
            if self.store.status() == ChatStatus::Streaming {
                self.store.set_status(ChatStatus::Idle);
            }
        }
        cancelled > 0
    }

    /// Fold every event already queued by the current stream
    fn drain_current(&mut self) {
        let Some(index) = self
            .current_task
            .as_ref()
            .and_then(|id| self.streams.iter().position(|s| s.task_id == *id))
        else {
            return;
        };

        let mut slot = self.streams.remove(index);
        while !slot.finished {
            let Some(event) = slot.handle.try_next() else {
                break;
            };
            if event.is_terminal() {
                slot.finished = true;
            }
            self.apply_event(&slot, event);
        }
        if !slot.finished {
            self.streams.insert(index, slot);
        }
    }

    /// Apply one task event to the store
    fn apply_event(&mut self, slot: &StreamSlot, event: TaskEvent<TurnOutput>) {
        let is_current = self.current_task.as_ref() == Some(&slot.task_id);

        match event {
            TaskEvent::Partial(output) => {
                if !is_current {
                    tracing::trace!(task_id = %slot.task_id, "Dropping partial from superseded stream");
                    return;
                }
                let (TurnOutput::Text(chunk), Some(message_id)) = (output, &slot.message_id)
                else {
                    tracing::trace!(task_id = %slot.task_id, "Ignoring partial without a placeholder");
                    return;
                };
                if self
                    .store
                    .fold_partial(&slot.conversation_id, message_id, &chunk)
                {
                    self.notify(ConductorMessage::Token {
                        conversation_id: slot.conversation_id.clone(),
                        message_id: message_id.clone(),
                        text: chunk,
                    });
                } else {
                    tracing::trace!(
                        task_id = %slot.task_id,
                        conversation_id = %slot.conversation_id,
                        "Stream target is no longer active, dropping partial"
                    );
                }
            }

            TaskEvent::Complete(output) => {
                self.finalize_slot(slot);
                if is_current {
                    self.current_task = None;
                    match (output, &slot.message_id) {
                        (TurnOutput::Guided(reply), _) => self.apply_guided_reply(slot, reply),
                        (TurnOutput::Text(_), Some(message_id)) => {
                            self.notify(ConductorMessage::StreamEnd {
                                conversation_id: slot.conversation_id.clone(),
                                message_id: message_id.clone(),
                            });
                        }
                        (TurnOutput::Text(_), None) => {}
                    }
                    self.set_status(ChatStatus::Idle);
                }
                self.persist();
            }

            TaskEvent::Failed(error) => {
                self.finalize_slot(slot);
                if is_current {
                    self.current_task = None;
                    self.store.fail(error.to_string());
                    self.notify(ConductorMessage::StreamError {
                        message_id: slot.message_id.clone(),
                        error: error.to_string(),
                    });
                    self.notify(ConductorMessage::StatusChanged {
                        status: ChatStatus::Error,
                    });
                }
                if error.is_authorization() {
                    self.auth_effects.redirect_to_login();
                }
                self.persist();
            }

            TaskEvent::Cancelled => {
                self.finalize_slot(slot);
                if is_current {
                    self.current_task = None;
                    self.set_status(ChatStatus::Idle);
                }
                self.persist();
            }
        }
    }

    /// Stop a slot's placeholder from accepting output
    fn finalize_slot(&mut self, slot: &StreamSlot) {
        if let Some(message_id) = &slot.message_id {
            self.store
                .finalize_message(&slot.conversation_id, message_id);
        }
    }

    /// Record a guided reply for the current turn
    fn apply_guided_reply(&mut self, slot: &StreamSlot, reply: GuidedReply) {
        let text = reply.reply.clone();
        let (current_step, total_steps) = (reply.current_step, reply.total_steps);
        match self.store.complete_guided_turn(&slot.conversation_id, reply) {
            Some(message_id) => self.notify(ConductorMessage::GuidedReply {
                conversation_id: slot.conversation_id.clone(),
                message_id,
                text,
                current_step,
                total_steps,
            }),
            None => tracing::trace!(
                task_id = %slot.task_id,
                conversation_id = %slot.conversation_id,
                "Guided target is no longer active, dropping reply"
            ),
        }
    }

    /// Set status and notify the surface
    fn set_status(&mut self, status: ChatStatus) {
        self.store.set_status(status);
        self.notify(ConductorMessage::StatusChanged { status });
    }

    /// Save the persisted projection of the store
    fn persist(&self) {
        if let Err(e) = self.persistence.save(&self.store.snapshot()) {
            tracing::warn!(error = %e, "Failed to save chat history");
        }
    }

    /// Send a message to the UI surface
    fn notify(&self, msg: ConductorMessage) {
        if let Some(ref tx) = self.surface {
            if tx.send(msg).is_err() {
                tracing::debug!("UI surface is gone, dropping notification");
            }
        }
    }
}

/// Body of a chat stream task
///
/// Opens the backend stream and feeds every event through a reasoning
/// formatter. Cancellation is checked at every await point.
async fn run_chat_stream<B: ChatBackend + 'static>(
    backend: Arc<B>,
    request: ChatRequest,
    token: CancellationToken,
    reporter: TaskReporter<TurnOutput>,
) -> Result<TurnOutput, TaskError> {
    let mut events = tokio::select! {
        biased;
        () = token.cancelled() => return Err(TaskError::Cancelled),
        events = backend.stream_chat(request, token.clone()) => events?,
    };

    let mut formatter = ReasoningFormatter::new();
    loop {
        let event = tokio::select! {
            biased;
            () = token.cancelled() => return Err(TaskError::Cancelled),
            event = events.recv() => event,
        };

        match event {
            Some(StreamEvent::Started { model }) => {
                tracing::debug!(task_id = %reporter.task_id(), model = %model, "Chat stream started");
            }
            Some(StreamEvent::Answer(text)) => {
                for chunk in formatter.answer(&text) {
                    reporter.report_partial(TurnOutput::Text(chunk));
                }
            }
            Some(StreamEvent::Reasoning(text)) => {
                for chunk in formatter.reasoning(&text) {
                    reporter.report_partial(TurnOutput::Text(chunk));
                }
            }
            Some(StreamEvent::Finished) | None => return Ok(TurnOutput::Text(String::new())),
            Some(StreamEvent::Failed(message)) => return Err(TaskError::Failed(message)),
        }
    }
}

/// Body of a guided learning task
async fn run_guided_turn<B: ChatBackend + 'static>(
    backend: Arc<B>,
    request: GuidedRequest,
    token: CancellationToken,
) -> Result<TurnOutput, TaskError> {
    tokio::select! {
        biased;
        () = token.cancelled() => Err(TaskError::Cancelled),
        reply = backend.guided_chat(request, token.clone()) => reply.map(TurnOutput::Guided),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::{REASONING_BANNER, REASONING_SEPARATOR};
    use pretty_assertions::assert_eq;

    // Mock backend that replays a fixed script
    struct MockBackend {
        script: Vec<StreamEvent>,
        guided: Option<GuidedReply>,
    }

    impl MockBackend {
        fn replying(script: Vec<StreamEvent>) -> Self {
            Self {
                script,
                guided: None,
            }
        }
    }

    #[async_trait::async_trait]
    impl ChatBackend for MockBackend {
        fn name(&self) -> &str {
            "Mock"
        }

        async fn stream_chat(
            &self,
            _request: ChatRequest,
            _cancel: CancellationToken,
        ) -> Result<mpsc::Receiver<StreamEvent>, TaskError> {
            let (tx, rx) = mpsc::channel(16);
            let script = self.script.clone();
            tokio::spawn(async move {
                for event in script {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            });
            Ok(rx)
        }

        async fn guided_chat(
            &self,
            _request: GuidedRequest,
            _cancel: CancellationToken,
        ) -> Result<GuidedReply, TaskError> {
            match &self.guided {
                Some(reply) => Ok(reply.clone()),
                None => Err(TaskError::Failed("no guided reply scripted".to_string())),
            }
        }
    }

    fn guided_conductor(reply: &str) -> Conductor<MockBackend> {
        let backend = MockBackend {
            script: vec![],
            guided: Some(
                serde_json::from_value(serde_json::json!({
                    "reply": reply,
                    "session_id": "g-1",
                    "current_step": 1,
                    "total_steps": 2,
                    "progress_percentage": 50.0,
                }))
                .unwrap(),
            ),
        };
        Conductor::new(backend, &ConductorConfig::default())
    }

    fn conductor(script: Vec<StreamEvent>) -> Conductor<MockBackend> {
        Conductor::new(MockBackend::replying(script), &ConductorConfig::default())
    }

    #[tokio::test]
    async fn test_conductor_creation() {
        let conductor = conductor(vec![]);
        assert_eq!(conductor.status(), ChatStatus::Idle);
        assert!(conductor.active_conversation().is_none());
        assert!(conductor.conversations().is_empty());
        assert_eq!(conductor.backend_name(), "Mock");
    }

    #[tokio::test]
    async fn test_send_streams_into_placeholder() {
        let mut conductor = conductor(vec![
            StreamEvent::Answer("Hello ".to_string()),
            StreamEvent::Answer("world!".to_string()),
            StreamEvent::Finished,
        ]);

        conductor.send_intent("Hi").unwrap();
        assert_eq!(conductor.status(), ChatStatus::Streaming);

        conductor.wait_idle().await;

        let conv = conductor.active_conversation().unwrap();
        assert_eq!(conv.title, "Hi");
        assert_eq!(conv.messages[1].content, "Hello world!");
        assert!(!conv.messages[1].streaming);
        assert_eq!(conductor.status(), ChatStatus::Idle);
        assert!(conductor.current_task().is_none());
    }

    #[tokio::test]
    async fn test_blank_prompt_is_ignored() {
        let mut conductor = conductor(vec![]);
        assert!(conductor.send_intent("   ").is_none());
        assert!(conductor.conversations().is_empty());
        assert_eq!(conductor.status(), ChatStatus::Idle);
    }

    #[tokio::test]
    async fn test_reasoning_is_formatted() {
        let mut conductor = conductor(vec![
            StreamEvent::Reasoning("step1".to_string()),
            StreamEvent::Reasoning("step2".to_string()),
            StreamEvent::Answer("result".to_string()),
            StreamEvent::Finished,
        ]);

        conductor.send_intent("Solve it").unwrap();
        conductor.wait_idle().await;

        let content = &conductor.active_conversation().unwrap().messages[1].content;
        assert_eq!(
            content,
            &format!("{REASONING_BANNER}step1step2{REASONING_SEPARATOR}result")
        );
    }

    #[tokio::test]
    async fn test_stream_failure_sets_error() {
        let mut conductor = conductor(vec![
            StreamEvent::Answer("partial".to_string()),
            StreamEvent::Failed("model overloaded".to_string()),
        ]);

        conductor.send_intent("Hi").unwrap();
        conductor.wait_idle().await;

        assert_eq!(conductor.status(), ChatStatus::Error);
        assert_eq!(conductor.last_error(), Some("model overloaded"));
        let conv = conductor.active_conversation().unwrap();
        assert_eq!(conv.messages[1].content, "partial");
        assert!(!conv.messages[1].streaming);
    }

    #[tokio::test]
    async fn test_stream_end_without_done_completes() {
        let mut conductor = conductor(vec![StreamEvent::Answer("ok".to_string())]);
        conductor.send_intent("Hi").unwrap();
        conductor.wait_idle().await;
        assert_eq!(conductor.status(), ChatStatus::Idle);
        assert_eq!(
            conductor.active_conversation().unwrap().messages[1].content,
            "ok"
        );
    }

    #[tokio::test]
    async fn test_surface_receives_notifications() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut conductor = conductor(vec![
            StreamEvent::Answer("Hi".to_string()),
            StreamEvent::Finished,
        ])
        .with_surface(tx);

        conductor.send_intent("Hello").unwrap();
        conductor.wait_idle().await;

        let mut kinds = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            kinds.push(msg.kind());
        }
        assert_eq!(
            kinds,
            vec![
                "conversations_changed",
                "status_changed",
                "token",
                "stream_end",
                "status_changed"
            ]
        );
    }

    #[tokio::test]
    async fn test_intents_persist_snapshots() {
        let persistence = Arc::new(MemoryPersistence::new());
        let mut conductor = conductor(vec![StreamEvent::Finished])
            .with_persistence(persistence.clone());

        conductor.new_conversation_intent();
        conductor.set_retrieval_intent(true);
        assert_eq!(persistence.save_count(), 2);

        let snapshot = persistence.snapshot().unwrap();
        assert!(snapshot.retrieval_augmented);
        assert_eq!(snapshot.conversations.len(), 1);
    }

    #[tokio::test]
    async fn test_guided_turn_appends_reply() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut conductor = guided_conductor("Let's begin with limits.").with_surface(tx);

        conductor
            .guided_send_intent("Teach me calculus", Some("Calculus".to_string()))
            .unwrap();
        assert_eq!(conductor.status(), ChatStatus::Streaming);
        conductor.wait_idle().await;

        let conv = conductor.active_conversation().unwrap();
        assert_eq!(conv.title, "Calculus");
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[1].content, "Let's begin with limits.");
        assert_eq!(conductor.status(), ChatStatus::Idle);
        assert_eq!(conductor.guided_session().unwrap().total_steps, 2);

        let mut kinds = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            kinds.push(msg.kind());
        }
        assert_eq!(
            kinds,
            vec![
                "conversations_changed",
                "status_changed",
                "guided_reply",
                "status_changed"
            ]
        );
    }

    #[tokio::test]
    async fn test_clear_guided_session() {
        let mut conductor = guided_conductor("ok");
        assert!(conductor.guided_send_intent("  ", None).is_none());

        conductor.guided_send_intent("Teach me", None).unwrap();
        conductor.wait_idle().await;
        assert!(conductor.guided_session().is_some());

        conductor.clear_guided_session_intent();
        assert!(conductor.guided_session().is_none());
        assert_eq!(conductor.active_conversation().unwrap().messages.len(), 2);
    }

    #[tokio::test]
    async fn test_guided_turn_without_backend_support_fails() {
        struct StreamOnly;

        #[async_trait::async_trait]
        impl ChatBackend for StreamOnly {
            fn name(&self) -> &str {
                "StreamOnly"
            }

            async fn stream_chat(
                &self,
                _request: ChatRequest,
                _cancel: CancellationToken,
            ) -> Result<mpsc::Receiver<StreamEvent>, TaskError> {
                Err(TaskError::Failed("unused".to_string()))
            }
        }

        let mut conductor = Conductor::new(StreamOnly, &ConductorConfig::default());
        conductor.guided_send_intent("Teach me", None).unwrap();
        conductor.wait_idle().await;

        assert_eq!(conductor.status(), ChatStatus::Error);
        assert_eq!(
            conductor.last_error(),
            Some("StreamOnly does not support guided learning")
        );
        assert!(conductor.guided_session().is_none());
    }
}
