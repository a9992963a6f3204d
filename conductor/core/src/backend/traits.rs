//! Chat Backend Traits
//!
//! Trait definitions for the remote chat service. This abstraction lets the
//! Conductor drive any streaming chat provider (the SSE service, a scripted
//! test double, ...) without changing core logic.
//!
//! # Design Philosophy
//!
//! The `ChatBackend` trait has one streaming call. The backend opens the
//! stream and hands back a channel of [`StreamEvent`]s; it watches the
//! cancellation token itself and stops producing as soon as it fires.
//! Interpreting the events (reasoning formatting, folding into the store) is
//! the Conductor's job.
//!
//! Guided learning turns are request/response: [`ChatBackend::guided_chat`]
//! returns the whole [`GuidedReply`]. Backends without a guided endpoint keep
//! the default, which fails the turn.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::conversation::{ChatMessage, MessageRole};
use crate::guided::{GuidedSession, LearningStep};
use crate::scheduler::CancellationToken;
use crate::tasks::TaskError;

/// Stream events from chat backends
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// The service accepted the request and picked a model
    Started {
        /// Model identifier reported by the service
        model: String,
    },
    /// A piece of answer text
    Answer(String),
    /// A piece of reasoning text
    Reasoning(String),
    /// The response completed successfully
    Finished,
    /// The service reported an error mid-stream
    Failed(String),
}

impl StreamEvent {
    /// Whether no further events follow this one
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed(_))
    }
}

/// A message as sent over the wire
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WireMessage {
    /// Sender role
    pub role: MessageRole,
    /// Message text
    pub content: String,
}

impl From<&ChatMessage> for WireMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role,
            content: msg.content.clone(),
        }
    }
}

/// A streaming chat request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatRequest {
    /// Conversation history, oldest first
    pub messages: Vec<WireMessage>,
    /// Effective chat mode (e.g. `tutor` or `tutor_rag`)
    pub mode: String,
}

impl ChatRequest {
    /// Create a request from conversation messages and a mode
    pub fn new<'a>(
        messages: impl IntoIterator<Item = &'a ChatMessage>,
        mode: impl Into<String>,
    ) -> Self {
        Self {
            messages: messages.into_iter().map(WireMessage::from).collect(),
            mode: mode.into(),
        }
    }
}

/// A guided learning request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuidedRequest {
    /// Session to continue; `None` starts a new one
    pub session_id: Option<String>,
    /// Topic the learner asked to study
    pub topic: Option<String>,
    /// Conversation history, oldest first
    pub messages: Vec<WireMessage>,
}

impl GuidedRequest {
    /// Create a request from conversation messages
    pub fn new<'a>(messages: impl IntoIterator<Item = &'a ChatMessage>) -> Self {
        Self {
            session_id: None,
            topic: None,
            messages: messages.into_iter().map(WireMessage::from).collect(),
        }
    }

    /// Continue an existing session
    #[must_use]
    pub fn with_session_id(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    /// Set the study topic
    #[must_use]
    pub fn with_topic(mut self, topic: Option<String>) -> Self {
        self.topic = topic;
        self
    }
}

/// Reply to a guided learning request
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct GuidedReply {
    /// Tutor's answer
    pub reply: String,
    /// Server-side session id
    pub session_id: String,
    /// Step the learner is on
    #[serde(default)]
    pub current_step: u32,
    /// Steps in the learning path
    #[serde(default)]
    pub total_steps: u32,
    /// Completion, 0 to 100
    #[serde(default)]
    pub progress_percentage: f64,
    /// Topics the learner struggled with
    #[serde(default)]
    pub weak_points: Vec<String>,
    /// The planned path
    #[serde(default)]
    pub learning_path: Vec<LearningStep>,
    /// Model that answered
    #[serde(default)]
    pub model: Option<String>,
}

impl GuidedReply {
    /// Split into the reply text and the session progress
    #[must_use]
    pub fn into_parts(self) -> (String, GuidedSession) {
        let session = GuidedSession {
            session_id: self.session_id,
            current_step: self.current_step,
            total_steps: self.total_steps,
            progress_percentage: self.progress_percentage,
            weak_points: self.weak_points,
            learning_path: self.learning_path,
        };
        (self.reply, session)
    }
}

/// Chat backend trait
///
/// Implement this trait to add support for a different chat provider.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Get the backend name
    fn name(&self) -> &str;

    /// Open a streaming chat response
    ///
    /// Errors that happen before the stream opens (transport failures, HTTP
    /// status errors) are returned directly; an expired session must be
    /// reported as [`TaskError::Authorization`]. Once open, the receiver yields
    /// events until a terminal one, or closes early when `cancel` fires.
    async fn stream_chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamEvent>, TaskError>;

    /// Run one guided learning turn
    ///
    /// Error reporting follows [`stream_chat`](Self::stream_chat).
    async fn guided_chat(
        &self,
        _request: GuidedRequest,
        _cancel: CancellationToken,
    ) -> Result<GuidedReply, TaskError> {
        Err(TaskError::Failed(format!(
            "{} does not support guided learning",
            self.name()
        )))
    }
}
