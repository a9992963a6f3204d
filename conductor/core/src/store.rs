//! Conversation Store
//!
//! Single source of truth for conversations and session state. All mutations
//! go through the named transitions below, so every change is a single
//! synchronous step with its invariants checked in one place:
//!
//! - conversations are ordered newest first
//! - at most one conversation is active, and the active id is always present
//!   in the list (or `None`)
//! - messages are only ever appended; the streaming tail is the one message
//!   that may still grow
//!
//! Stale requests (unknown ids, folds aimed at a conversation the user has
//! left) are no-ops that return `false` instead of errors.
//!
//! Guided learning progress sits next to the session flags but is not part of
//! the persisted snapshot.

use serde::{Deserialize, Serialize};

use crate::backend::GuidedReply;
use crate::conversation::{
    title_from, ChatMessage, Conversation, ConversationId, MessageId, MessageRole,
};
use crate::guided::{GuidedSession, GUIDED_DEFAULT_TITLE};
use crate::persistence::PersistedChat;

/// Default chat mode
pub const DEFAULT_MODE: &str = "tutor";

/// Suffix appended to the mode when retrieval augmentation is on
pub const RAG_SUFFIX: &str = "_rag";

/// Chat status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatStatus {
    /// Nothing in flight
    #[default]
    Idle,
    /// A response is streaming into the active conversation
    Streaming,
    /// The last turn failed; see `last_error`
    Error,
}

impl ChatStatus {
    /// Human-readable label
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Streaming => "streaming",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ChatStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Session-level state
#[derive(Clone, Debug, PartialEq)]
pub struct SessionState {
    /// Conversation receiving new turns
    pub active_conversation_id: Option<ConversationId>,
    /// Current chat status
    pub status: ChatStatus,
    /// Message of the last failure, cleared by the next send or switch
    pub last_error: Option<String>,
    /// Base chat mode
    pub mode: String,
    /// Whether retrieval augmentation is on
    pub retrieval_augmented: bool,
    /// Progress of the guided learning session, if one is running
    pub guided_session: Option<GuidedSession>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            active_conversation_id: None,
            status: ChatStatus::Idle,
            last_error: None,
            mode: DEFAULT_MODE.to_string(),
            retrieval_augmented: false,
            guided_session: None,
        }
    }
}

/// Result of [`ConversationStore::begin_turn`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Turn {
    /// Conversation the turn was appended to
    pub conversation_id: ConversationId,
    /// The user message
    pub user_message_id: MessageId,
    /// The streaming assistant placeholder
    pub assistant_message_id: MessageId,
    /// Whether a conversation had to be created for this turn
    pub created_conversation: bool,
}

/// Result of [`ConversationStore::begin_guided_turn`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuidedTurn {
    /// Conversation the turn was appended to
    pub conversation_id: ConversationId,
    /// The user message
    pub user_message_id: MessageId,
    /// Whether a conversation had to be created for this turn
    pub created_conversation: bool,
}

/// Conversations plus session state
#[derive(Clone, Debug, Default)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
    session: SessionState,
}

impl ConversationStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with a base mode and retrieval flag
    pub fn with_mode(mode: impl Into<String>, retrieval_augmented: bool) -> Self {
        Self {
            conversations: Vec::new(),
            session: SessionState {
                mode: mode.into(),
                retrieval_augmented,
                ..SessionState::default()
            },
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// All conversations, newest first
    #[must_use]
    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    /// Session state
    #[must_use]
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Current chat status
    #[must_use]
    pub fn status(&self) -> ChatStatus {
        self.session.status
    }

    /// Message of the last failure
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.session.last_error.as_deref()
    }

    /// Progress of the guided learning session
    #[must_use]
    pub fn guided_session(&self) -> Option<&GuidedSession> {
        self.session.guided_session.as_ref()
    }

    /// Look up a conversation
    #[must_use]
    pub fn conversation(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == *id)
    }

    /// The active conversation, if any
    #[must_use]
    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.session
            .active_conversation_id
            .as_ref()
            .and_then(|id| self.conversation(id))
    }

    /// Mode sent to the backend: the base mode (or [`DEFAULT_MODE`] when
    /// blank), with [`RAG_SUFFIX`] when retrieval augmentation is on
    #[must_use]
    pub fn effective_mode(&self) -> String {
        let base = match self.session.mode.trim() {
            "" => DEFAULT_MODE,
            mode => mode,
        };
        if self.session.retrieval_augmented {
            format!("{base}{RAG_SUFFIX}")
        } else {
            base.to_string()
        }
    }

    /// Messages to send for a conversation, skipping blank ones
    ///
    /// The streaming placeholder is empty at send time and so is never sent.
    #[must_use]
    pub fn request_messages(&self, id: &ConversationId) -> Vec<ChatMessage> {
        self.conversation(id)
            .map(|conv| {
                conv.messages
                    .iter()
                    .filter(|m| !m.content.trim().is_empty())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Start a turn in the active conversation
    ///
    /// Creates and activates a conversation first if none is active. Appends
    /// the user message and an empty streaming assistant placeholder, sets the
    /// title on the first turn, clears the last error and enters `streaming`.
    pub fn begin_turn(&mut self, prompt: impl Into<String>) -> Turn {
        let active = self.active_conversation().map(|conv| conv.id.clone());
        let (conversation_id, created_conversation) = match active {
            Some(id) => (id, false),
            None => (self.create_conversation(), true),
        };

        let conv = self.conversation_mut_or_insert(&conversation_id);
        let first_turn = conv.is_empty();
        let user_message_id = conv.push_user(prompt);
        let assistant_message_id = conv.push_placeholder();
        if first_turn {
            conv.title = title_from(&conv.messages);
        }

        self.session.status = ChatStatus::Streaming;
        self.session.last_error = None;

        Turn {
            conversation_id,
            user_message_id,
            assistant_message_id,
            created_conversation,
        }
    }

    /// Re-ask the last user message of the active conversation
    ///
    /// Appends a fresh streaming placeholder without a new user message.
    /// Returns `None` when there is no active conversation or it holds no
    /// user message yet.
    pub fn begin_retry(&mut self) -> Option<Turn> {
        let conversation_id = self.session.active_conversation_id.clone()?;
        let conv = self
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)?;
        let user_message_id = conv
            .messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.id.clone())?;
        let assistant_message_id = conv.push_placeholder();

        self.session.status = ChatStatus::Streaming;
        self.session.last_error = None;

        Some(Turn {
            conversation_id,
            user_message_id,
            assistant_message_id,
            created_conversation: false,
        })
    }

    /// Start a guided learning turn in the active conversation
    ///
    /// Creates and activates a conversation titled after the topic (or
    /// [`GUIDED_DEFAULT_TITLE`]) if none is active. Appends the user message
    /// only; the reply arrives whole and is added by
    /// [`complete_guided_turn`](Self::complete_guided_turn).
    pub fn begin_guided_turn(
        &mut self,
        prompt: impl Into<String>,
        topic: Option<&str>,
    ) -> GuidedTurn {
        let active = self.active_conversation().map(|conv| conv.id.clone());
        let (conversation_id, created_conversation) = match active {
            Some(id) => (id, false),
            None => (self.create_conversation(), true),
        };

        let conv = self.conversation_mut_or_insert(&conversation_id);
        if created_conversation {
            conv.title = topic
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .unwrap_or(GUIDED_DEFAULT_TITLE)
                .to_string();
        }
        let user_message_id = conv.push_user(prompt);

        self.session.status = ChatStatus::Streaming;
        self.session.last_error = None;

        GuidedTurn {
            conversation_id,
            user_message_id,
            created_conversation,
        }
    }

    /// Record the reply to a guided turn
    ///
    /// The session progress is always taken over. The reply text is only
    /// appended while the target conversation is still active; returns the
    /// id of the appended message.
    pub fn complete_guided_turn(
        &mut self,
        conversation_id: &ConversationId,
        reply: GuidedReply,
    ) -> Option<MessageId> {
        let (text, session) = reply.into_parts();
        self.session.guided_session = Some(session);

        if self.session.active_conversation_id.as_ref() != Some(conversation_id) {
            return None;
        }
        self.conversations
            .iter_mut()
            .find(|c| c.id == *conversation_id)
            .map(|conv| conv.push_assistant(text))
    }

    /// Forget the guided learning session
    ///
    /// The next guided turn starts a new server-side session.
    pub fn clear_guided_session(&mut self) -> bool {
        self.session.guided_session.take().is_some()
    }

    /// Fold a chunk of stream output into the target placeholder
    ///
    /// No-op unless the target conversation is still the active one and its
    /// last message is the streaming placeholder with this id.
    pub fn fold_partial(
        &mut self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        text: &str,
    ) -> bool {
        if self.session.active_conversation_id.as_ref() != Some(conversation_id) {
            return false;
        }
        self.conversations
            .iter_mut()
            .find(|c| c.id == *conversation_id)
            .is_some_and(|conv| conv.append_to_tail(message_id, text))
    }

    /// Stop a placeholder from accepting more output
    pub fn finalize_message(
        &mut self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> bool {
        self.conversations
            .iter_mut()
            .find(|c| c.id == *conversation_id)
            .is_some_and(|conv| conv.finalize(message_id))
    }

    /// Set the chat status
    pub fn set_status(&mut self, status: ChatStatus) {
        self.session.status = status;
    }

    /// Record a failed turn
    pub fn fail(&mut self, message: impl Into<String>) {
        self.session.status = ChatStatus::Error;
        self.session.last_error = Some(message.into());
    }

    /// Create an empty conversation at the front and activate it
    pub fn create_conversation(&mut self) -> ConversationId {
        let conv = Conversation::new(ConversationId::generate());
        let id = conv.id.clone();
        self.conversations.insert(0, conv);
        self.session.active_conversation_id = Some(id.clone());
        self.session.status = ChatStatus::Idle;
        self.session.last_error = None;
        id
    }

    /// Make an existing conversation active
    ///
    /// Resets status to idle and clears the last error. Unknown ids leave the
    /// active conversation unchanged and return `false`.
    pub fn select_conversation(&mut self, id: &ConversationId) -> bool {
        self.session.status = ChatStatus::Idle;
        self.session.last_error = None;
        if self.conversation(id).is_none() {
            return false;
        }
        self.session.active_conversation_id = Some(id.clone());
        true
    }

    /// Remove a conversation
    ///
    /// When the active conversation is removed, the first remaining one (or
    /// none) becomes active.
    pub fn delete_conversation(&mut self, id: &ConversationId) -> bool {
        let before = self.conversations.len();
        self.conversations.retain(|c| c.id != *id);
        if self.conversations.len() == before {
            return false;
        }
        if self.session.active_conversation_id.as_ref() == Some(id) {
            self.session.active_conversation_id = self.conversations.first().map(|c| c.id.clone());
        }
        true
    }

    /// Drop every conversation
    pub fn clear_history(&mut self) {
        self.conversations.clear();
        self.session.active_conversation_id = None;
        self.session.status = ChatStatus::Idle;
        self.session.last_error = None;
    }

    /// Set the base mode
    pub fn set_mode(&mut self, mode: impl Into<String>) {
        self.session.mode = mode.into();
    }

    /// Toggle retrieval augmentation
    pub fn set_retrieval_augmented(&mut self, enabled: bool) {
        self.session.retrieval_augmented = enabled;
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Project the persisted subset of the store
    #[must_use]
    pub fn snapshot(&self) -> PersistedChat {
        PersistedChat {
            conversations: self.conversations.clone(),
            active_conversation_id: self.session.active_conversation_id.clone(),
            mode: self.session.mode.clone(),
            retrieval_augmented: self.session.retrieval_augmented,
        }
    }

    /// Replace the store contents with a persisted snapshot
    ///
    /// Nothing streams after a restore: every message is finalized and the
    /// status is idle. A dangling active id is dropped.
    pub fn restore(&mut self, snapshot: PersistedChat) {
        let mut conversations = snapshot.conversations;
        for conv in &mut conversations {
            conv.finalize_all();
        }
        let active = snapshot
            .active_conversation_id
            .filter(|id| conversations.iter().any(|c| c.id == *id));

        self.conversations = conversations;
        self.session = SessionState {
            active_conversation_id: active,
            status: ChatStatus::Idle,
            last_error: None,
            mode: snapshot.mode,
            retrieval_augmented: snapshot.retrieval_augmented,
            guided_session: None,
        };
    }

    fn conversation_mut_or_insert(&mut self, id: &ConversationId) -> &mut Conversation {
        let index = match self.conversations.iter().position(|c| c.id == *id) {
            Some(index) => index,
            None => {
                self.conversations.insert(0, Conversation::new(id.clone()));
                0
            }
        };
        &mut self.conversations[index]
    }
}
