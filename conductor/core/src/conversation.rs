//! Conversations
//!
//! A conversation is an ordered, append-only message log. Only the most
//! recently appended assistant message may still change, and only while the
//! stream that owns it is active (`streaming == true`).

use serde::{Deserialize, Serialize};

/// Title used until the first user message provides one
pub const DEFAULT_TITLE: &str = "New conversation";

/// Maximum number of characters taken from the first user message
pub const TITLE_MAX_CHARS: usize = 30;

/// Appended to a title when the first user message was truncated
pub const TITLE_ELLIPSIS: &str = "...";

/// Conversation identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// Generate a new unique conversation ID
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Create a conversation ID from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a new unique message ID
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("msg_{}", uuid::Uuid::new_v4().simple()))
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::generate()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who sent a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User input
    User,
    /// AI assistant
    Assistant,
}

impl MessageRole {
    /// Wire name of the role
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A message in a conversation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique message ID
    #[serde(default)]
    pub id: MessageId,
    /// Who sent this message
    pub role: MessageRole,
    /// Message content
    pub content: String,
    /// Whether a stream is still writing into this message
    #[serde(skip)]
    pub streaming: bool,
}

impl ChatMessage {
    /// Create a finished message
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            role,
            content: content.into(),
            streaming: false,
        }
    }

    /// Create an empty assistant message that a stream will fill
    #[must_use]
    pub fn placeholder() -> Self {
        Self {
            id: MessageId::generate(),
            role: MessageRole::Assistant,
            content: String::new(),
            streaming: true,
        }
    }
}

/// A conversation with its message log
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Immutable identifier
    pub id: ConversationId,
    /// Display title
    pub title: String,
    /// Ordered message log
    pub messages: Vec<ChatMessage>,
    /// Creation time (Unix timestamp ms)
    pub created_at: u64,
    /// Last mutation time (Unix timestamp ms), never decreases
    pub updated_at: u64,
}

impl Conversation {
    /// Create an empty conversation with the default title
    #[must_use]
    pub fn new(id: ConversationId) -> Self {
        let now = now_ms();
        Self {
            id,
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Last message in the log
    #[must_use]
    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Whether the log is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append a user message
    pub fn push_user(&mut self, content: impl Into<String>) -> MessageId {
        let msg = ChatMessage::new(MessageRole::User, content);
        let id = msg.id.clone();
        self.messages.push(msg);
        self.touch();
        id
    }

    /// Append a complete assistant message
    pub fn push_assistant(&mut self, content: impl Into<String>) -> MessageId {
        let msg = ChatMessage::new(MessageRole::Assistant, content);
        let id = msg.id.clone();
        self.messages.push(msg);
        self.touch();
        id
    }

    /// Append an empty streaming assistant message
    pub fn push_placeholder(&mut self) -> MessageId {
        let msg = ChatMessage::placeholder();
        let id = msg.id.clone();
        self.messages.push(msg);
        self.touch();
        id
    }

    /// Append text to the streaming tail message
    ///
    /// Only succeeds if the last message is the streaming assistant message
    /// with the given id. Returns whether the text was appended.
    pub fn append_to_tail(&mut self, message_id: &MessageId, text: &str) -> bool {
        let Some(last) = self.messages.last_mut() else {
            return false;
        };
        if last.id != *message_id || last.role != MessageRole::Assistant || !last.streaming {
            return false;
        }
        last.content.push_str(text);
        self.touch();
        true
    }

    /// Stop a message from accepting further stream output
    ///
    /// Returns whether a streaming message with this id was found.
    pub fn finalize(&mut self, message_id: &MessageId) -> bool {
        match self
            .messages
            .iter_mut()
            .rev()
            .find(|m| m.id == *message_id && m.streaming)
        {
            Some(msg) => {
                msg.streaming = false;
                true
            }
            None => false,
        }
    }

    /// Finalize every streaming message (used when restoring)
    pub fn finalize_all(&mut self) {
        for msg in &mut self.messages {
            msg.streaming = false;
        }
    }

    /// Bump `updated_at`
    pub fn touch(&mut self) {
        self.updated_at = self.updated_at.max(now_ms());
    }
}

/// Derive a conversation title from its messages
///
/// Uses the first user message, cut to [`TITLE_MAX_CHARS`] characters with
/// [`TITLE_ELLIPSIS`] appended only if it was cut. Falls back to
/// [`DEFAULT_TITLE`] when there is no user message.
#[must_use]
pub fn title_from(messages: &[ChatMessage]) -> String {
    let Some(first) = messages.iter().find(|m| m.role == MessageRole::User) else {
        return DEFAULT_TITLE.to_string();
    };

    let mut chars = first.content.chars();
    let mut title: String = chars.by_ref().take(TITLE_MAX_CHARS).collect();
    if chars.next().is_some() {
        title.push_str(TITLE_ELLIPSIS);
    }
    title
}

/// Current timestamp in milliseconds
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
