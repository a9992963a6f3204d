//! Conductor Messages
//!
//! Notifications sent from the Conductor to a UI surface. The surface is a
//! pure renderer: it shows what it is told and turns user input back into
//! intents on the [`Conductor`](crate::conductor::Conductor).
//!
//! # Design Philosophy
//!
//! The store is the source of truth and can always be re-read through the
//! Conductor's accessors. These messages only tell a surface *what changed*,
//! so a terminal client can print tokens as they fold without diffing the
//! whole conversation list.

use serde::{Deserialize, Serialize};

use crate::conversation::{ConversationId, MessageId};
use crate::store::ChatStatus;

/// Messages from Conductor to UI Surface
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConductorMessage {
    /// A chunk was folded into the streaming assistant message
    Token {
        /// Conversation the chunk landed in
        conversation_id: ConversationId,
        /// Message the chunk was appended to
        message_id: MessageId,
        /// The chunk text
        text: String,
    },

    /// The current stream completed
    StreamEnd {
        /// Conversation that was streamed into
        conversation_id: ConversationId,
        /// Message that completed
        message_id: MessageId,
    },

    /// The current turn failed
    StreamError {
        /// Placeholder that errored; guided turns have none
        message_id: Option<MessageId>,
        /// Error description
        error: String,
    },

    /// A guided learning reply was appended
    GuidedReply {
        /// Conversation the reply landed in
        conversation_id: ConversationId,
        /// The appended assistant message
        message_id: MessageId,
        /// Reply text
        text: String,
        /// Step the learner is on
        current_step: u32,
        /// Steps in the learning path
        total_steps: u32,
    },

    /// The chat status changed
    StatusChanged {
        /// New status
        status: ChatStatus,
    },

    /// Conversations were created, deleted, selected or cleared
    ConversationsChanged,
}

impl ConductorMessage {
    /// Short name for logging
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Token { .. } => "token",
            Self::StreamEnd { .. } => "stream_end",
            Self::StreamError { .. } => "stream_error",
            Self::GuidedReply { .. } => "guided_reply",
            Self::StatusChanged { .. } => "status_changed",
            Self::ConversationsChanged => "conversations_changed",
        }
    }
}
