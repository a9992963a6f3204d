//! Chat Conductor Core - Headless Chat Stream Orchestration
//!
//! This crate holds the orchestration logic of a streaming chat client,
//! independent of any UI framework. A terminal REPL, a web front-end or a
//! test harness can all drive it the same way: turn user actions into
//! intents, then let the Conductor fold the stream output back in.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         UI Surface                            │
//! │            intents (down)     ConductorMessage (up)          │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │
//! ┌──────────────────────────────┼───────────────────────────────┐
//! │                       CONDUCTOR CORE                          │
//! │  ┌───────────────────────────┴────────────────────────────┐  │
//! │  │                       Conductor                         │  │
//! │  │  ┌──────────────┐  ┌───────────┐  ┌─────────────────┐  │  │
//! │  │  │ Conversation │  │ Scheduler │  │   ChatBackend   │  │  │
//! │  │  │    Store     │  │ (conflict │  │  (SSE stream)   │  │  │
//! │  │  │              │  │   keys)   │  │                 │  │  │
//! │  │  └──────────────┘  └───────────┘  └─────────────────┘  │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │           ChatPersistence            AuthEffects              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Conductor`]: turns intents into store transitions and chat streams
//! - [`Scheduler`]: conflict-keyed task scheduler with cooperative cancellation
//! - [`ConversationStore`]: conversations plus session state, single source of truth
//! - [`ReasoningFormatter`]: renders reasoning tokens as a blockquote
//! - [`SseBackend`]: the remote streaming chat endpoint
//!
//! # Quick Start
//!
//! ```ignore
//! use chat_conductor_core::{Conductor, ConductorConfig, SseBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConductorConfig::default();
//!     let backend = SseBackend::from_config(&config)?;
//!     let mut conductor = Conductor::new(backend, &config);
//!
//!     conductor.send_intent("What is a monad?");
//!     conductor.wait_idle().await;
//!
//!     if let Some(conv) = conductor.active_conversation() {
//!         println!("{}", conv.messages[1].content);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: chat backend abstraction and the SSE implementation
//! - [`conductor`]: main Conductor struct
//! - [`config`]: layered configuration (CLI, environment, TOML file)
//! - [`conversation`]: conversations, messages and title generation
//! - [`effects`]: login redirect
//! - [`guided`]: guided learning session progress
//! - [`messages`]: notifications from Conductor to UI surfaces
//! - [`persistence`]: snapshot storage
//! - [`reasoning`]: reasoning/answer interleaving
//! - [`scheduler`]: task scheduling and cancellation
//! - [`store`]: conversation store and session state
//! - [`tasks`]: task descriptors, events and errors
//!
//! # No UI Dependencies
//!
//! This crate has **zero** dependencies on any terminal or UI framework.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod conductor;
pub mod config;
pub mod conversation;
pub mod effects;
pub mod guided;
pub mod messages;
pub mod persistence;
pub mod reasoning;
pub mod scheduler;
pub mod store;
pub mod tasks;

// Re-exports for convenience
pub use backend::{
    ChatBackend, ChatRequest, GuidedReply, GuidedRequest, SseBackend, StreamEvent, WireMessage,
};
pub use conductor::{Conductor, CHAT_STREAM_KEY, CHAT_TASK_CATEGORY};
pub use conversation::{
    title_from, ChatMessage, Conversation, ConversationId, MessageId, MessageRole,
};
pub use effects::{AuthEffects, LogOnlyAuthEffects};
pub use guided::{GuidedSession, LearningStep, GUIDED_DEFAULT_TITLE, GUIDED_TASK_CATEGORY};
pub use messages::ConductorMessage;
pub use persistence::{
    ChatPersistence, JsonFilePersistence, MemoryPersistence, PersistedChat, PersistenceError,
};
pub use reasoning::ReasoningFormatter;
pub use scheduler::{CancellationToken, Scheduler, TaskHandle, TaskReporter, TaskSnapshot};
pub use store::{ChatStatus, ConversationStore, GuidedTurn, SessionState, Turn};
pub use tasks::{CancellationPolicy, TaskDescriptor, TaskError, TaskEvent, TaskId, TaskStatus};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, load_config_with_env,
    ConductorConfig, ConductorToml, ConfigError, ConfigOverrides, ConfigSource,
};
