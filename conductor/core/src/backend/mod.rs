//! Chat Backend Integration
//!
//! This module provides abstracted access to the remote chat service through
//! a common trait interface.
//!
//! # Available Backends
//!
//! - **SSE**: the AI service's server-sent-events chat endpoint (default)
//!
//! # Usage
//!
//! ```ignore
//! use chat_conductor_core::backend::{ChatBackend, ChatRequest, SseBackend};
//!
//! let backend = SseBackend::from_config(&config)?;
//! let request = ChatRequest::new(&messages, "tutor");
//! let mut rx = backend.stream_chat(request, token).await?;
//! ```

mod sse;
mod traits;

pub use sse::SseBackend;
pub use traits::{
    ChatBackend, ChatRequest, GuidedReply, GuidedRequest, StreamEvent, WireMessage,
};
