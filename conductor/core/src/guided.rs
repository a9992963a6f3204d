//! Guided Learning
//!
//! A guided turn is a non-streaming exchange with the tutoring service: the
//! user's message goes out together with the server-side session id, and the
//! reply comes back whole, along with the learner's progress through a
//! learning path. The progress lives in [`GuidedSession`] on the session
//! state. It is never persisted; a restart starts a fresh guided session.

use serde::{Deserialize, Serialize};

/// Mode sent with guided requests
pub const GUIDED_MODE: &str = "guided";

/// Title of a conversation created by a guided turn without a topic
pub const GUIDED_DEFAULT_TITLE: &str = "Guided learning";

/// Task category of guided turns
pub const GUIDED_TASK_CATEGORY: &str = "chat/guided";

/// One step of a learning path
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningStep {
    /// 1-based position in the path
    pub step: u32,
    /// Step title
    #[serde(default)]
    pub title: String,
    /// What the step covers
    #[serde(default)]
    pub description: String,
    /// Check questions for the step
    #[serde(default)]
    pub questions: Vec<String>,
}

/// Progress of the current guided session
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GuidedSession {
    /// Server-side session id, echoed on the next guided turn
    pub session_id: String,
    /// Step the learner is on
    pub current_step: u32,
    /// Steps in the learning path
    pub total_steps: u32,
    /// Completion, 0 to 100
    pub progress_percentage: f64,
    /// Topics the learner struggled with
    pub weak_points: Vec<String>,
    /// The planned path
    pub learning_path: Vec<LearningStep>,
}

impl GuidedSession {
    /// The step the learner is on, if the path lists it
    #[must_use]
    pub fn current(&self) -> Option<&LearningStep> {
        self.learning_path
            .iter()
            .find(|step| step.step == self.current_step)
    }

    /// Whether every step has been covered
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.total_steps > 0 && self.current_step >= self.total_steps
    }
}
