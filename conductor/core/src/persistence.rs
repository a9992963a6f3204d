//! Chat Persistence
//!
//! Saves and restores the persisted subset of the conversation store:
//! conversations, the active conversation id, the mode and the retrieval
//! flag. Status, errors and streaming flags are never persisted.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conversation::{Conversation, ConversationId};
use crate::store::DEFAULT_MODE;

/// Errors that can occur when loading or saving chat state
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Reading or writing the snapshot file failed
    #[error("Failed to access chat storage at {path}: {source}")]
    Io {
        /// The path that was accessed
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// The snapshot could not be encoded or decoded
    #[error("Failed to encode chat storage: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Persisted projection of the store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedChat {
    /// Conversations, newest first
    #[serde(default)]
    pub conversations: Vec<Conversation>,
    /// Active conversation, if any
    #[serde(default)]
    pub active_conversation_id: Option<ConversationId>,
    /// Base chat mode
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Retrieval augmentation flag
    #[serde(default)]
    pub retrieval_augmented: bool,
}

fn default_mode() -> String {
    DEFAULT_MODE.to_string()
}

/// Storage seam for chat snapshots
pub trait ChatPersistence: Send + Sync {
    /// Load the last saved snapshot; `Ok(None)` if nothing was saved yet
    fn load(&self) -> Result<Option<PersistedChat>, PersistenceError>;

    /// Replace the saved snapshot
    fn save(&self, snapshot: &PersistedChat) -> Result<(), PersistenceError>;
}

/// JSON file storage with atomic replace
#[derive(Clone, Debug)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    /// Store snapshots at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default snapshot location
    ///
    /// Returns `$XDG_DATA_HOME/chat-conductor/chat-storage.json`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|p| p.join("chat-conductor").join("chat-storage.json"))
    }

    /// Snapshot file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl ChatPersistence for JsonFilePersistence {
    fn load(&self) -> Result<Option<PersistedChat>, PersistenceError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save(&self, snapshot: &PersistedChat) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let content = serde_json::to_string_pretty(snapshot)?;
        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).map_err(|e| self.io_error(e))?;
        std::fs::rename(&temp_path, &self.path).map_err(|e| self.io_error(e))?;

        tracing::trace!(path = %self.path.display(), "Saved chat storage");
        Ok(())
    }
}

/// In-memory storage for tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    snapshot: Mutex<Option<PersistedChat>>,
    saves: Mutex<usize>,
}

impl MemoryPersistence {
    /// Create empty storage
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create storage that already holds a snapshot
    #[must_use]
    pub fn with_snapshot(snapshot: PersistedChat) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
            saves: Mutex::new(0),
        }
    }

    /// The last saved snapshot
    #[must_use]
    pub fn snapshot(&self) -> Option<PersistedChat> {
        self.snapshot.lock().clone()
    }

    /// Number of saves so far
    #[must_use]
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

impl ChatPersistence for MemoryPersistence {
    fn load(&self) -> Result<Option<PersistedChat>, PersistenceError> {
        Ok(self.snapshot())
    }

    fn save(&self, snapshot: &PersistedChat) -> Result<(), PersistenceError> {
        *self.snapshot.lock() = Some(snapshot.clone());
        *self.saves.lock() += 1;
        Ok(())
    }
}
