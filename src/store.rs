//! Durable local storage for the transcript and the session identifier.
//!
//! Storage is a plain key-value boundary (the browser-localStorage analog):
//! two entries, no expiry. The transcript lives in memory and is mirrored to
//! the store only at the well-defined points the pipeline calls `persist`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::ChatError;
use crate::types::Message;

/// Storage key for the serialized transcript.
pub const HISTORY_KEY: &str = "chatbot_history";
/// Storage key for the session identifier. Both key names match what the
/// deployed widget already persisted, so existing profiles carry over.
pub const SESSION_KEY: &str = "chatbot_sessionId";

/// Minimal durable key-value boundary. No network, no expiry.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>, ChatError>;
    fn set(&self, key: &str, value: &str) -> Result<(), ChatError>;
    fn remove(&self, key: &str) -> Result<(), ChatError>;
}

// Lets a session borrow a store that an outer owner (or a test) keeps
// inspecting.
impl<S: KeyValueStore + Sync> KeyValueStore for &S {
    fn get(&self, key: &str) -> Result<Option<String>, ChatError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ChatError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), ChatError> {
        (**self).remove(key)
    }
}

// ============================================================================
// Store implementations
// ============================================================================

/// One file per key under a per-profile data directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Store rooted at the platform data directory (`…/twin-chat`).
    pub fn default_location() -> Result<Self, ChatError> {
        let base = dirs::data_local_dir()
            .ok_or_else(|| ChatError::Storage("no local data directory".into()))?;
        Ok(Self::new(base.join("twin-chat")))
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, ChatError> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ChatError> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.path_for(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), ChatError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// In-memory store for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, ChatError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ChatError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), ChatError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

// ============================================================================
// Transcript store
// ============================================================================

/// Ordered in-memory transcript mirrored to a [`KeyValueStore`].
pub struct TranscriptStore<S: KeyValueStore> {
    store: S,
    messages: Vec<Message>,
}

impl<S: KeyValueStore> TranscriptStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            messages: Vec::new(),
        }
    }

    /// Load the persisted transcript into memory. Fails soft: missing,
    /// unreadable, or corrupt payloads all start an empty transcript.
    pub fn load(&mut self) -> &[Message] {
        self.messages = match self.store.get(HISTORY_KEY) {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(messages) => messages,
                Err(err) => {
                    tracing::warn!("Discarding corrupt persisted transcript: {err}");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(err) => {
                tracing::warn!("Could not read persisted transcript: {err}");
                Vec::new()
            }
        };
        &self.messages
    }

    /// Append to the in-memory sequence only; callers persist explicitly.
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Roll back the most recent entry.
    pub fn pop(&mut self) -> Option<Message> {
        self.messages.pop()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Serialize the full in-memory sequence, overwriting prior content.
    pub fn persist(&self) -> Result<(), ChatError> {
        let raw = serde_json::to_string(&self.messages)?;
        self.store.set(HISTORY_KEY, &raw)
    }

    /// Empty the in-memory sequence and remove the persisted copy.
    pub fn clear(&mut self) -> Result<(), ChatError> {
        self.messages.clear();
        self.store.remove(HISTORY_KEY)
    }

    /// Return the persisted session id, creating and persisting one if
    /// absent. Never regenerated while a persisted identifier exists.
    pub fn get_or_create_session_id(&self) -> Result<String, ChatError> {
        if let Some(id) = self.store.get(SESSION_KEY)? {
            if !id.is_empty() {
                return Ok(id);
            }
        }
        let id = format!("sess_{}", uuid::Uuid::new_v4().simple());
        self.store.set(SESSION_KEY, &id)?;
        Ok(id)
    }
}
