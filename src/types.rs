use serde::{Deserialize, Serialize};

/// Who authored a transcript entry. The backend only ever sees these two;
/// role alternation is deliberately not enforced (retries can produce
/// consecutive same-role entries).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One transcript entry, wire-compatible with the backend payload and
/// with the persisted history format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Request body for the chat endpoint: full transcript plus the session
/// correlation key.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

/// Error body shape for non-2xx responses. Both fields are optional; the
/// pipeline falls back to a status-derived message when neither is present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    /// Best human-readable description, preferring `error` over `message`.
    pub fn describe(&self, status: u16) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| format!("HTTP {}", status))
    }
}
