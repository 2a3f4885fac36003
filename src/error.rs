/// Crate-wide error type. Every fallible function returns
/// `Result<T, ChatError>` and propagates with `?`.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// reqwest errors are reduced to their message so fake transports in tests
// can construct the same variant.
impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Network(err.to_string())
    }
}
