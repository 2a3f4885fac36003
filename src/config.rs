use std::time::Duration;

/// Default chat endpoint. Override with `TWIN_CHAT_API_URL`.
pub const DEFAULT_ENDPOINT: &str = "https://ai-twin-backend.vercel.app/api/chat";

/// Retry budget per logical send (attempts = retries + 1).
pub const MAX_RETRIES: u32 = 3;

/// Tuning knobs for one chat session.
///
/// The rate limits here are advisory and local; the backend enforces the
/// authoritative quota and answers 429 when it is exceeded.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// URL the transcript is POSTed to.
    pub endpoint: String,
    /// Transient-failure retries before a send group settles as failed.
    pub max_retries: u32,
    /// Minimum spacing between two accepted sends.
    pub min_send_interval: Duration,
    /// Accepted sends allowed per rolling window.
    pub window_limit: u32,
    /// Rolling window for the send cap.
    pub window: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_retries: MAX_RETRIES,
            min_send_interval: Duration::from_secs(3),
            window_limit: 10,
            window: Duration::from_secs(60),
        }
    }
}

impl ChatConfig {
    /// Default config with env overrides applied. Call after
    /// `dotenvy::dotenv()` so a local `.env` is honored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("TWIN_CHAT_API_URL") {
            if !url.is_empty() {
                config.endpoint = url;
            }
        }
        config
    }
}
