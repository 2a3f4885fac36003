//! Display-locale detection and the pre-authored string tables.
//!
//! The detector only chooses which strings the surface shows (retry/error/
//! suggestion text); it never changes what is sent to the backend.

use crate::types::{Message, Role};

/// Supported display locales.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locale {
    English,
    Italian,
}

/// Marker words that flip the display locale to Italian. Matched as plain
/// substrings after case-folding, not on word boundaries — good enough for
/// picking UI strings.
const ITALIAN_MARKERS: &[&str] = &[
    "cosa",
    "come",
    "quando",
    "dove",
    "perché",
    "chi",
    "sei",
    "hai",
    "puoi",
    "raccontami",
    "dimmi",
];

/// Heuristic locale classifier. Deterministic and total: any input maps to
/// exactly one of the two locales.
pub fn detect(text: &str) -> Locale {
    let lower = text.to_lowercase();
    if ITALIAN_MARKERS.iter().any(|word| lower.contains(word)) {
        Locale::Italian
    } else {
        Locale::English
    }
}

/// Locale for conversation-level prompts: Italian as soon as any user
/// message reads as Italian, otherwise English.
pub fn conversation_locale(messages: &[Message]) -> Locale {
    if messages
        .iter()
        .any(|m| m.role == Role::User && detect(&m.content) == Locale::Italian)
    {
        Locale::Italian
    } else {
        Locale::English
    }
}

// ============================================================================
// String tables
// ============================================================================

pub fn greeting() -> &'static str {
    "Hi! I'm Daniele's AI twin. Ask me about my work in AI, Data Science, \
     athletic career, or anything else! (Puoi scrivermi anche in italiano!)"
}

pub fn suggestions_title(locale: Locale) -> &'static str {
    match locale {
        Locale::English => "💡 Suggested questions:",
        Locale::Italian => "💡 Domande suggerite:",
    }
}

pub fn suggested_questions(locale: Locale) -> &'static [&'static str] {
    match locale {
        Locale::English => &[
            "What's your experience in AI and Data Science?",
            "Tell me about your athletic career as a national athlete",
            "What projects have you built with Machine Learning?",
        ],
        Locale::Italian => &[
            "Qual è la tua esperienza in AI e Data Science?",
            "Raccontami della tua carriera da atleta nazionale",
            "Quali progetti hai sviluppato con Machine Learning?",
        ],
    }
}

/// Transient-failure notice shown before a backoff wait.
pub fn retry_notice(locale: Locale, wait_secs: u64) -> String {
    match locale {
        Locale::English => format!("⚠️ Retrying in {wait_secs}s..."),
        Locale::Italian => format!("⚠️ Riprovo tra {wait_secs}s..."),
    }
}

/// Terminal failure notice after the retry budget is exhausted.
pub fn failure_notice(locale: Locale, error: &str) -> String {
    match locale {
        Locale::English => format!("❌ Error: {error}. Try again."),
        Locale::Italian => format!("❌ Errore: {error}. Riprova."),
    }
}

/// Warning when the local governor spaces out back-to-back sends.
pub fn throttle_notice(locale: Locale, wait_secs: u64) -> String {
    match locale {
        Locale::English => format!("⚠️ Please wait {wait_secs}s before sending again."),
        Locale::Italian => format!("⚠️ Attendi {wait_secs}s prima di inviare di nuovo."),
    }
}

/// Warning for a local or remote rate limit. `detail` is the server's
/// message when one was provided.
pub fn rate_limit_notice(locale: Locale, detail: Option<&str>) -> String {
    match locale {
        Locale::English => format!(
            "⚠️ Too many requests. {}",
            detail.unwrap_or("Please wait a moment.")
        ),
        Locale::Italian => format!(
            "⚠️ Troppi tentativi. {}",
            detail.unwrap_or("Attendi un momento.")
        ),
    }
}

/// Confirmation prompt shown before wiping the conversation.
pub fn clear_confirm(locale: Locale) -> &'static str {
    match locale {
        Locale::English => "Clear conversation?",
        Locale::Italian => "Cancellare la conversazione?",
    }
}
