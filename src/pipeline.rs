//! Send pipeline and retry controller.
//!
//! One [`ChatSession`] owns the transcript, governor, session id, and busy
//! flag, so independent sessions (and tests) never share state. A logical
//! send runs entry guard → transcript append → request → stream consumption
//! → settlement as one async call, with bounded exponential-backoff retry on
//! transient failures. The retry budget is a plain loop with an attempt
//! counter, capped at `max_retries`.

use std::time::{Duration, Instant};

use futures_util::StreamExt;

use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::governor::{RateDecision, RateGovernor};
use crate::lang::{self, Locale};
use crate::store::{KeyValueStore, TranscriptStore};
use crate::stream::EventStreamDecoder;
use crate::surface::ChatSurface;
use crate::transport::ChatTransport;
use crate::types::{ChatRequest, ErrorBody, Message, Role};

/// Terminal settlement of one logical send, including the entry-guard
/// rejections that never reach the network.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Assistant reply streamed to completion and persisted.
    Completed { reply: String },
    /// Deliberate content-policy refusal, presented as a normal reply.
    PolicyRejected { notice: String },
    /// Remote rate limit; the pending user turn was rolled back.
    RateLimited,
    /// Retry budget exhausted; the pending user turn was rolled back.
    Failed { error: String },
    /// Local governor rejected the send (never `Allowed`).
    Throttled(RateDecision),
    /// Input was empty after trimming.
    EmptyInput,
    /// A send group is already in flight (single-flight policy).
    Busy,
}

/// Per-attempt classification, shared by the first attempt and retries.
enum AttemptOutcome {
    Streamed(String),
    Policy(String),
    RateLimited(Option<String>),
    Transient(String),
}

pub struct ChatSession<T, S, U>
where
    T: ChatTransport,
    S: KeyValueStore,
    U: ChatSurface,
{
    config: ChatConfig,
    transport: T,
    surface: U,
    transcript: TranscriptStore<S>,
    governor: RateGovernor,
    session_id: String,
    busy: bool,
}

impl<T, S, U> ChatSession<T, S, U>
where
    T: ChatTransport,
    S: KeyValueStore,
    U: ChatSurface,
{
    pub fn new(config: ChatConfig, transport: T, store: S, surface: U) -> Result<Self, ChatError> {
        let transcript = TranscriptStore::new(store);
        let session_id = transcript.get_or_create_session_id()?;
        let governor = RateGovernor::new(&config);
        Ok(Self {
            config,
            transport,
            surface,
            transcript,
            governor,
            session_id,
            busy: false,
        })
    }

    /// Load the persisted transcript, replay it onto the surface, and greet
    /// on a fresh conversation.
    pub fn init(&mut self) {
        let messages = self.transcript.load().to_vec();
        tracing::info!(
            session = %self.session_id,
            restored = messages.len(),
            "Chat session ready",
        );
        for message in &messages {
            self.surface.append_bubble(message.role, &message.content);
        }
        if messages.is_empty() {
            self.render_welcome();
        }
        self.surface.scroll_to_latest();
    }

    /// Wipe the conversation: transcript, persisted copy, rate counters, and
    /// the rendered surface. Greets again like a fresh session.
    pub fn clear(&mut self) -> Result<(), ChatError> {
        self.transcript.clear()?;
        self.governor.reset();
        self.surface.clear();
        self.render_welcome();
        Ok(())
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn transcript(&self) -> &[Message] {
        self.transcript.messages()
    }

    /// Run one logical send to terminal settlement.
    pub async fn send(&mut self, input: &str) -> TurnOutcome {
        let input = input.trim();

        // Entry guard: the only place local throttling is enforced. Nothing
        // past this point is reached without the group owning the UI.
        if self.busy {
            return TurnOutcome::Busy;
        }
        if input.is_empty() {
            return TurnOutcome::EmptyInput;
        }
        let locale = lang::detect(input);
        match self.governor.check_and_record(Instant::now()) {
            RateDecision::Allowed => {}
            decision => {
                let notice = match decision {
                    RateDecision::TooSoon { wait_secs } => lang::throttle_notice(locale, wait_secs),
                    _ => lang::rate_limit_notice(locale, None),
                };
                self.surface.append_bubble(Role::Assistant, &notice);
                self.surface.scroll_to_latest();
                return TurnOutcome::Throttled(decision);
            }
        }

        self.busy = true;
        self.surface.set_input_enabled(false);
        // Appended once for the whole attempt group, popped at most once on
        // terminal rate-limit or exhausted-retry settlement.
        self.transcript.append(Message::user(input));
        self.surface.append_bubble(Role::User, input);
        self.surface.scroll_to_latest();

        let outcome = self.run_attempts(locale).await;

        self.busy = false;
        self.surface.set_input_enabled(true);
        outcome
    }

    async fn run_attempts(&mut self, locale: Locale) -> TurnOutcome {
        let mut attempt: u32 = 0;
        loop {
            match self.attempt_once().await {
                AttemptOutcome::Streamed(reply) => {
                    self.transcript.append(Message::assistant(&reply));
                    self.persist_best_effort();
                    return TurnOutcome::Completed { reply };
                }
                AttemptOutcome::Policy(notice) => {
                    // Not a fault: the server declined on purpose and sent
                    // the text it wants the user to read.
                    self.surface.append_bubble(Role::Assistant, &notice);
                    self.surface.scroll_to_latest();
                    self.transcript.append(Message::assistant(&notice));
                    self.persist_best_effort();
                    return TurnOutcome::PolicyRejected { notice };
                }
                AttemptOutcome::RateLimited(detail) => {
                    let notice = lang::rate_limit_notice(locale, detail.as_deref());
                    self.surface.append_bubble(Role::Assistant, &notice);
                    self.surface.scroll_to_latest();
                    self.transcript.pop();
                    return TurnOutcome::RateLimited;
                }
                AttemptOutcome::Transient(error) => {
                    if attempt < self.config.max_retries {
                        let wait_secs = 1u64 << attempt;
                        tracing::warn!(
                            attempt = attempt + 1,
                            "Chat request failed ({error}); retrying in {wait_secs}s",
                        );
                        let notice_id = self
                            .surface
                            .append_bubble(Role::Assistant, &lang::retry_notice(locale, wait_secs));
                        tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                        self.surface.remove_bubble(notice_id);
                        attempt += 1;
                    } else {
                        tracing::error!(
                            attempts = attempt + 1,
                            "Chat request failed terminally: {error}",
                        );
                        self.surface
                            .append_bubble(Role::Assistant, &lang::failure_notice(locale, &error));
                        self.surface.scroll_to_latest();
                        self.transcript.pop();
                        return TurnOutcome::Failed { error };
                    }
                }
            }
        }
    }

    /// Issue one request and classify its outcome. Renders its own typing
    /// indicator; on 2xx it streams the reply into a fresh assistant bubble.
    async fn attempt_once(&mut self) -> AttemptOutcome {
        let typing = self.surface.show_typing();
        let request = ChatRequest {
            messages: self.transcript.messages().to_vec(),
            session_id: self.session_id.clone(),
        };
        tracing::debug!(messages = request.messages.len(), "Posting chat request");

        let response = match self.transport.post_chat(&request).await {
            Ok(response) => response,
            Err(err) => {
                self.surface.remove_bubble(typing);
                return AttemptOutcome::Transient(err.to_string());
            }
        };

        if !response.is_success() {
            let status = response.status;
            let body: ErrorBody =
                serde_json::from_str(&response.collect_body().await).unwrap_or_default();
            self.surface.remove_bubble(typing);
            return match status {
                // A 403 without an explanatory message is not a recognizable
                // policy rejection; it falls through to the transient path.
                403 if body.message.is_some() => {
                    AttemptOutcome::Policy(body.message.unwrap_or_default())
                }
                429 => AttemptOutcome::RateLimited(body.message),
                _ => AttemptOutcome::Transient(body.describe(status)),
            };
        }

        self.surface.remove_bubble(typing);
        let bubble = self.surface.append_bubble(Role::Assistant, "");
        let mut reply = String::new();
        let mut decoder = EventStreamDecoder::new();
        let mut body = response.body;

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    for delta in decoder.push(&bytes) {
                        if delta.is_empty() {
                            continue;
                        }
                        reply.push_str(&delta);
                        self.surface.update_bubble(bubble, &reply);
                        self.surface.scroll_to_latest();
                    }
                }
                Err(err) => return AttemptOutcome::Transient(err.to_string()),
            }
        }
        for delta in decoder.finish() {
            if delta.is_empty() {
                continue;
            }
            reply.push_str(&delta);
            self.surface.update_bubble(bubble, &reply);
        }

        AttemptOutcome::Streamed(reply)
    }

    fn render_welcome(&mut self) {
        self.surface.append_bubble(Role::Assistant, lang::greeting());
        let locale = self.last_user_locale();
        self.surface
            .show_suggestions(lang::suggestions_title(locale), lang::suggested_questions(locale));
    }

    fn last_user_locale(&self) -> Locale {
        self.transcript
            .messages()
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| lang::detect(&m.content))
            .unwrap_or(Locale::English)
    }

    /// Failing to mirror the transcript should never fail the turn.
    fn persist_best_effort(&self) {
        if let Err(err) = self.transcript.persist() {
            tracing::warn!("Could not persist transcript: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;
    use futures_util::stream;

    use crate::store::{MemoryStore, HISTORY_KEY};
    use crate::surface::BubbleId;
    use crate::transport::{BodyStream, ChatResponse};

    // ── Scripted transport ──────────────────────────────────────────────

    enum Script {
        /// Response with this status and a body streamed in the given chunks.
        Respond(u16, Vec<&'static str>),
        /// Connection-level failure before any response arrives.
        NetworkError,
    }

    #[derive(Clone, Default)]
    struct RequestLog {
        /// Message count of each request payload, in order.
        sizes: Arc<Mutex<Vec<usize>>>,
    }

    struct FakeTransport {
        script: Mutex<VecDeque<Script>>,
        log: RequestLog,
    }

    impl FakeTransport {
        fn new(script: Vec<Script>) -> (Self, RequestLog) {
            let log = RequestLog::default();
            (
                Self {
                    script: Mutex::new(script.into()),
                    log: log.clone(),
                },
                log,
            )
        }
    }

    #[async_trait::async_trait]
    impl ChatTransport for FakeTransport {
        async fn post_chat(&self, request: &ChatRequest) -> Result<ChatResponse, ChatError> {
            self.log.sizes.lock().unwrap().push(request.messages.len());
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .expect("transport called more times than scripted");
            match next {
                Script::NetworkError => Err(ChatError::Network("connection refused".into())),
                Script::Respond(status, chunks) => {
                    let items: Vec<Result<Bytes, ChatError>> = chunks
                        .into_iter()
                        .map(|c| Ok(Bytes::from_static(c.as_bytes())))
                        .collect();
                    let body: BodyStream = Box::pin(stream::iter(items));
                    Ok(ChatResponse { status, body })
                }
            }
        }
    }

    // ── Recording surface ───────────────────────────────────────────────

    #[derive(Debug, Clone, PartialEq)]
    enum SurfaceEvent {
        Append(Role, String),
        Update(BubbleId, String),
        Remove(BubbleId),
        Typing(BubbleId),
        Input(bool),
        Suggestions(String),
        Cleared,
    }

    #[derive(Clone, Default)]
    struct SurfaceLog(Arc<Mutex<Vec<SurfaceEvent>>>);

    impl SurfaceLog {
        fn events(&self) -> Vec<SurfaceEvent> {
            self.0.lock().unwrap().clone()
        }
    }

    #[derive(Default)]
    struct RecordingSurface {
        log: SurfaceLog,
        next_id: BubbleId,
    }

    impl RecordingSurface {
        fn new() -> (Self, SurfaceLog) {
            let surface = Self::default();
            let log = surface.log.clone();
            (surface, log)
        }

        fn push(&self, event: SurfaceEvent) {
            self.log.0.lock().unwrap().push(event);
        }
    }

    impl ChatSurface for RecordingSurface {
        fn append_bubble(&mut self, role: Role, content: &str) -> BubbleId {
            self.next_id += 1;
            self.push(SurfaceEvent::Append(role, content.to_string()));
            self.next_id
        }

        fn update_bubble(&mut self, id: BubbleId, content: &str) {
            self.push(SurfaceEvent::Update(id, content.to_string()));
        }

        fn remove_bubble(&mut self, id: BubbleId) {
            self.push(SurfaceEvent::Remove(id));
        }

        fn show_typing(&mut self) -> BubbleId {
            self.next_id += 1;
            self.push(SurfaceEvent::Typing(self.next_id));
            self.next_id
        }

        fn set_input_enabled(&mut self, enabled: bool) {
            self.push(SurfaceEvent::Input(enabled));
        }

        fn show_suggestions(&mut self, title: &str, _questions: &[&str]) {
            self.push(SurfaceEvent::Suggestions(title.to_string()));
        }

        fn scroll_to_latest(&mut self) {}

        fn clear(&mut self) {
            self.push(SurfaceEvent::Cleared);
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    fn quick_config() -> ChatConfig {
        ChatConfig {
            min_send_interval: Duration::ZERO,
            ..ChatConfig::default()
        }
    }

    fn session_with(
        config: ChatConfig,
        script: Vec<Script>,
    ) -> (
        ChatSession<FakeTransport, MemoryStore, RecordingSurface>,
        RequestLog,
        SurfaceLog,
    ) {
        let (transport, requests) = FakeTransport::new(script);
        let (surface, surface_log) = RecordingSurface::new();
        let session = ChatSession::new(config, transport, MemoryStore::new(), surface).unwrap();
        (session, requests, surface_log)
    }

    // ── Tests ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_success_streams_and_persists() {
        let (mut session, requests, surface) = session_with(
            quick_config(),
            vec![Script::Respond(
                200,
                vec![
                    "data: {\"content\":\"Hel",
                    "lo\"}\ndata: {\"content\":\" world\"}\n",
                    "data: [DONE]\n",
                ],
            )],
        );

        let outcome = session.send("hello there").await;
        assert_eq!(
            outcome,
            TurnOutcome::Completed {
                reply: "Hello world".into()
            }
        );
        assert_eq!(requests.sizes.lock().unwrap().as_slice(), &[1]);
        assert_eq!(
            session.transcript(),
            &[Message::user("hello there"), Message::assistant("Hello world")]
        );

        // The streaming bubble was updated in place, delta by delta.
        let updates: Vec<_> = surface
            .events()
            .into_iter()
            .filter_map(|e| match e {
                SurfaceEvent::Update(_, content) => Some(content),
                _ => None,
            })
            .collect();
        assert_eq!(updates, vec!["Hello", "Hello world"]);
    }

    #[tokio::test]
    async fn test_success_persists_transcript() {
        let (transport, _) = FakeTransport::new(vec![Script::Respond(
            200,
            vec!["data: {\"content\":\"ok\"}\n"],
        )]);
        let store = MemoryStore::new();
        let (surface, _) = RecordingSurface::new();
        let mut session = ChatSession::new(quick_config(), transport, &store, surface).unwrap();

        session.send("ping").await;
        let raw = store.get(HISTORY_KEY).unwrap().unwrap();
        let persisted: Vec<Message> = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted.len(), 2);
    }

    #[tokio::test]
    async fn test_policy_rejection_becomes_assistant_reply() {
        let (mut session, _, _) = session_with(
            quick_config(),
            vec![Script::Respond(
                403,
                vec!["{\"message\":\"I can't talk about that.\"}"],
            )],
        );

        let outcome = session.send("forbidden topic").await;
        assert_eq!(
            outcome,
            TurnOutcome::PolicyRejected {
                notice: "I can't talk about that.".into()
            }
        );
        // The refusal text joins the transcript like a normal reply.
        assert_eq!(session.transcript().len(), 2);
        assert_eq!(session.transcript()[1].content, "I can't talk about that.");
    }

    #[tokio::test]
    async fn test_403_without_message_is_transient() {
        let (mut session, requests, _) = session_with(
            quick_config(),
            vec![
                Script::Respond(403, vec!["{}"]),
                Script::Respond(200, vec!["data: {\"content\":\"ok\"}\n"]),
            ],
        );
        tokio::time::pause();

        let outcome = session.send("hi").await;
        assert_eq!(outcome, TurnOutcome::Completed { reply: "ok".into() });
        assert_eq!(requests.sizes.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_rolls_back_user_message() {
        let (mut session, _, surface) = session_with(
            quick_config(),
            vec![Script::Respond(429, vec!["{\"message\":\"cool down\"}"])],
        );

        let before = session.transcript().len();
        let outcome = session.send("spam").await;
        assert_eq!(outcome, TurnOutcome::RateLimited);
        assert_eq!(session.transcript().len(), before);
        assert!(surface.events().contains(&SurfaceEvent::Append(
            Role::Assistant,
            "⚠️ Too many requests. cool down".into()
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_schedule_and_single_append() {
        let (mut session, requests, _) = session_with(
            quick_config(),
            vec![
                Script::NetworkError,
                Script::NetworkError,
                Script::NetworkError,
                Script::NetworkError,
            ],
        );

        let start = tokio::time::Instant::now();
        let before = session.transcript().len();
        let outcome = session.send("flaky").await;

        assert!(matches!(outcome, TurnOutcome::Failed { .. }));
        // Backoff waits: 1s + 2s + 4s before attempts 2, 3, 4.
        assert_eq!(start.elapsed(), Duration::from_secs(7));
        // Four attempts, each carrying the single appended user message.
        assert_eq!(requests.sizes.lock().unwrap().as_slice(), &[1, 1, 1, 1]);
        // Rolled back on exhaustion.
        assert_eq!(session.transcript().len(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success_recovers() {
        let (mut session, _, surface) = session_with(
            quick_config(),
            vec![
                Script::Respond(502, vec!["{\"error\":\"bad gateway\"}"]),
                Script::Respond(200, vec!["data: {\"content\":\"recovered\"}\n"]),
            ],
        );

        let outcome = session.send("try me").await;
        assert_eq!(
            outcome,
            TurnOutcome::Completed {
                reply: "recovered".into()
            }
        );
        // The retry notice was rendered, then removed before the next attempt.
        let events = surface.events();
        let notice = events
            .iter()
            .find_map(|e| match e {
                SurfaceEvent::Append(Role::Assistant, content)
                    if content.starts_with("⚠️ Retrying") =>
                {
                    Some(content.clone())
                }
                _ => None,
            })
            .expect("retry notice rendered");
        assert_eq!(notice, "⚠️ Retrying in 1s...");
    }

    #[tokio::test]
    async fn test_empty_input_rejected_without_side_effects() {
        let (mut session, requests, _) = session_with(quick_config(), vec![]);
        assert_eq!(session.send("   ").await, TurnOutcome::EmptyInput);
        assert!(requests.sizes.lock().unwrap().is_empty());
        assert!(session.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_single_flight_rejects_while_busy() {
        let (mut session, requests, _) = session_with(quick_config(), vec![]);
        session.busy = true;
        assert_eq!(session.send("second").await, TurnOutcome::Busy);
        assert!(requests.sizes.lock().unwrap().is_empty());
        assert!(session.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_governor_throttles_back_to_back_sends() {
        let config = ChatConfig {
            min_send_interval: Duration::from_secs(3),
            ..ChatConfig::default()
        };
        let (mut session, requests, _) = session_with(
            config,
            vec![Script::Respond(200, vec!["data: {\"content\":\"ok\"}\n"])],
        );

        session.send("first").await;
        let outcome = session.send("second").await;
        assert!(matches!(
            outcome,
            TurnOutcome::Throttled(RateDecision::TooSoon { .. })
        ));
        // Only the first send reached the network or the transcript.
        assert_eq!(requests.sizes.lock().unwrap().len(), 1);
        assert_eq!(session.transcript().len(), 2);
    }

    #[tokio::test]
    async fn test_busy_flag_cleared_once_at_settlement() {
        let (mut session, _, surface) = session_with(
            quick_config(),
            vec![Script::Respond(200, vec!["data: {\"content\":\"ok\"}\n"])],
        );
        session.send("hello").await;
        let toggles: Vec<_> = surface
            .events()
            .into_iter()
            .filter(|e| matches!(e, SurfaceEvent::Input(_)))
            .collect();
        assert_eq!(
            toggles,
            vec![SurfaceEvent::Input(false), SurfaceEvent::Input(true)]
        );
    }

    #[tokio::test]
    async fn test_init_greets_fresh_session() {
        let (mut session, _, surface) = session_with(quick_config(), vec![]);
        session.init();
        let events = surface.events();
        assert!(matches!(&events[0], SurfaceEvent::Append(Role::Assistant, c) if c.starts_with("Hi!")));
        assert!(events
            .iter()
            .any(|e| matches!(e, SurfaceEvent::Suggestions(_))));
    }

    #[tokio::test]
    async fn test_init_replays_persisted_transcript() {
        let store = MemoryStore::new();
        {
            let mut transcript = TranscriptStore::new(&store);
            transcript.append(Message::user("ciao"));
            transcript.append(Message::assistant("ciao!"));
            transcript.persist().unwrap();
        }
        let (transport, _) = FakeTransport::new(vec![]);
        let (surface, log) = RecordingSurface::new();
        let mut session = ChatSession::new(quick_config(), transport, &store, surface).unwrap();
        session.init();

        let appends: Vec<_> = log
            .events()
            .into_iter()
            .filter(|e| matches!(e, SurfaceEvent::Append(..)))
            .collect();
        assert_eq!(appends.len(), 2);
        // No greeting or suggestions when history exists.
        assert!(!log
            .events()
            .iter()
            .any(|e| matches!(e, SurfaceEvent::Suggestions(_))));
    }

    #[tokio::test]
    async fn test_clear_wipes_and_greets_again() {
        let (mut session, _, surface) = session_with(
            quick_config(),
            vec![Script::Respond(200, vec!["data: {\"content\":\"ok\"}\n"])],
        );
        session.send("hello").await;
        session.clear().unwrap();

        assert!(session.transcript().is_empty());
        let events = surface.events();
        let cleared_at = events
            .iter()
            .position(|e| *e == SurfaceEvent::Cleared)
            .unwrap();
        assert!(matches!(
            &events[cleared_at + 1],
            SurfaceEvent::Append(Role::Assistant, c) if c.starts_with("Hi!")
        ));
    }

    #[tokio::test]
    async fn test_session_id_survives_new_session_on_same_store() {
        let store = MemoryStore::new();
        let first = {
            let (transport, _) = FakeTransport::new(vec![]);
            let (surface, _) = RecordingSurface::new();
            let session = ChatSession::new(quick_config(), transport, &store, surface).unwrap();
            session.session_id().to_string()
        };
        let (transport, _) = FakeTransport::new(vec![]);
        let (surface, _) = RecordingSurface::new();
        let session = ChatSession::new(quick_config(), transport, &store, surface).unwrap();
        assert_eq!(session.session_id(), first);
    }
}
