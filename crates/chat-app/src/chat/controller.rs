//! Streaming delivery: request one full completion, then reveal it word by word.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use gigi_llm::{CompletionProvider, CompletionRequest, ProviderError, ProviderMessage};
use snafu::ensure;
use tokio_util::sync::CancellationToken;

use super::error::{ChatResult, EmptyPromptSnafu, StreamRejectedSnafu};
use super::events::{FailureKind, Stop, StreamOutcome, Submit};
use super::history::{reply_text, request_messages};
use super::message::{
    Conversation, ConversationId, MessageId, RawMessage, StreamSessionId, StreamTarget,
    StreamTransition, StreamTransitionRejection,
};
use super::state::ChatState;

pub const DEFAULT_REVEAL_INTERVAL: Duration = Duration::from_millis(40);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_HISTORY_WINDOW: usize = 20;

/// Request and pacing parameters for every send.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryConfig {
    pub model_id: String,
    pub system_prompt: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub reveal_interval: Duration,
    pub request_timeout: Duration,
    pub history_window: usize,
}

impl DeliveryConfig {
    /// Creates a config for `model_id` with the default pacing and timeout.
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            system_prompt: None,
            temperature: None,
            max_tokens: None,
            reveal_interval: DEFAULT_REVEAL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }

    /// Returns the config with the system prompt sent ahead of history.
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Returns the config with a sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Returns the config with a completion token cap.
    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Returns the config with the delay between revealed words.
    pub fn with_reveal_interval(mut self, reveal_interval: Duration) -> Self {
        self.reveal_interval = reveal_interval;
        self
    }

    /// Returns the config with the deadline for a full completion.
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Returns the config with the number of prior messages sent as context.
    pub fn with_history_window(mut self, history_window: usize) -> Self {
        self.history_window = history_window;
        self
    }

    fn completion_request(&self, messages: Vec<ProviderMessage>) -> CompletionRequest {
        let mut request = CompletionRequest::new(self.model_id.clone(), messages);
        if let Some(system_prompt) = &self.system_prompt {
            request = request.with_preamble(system_prompt.clone());
        }
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        request
    }
}

/// Ephemeral reveal progress of one reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSession {
    target: StreamTarget,
    message_id: MessageId,
    full_text: String,
    words: Vec<String>,
    revealed_word_count: usize,
}

impl StreamSession {
    /// Creates a session that reveals `full_text` into `message_id`.
    ///
    /// Splits on single spaces, so the fully revealed text equals `full_text` exactly.
    pub fn new(target: StreamTarget, message_id: MessageId, full_text: String) -> Self {
        let words = full_text.split(' ').map(str::to_string).collect();
        Self {
            target,
            message_id,
            full_text,
            words,
            revealed_word_count: 0,
        }
    }

    pub fn target(&self) -> StreamTarget {
        self.target
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    pub fn revealed_word_count(&self) -> usize {
        self.revealed_word_count
    }

    pub fn is_fully_revealed(&self) -> bool {
        self.revealed_word_count >= self.words.len()
    }

    /// Reveals one more word and returns the new visible text.
    pub fn reveal_next(&mut self) -> String {
        self.revealed_word_count = (self.revealed_word_count + 1).min(self.words.len());
        self.revealed_text()
    }

    pub fn revealed_text(&self) -> String {
        self.words[..self.revealed_word_count].join(" ")
    }
}

struct ActiveStream {
    target: StreamTarget,
    cancel: CancellationToken,
}

enum Interrupted {
    Cancelled,
    Failed { kind: FailureKind, message: String },
}

/// Drives sends for any number of conversations, one in-flight stream per conversation.
pub struct StreamController {
    provider: Arc<dyn CompletionProvider>,
    config: DeliveryConfig,
    active: Mutex<HashMap<ConversationId, ActiveStream>>,
    next_session_id: AtomicU64,
}

impl StreamController {
    /// Creates a controller with no active streams.
    pub fn new(provider: Arc<dyn CompletionProvider>, config: DeliveryConfig) -> Self {
        Self {
            provider,
            config,
            active: Mutex::new(HashMap::new()),
            next_session_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Runs one full send: placeholder, request, paced reveal, terminal state.
    ///
    /// A send on a conversation that is already requesting or revealing is refused with
    /// [`ChatError::StreamRejected`](super::error::ChatError::StreamRejected). Dropping the
    /// returned future finalizes the conversation the same way [`Self::cancel`] would.
    pub async fn send(&self, state: &ChatState, submit: Submit) -> ChatResult<StreamOutcome> {
        let content = submit.content.trim().to_string();
        ensure!(
            !content.is_empty(),
            EmptyPromptSnafu {
                stage: "validate-prompt",
            }
        );

        let conversation_id = submit.conversation_id;
        let session_id =
            StreamSessionId::new(self.next_session_id.fetch_add(1, Ordering::Relaxed));
        let target = StreamTarget::new(conversation_id, session_id);
        let placeholder = RawMessage::streaming_placeholder();
        let message_id = placeholder.id;
        let window = self.config.history_window;

        let messages = state
            .update_conversation(conversation_id, "start-stream", |conversation| {
                conversation.apply_stream_transition(StreamTransition::Start(target))?;
                let messages = request_messages(
                    &conversation.messages,
                    window,
                    &content,
                    submit.attached_file.as_ref(),
                );
                conversation.push_user_message(RawMessage::user(
                    content.clone(),
                    submit.attached_file.clone(),
                ));
                conversation.push_message(placeholder);
                Ok::<_, StreamTransitionRejection>(messages)
            })?
            .or_else(|rejection| {
                tracing::warn!(
                    %conversation_id,
                    session_id = session_id.0,
                    ?rejection,
                    "send rejected"
                );
                StreamRejectedSnafu {
                    stage: "start-stream",
                    rejection,
                }
                .fail()
            })?;

        let cancel = CancellationToken::new();
        self.lock_active().insert(
            conversation_id,
            ActiveStream {
                target,
                cancel: cancel.clone(),
            },
        );
        let mut guard = SendGuard {
            controller: self,
            state,
            target,
            message_id,
            cancel: cancel.clone(),
            revealing: false,
            armed: true,
        };
        tracing::debug!(%conversation_id, session_id = session_id.0, "send accepted");

        let request = self.config.completion_request(messages);
        let completion = match self.request(request, &cancel).await {
            Ok(completion) => reply_text(completion),
            Err(Interrupted::Cancelled) => {
                guard.disarm();
                return Ok(self.finish_cancelled_request(state, target, message_id));
            }
            Err(Interrupted::Failed { kind, message }) => {
                guard.disarm();
                return Ok(self.finish_failed(state, target, message_id, kind, message));
            }
        };

        let mut session = StreamSession::new(target, message_id, completion);
        state.update_conversation(conversation_id, "begin-reveal", |conversation| {
            if let Err(rejection) =
                conversation.apply_stream_transition(StreamTransition::BeginReveal(target))
            {
                tracing::warn!(%conversation_id, ?rejection, "reveal transition rejected");
            }
        })?;
        guard.revealing = true;

        while !session.is_fully_revealed() {
            let cancelled = tokio::select! {
                biased;
                () = cancel.cancelled() => true,
                () = tokio::time::sleep(self.config.reveal_interval) => cancel.is_cancelled(),
            };
            if cancelled {
                guard.disarm();
                return Ok(self.finish_cancelled_reveal(state, &session));
            }

            let text = session.reveal_next();
            state.update_conversation(conversation_id, "reveal-word", |conversation| {
                conversation.replace_streaming_text(message_id, text)
            })?;
        }

        guard.disarm();
        Ok(self.finish_completed(state, &session))
    }

    async fn request(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<String, Interrupted> {
        let timeout = self.config.request_timeout;
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Interrupted::Cancelled),
            result = tokio::time::timeout(timeout, self.provider.complete(request, cancel.clone())) => {
                match result {
                    Err(_) => Err(Interrupted::Failed {
                        kind: FailureKind::Timeout,
                        message: format!("request timed out after {}s", timeout.as_secs()),
                    }),
                    Ok(Err(error)) if error.is_cancelled() => Err(Interrupted::Cancelled),
                    Ok(Err(error)) => Err(Interrupted::Failed {
                        kind: failure_kind(&error),
                        message: error.to_string(),
                    }),
                    Ok(Ok(text)) => Ok(text),
                }
            }
        }
    }

    fn finish_completed(&self, state: &ChatState, session: &StreamSession) -> StreamOutcome {
        let target = session.target();
        let message_id = session.message_id();
        self.finalize(state, target, "complete-stream", |conversation| {
            conversation.finish_streaming(message_id, None);
            StreamTransition::Complete(target)
        });
        tracing::info!(
            conversation_id = %target.conversation_id,
            session_id = target.session_id.0,
            revealed_word_count = session.revealed_word_count(),
            "stream completed"
        );
        StreamOutcome::Completed {
            message_id,
            word_count: session.word_count(),
        }
    }

    fn finish_cancelled_request(
        &self,
        state: &ChatState,
        target: StreamTarget,
        message_id: MessageId,
    ) -> StreamOutcome {
        self.finalize(state, target, "cancel-request", |conversation| {
            conversation.remove_message(message_id);
            StreamTransition::Cancel(target)
        });
        tracing::debug!(
            conversation_id = %target.conversation_id,
            session_id = target.session_id.0,
            "stream cancelled while requesting"
        );
        StreamOutcome::CancelledBeforeReveal
    }

    fn finish_cancelled_reveal(&self, state: &ChatState, session: &StreamSession) -> StreamOutcome {
        let target = session.target();
        let message_id = session.message_id();
        let revealed = session.revealed_text();
        self.finalize(state, target, "cancel-reveal", |conversation| {
            conversation.finish_streaming(message_id, Some(revealed));
            StreamTransition::Cancel(target)
        });
        tracing::debug!(
            conversation_id = %target.conversation_id,
            session_id = target.session_id.0,
            revealed_word_count = session.revealed_word_count(),
            "stream cancelled while revealing"
        );
        StreamOutcome::CancelledDuringReveal {
            message_id,
            revealed_word_count: session.revealed_word_count(),
        }
    }

    fn finish_failed(
        &self,
        state: &ChatState,
        target: StreamTarget,
        message_id: MessageId,
        kind: FailureKind,
        message: String,
    ) -> StreamOutcome {
        let error_text = format!("Error: {message}");
        let failure = message.clone();
        self.finalize(state, target, "fail-stream", |conversation| {
            conversation.finish_streaming(message_id, Some(error_text));
            StreamTransition::Fail {
                target,
                message: failure,
            }
        });
        tracing::warn!(
            conversation_id = %target.conversation_id,
            session_id = target.session_id.0,
            ?kind,
            error = %message,
            "stream request failed"
        );
        StreamOutcome::Failed {
            message_id,
            kind,
            message,
        }
    }

    /// Applies the terminal mutation, releases the session and persists.
    fn finalize(
        &self,
        state: &ChatState,
        target: StreamTarget,
        stage: &'static str,
        mutate: impl FnOnce(&mut Conversation) -> StreamTransition,
    ) {
        let applied = state.update_conversation(target.conversation_id, stage, |conversation| {
            let transition = mutate(conversation);
            conversation.apply_stream_transition(transition)
        });
        match applied {
            Ok(Ok(_)) => {}
            Ok(Err(rejection)) => {
                tracing::warn!(stage, ?rejection, "terminal transition rejected");
            }
            Err(error) => tracing::warn!(stage, error = %error, "stream target vanished"),
        }
        self.release(target);
        state.persist_logged("persist-after-stream");
    }

    fn release(&self, target: StreamTarget) {
        let mut active = self.lock_active();
        if active
            .get(&target.conversation_id)
            .is_some_and(|stream| stream.target == target)
        {
            active.remove(&target.conversation_id);
        }
    }

    /// Requests cancellation of the conversation's in-flight stream, if any.
    pub fn cancel(&self, conversation_id: ConversationId) -> bool {
        match self.lock_active().get(&conversation_id) {
            Some(stream) => {
                stream.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels only when `stop` still names the active session.
    pub fn stop(&self, stop: Stop) -> bool {
        match self.lock_active().get(&stop.target.conversation_id) {
            Some(stream) if stream.target == stop.target => {
                stream.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn cancel_all(&self) {
        for stream in self.lock_active().values() {
            stream.cancel.cancel();
        }
    }

    /// Returns whether `conversation_id` has a send in flight.
    pub fn is_active(&self, conversation_id: ConversationId) -> bool {
        self.lock_active().contains_key(&conversation_id)
    }

    pub fn active_count(&self) -> usize {
        self.lock_active().len()
    }

    pub fn active_target(&self, conversation_id: ConversationId) -> Option<StreamTarget> {
        self.lock_active()
            .get(&conversation_id)
            .map(|stream| stream.target)
    }

    fn lock_active(&self) -> MutexGuard<'_, HashMap<ConversationId, ActiveStream>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn failure_kind(error: &ProviderError) -> FailureKind {
    match error {
        ProviderError::Api { .. } => FailureKind::Api,
        _ => FailureKind::Provider,
    }
}

/// Finalizes an abandoned send when its future is dropped mid-flight.
struct SendGuard<'a> {
    controller: &'a StreamController,
    state: &'a ChatState,
    target: StreamTarget,
    message_id: MessageId,
    cancel: CancellationToken,
    revealing: bool,
    armed: bool,
}

impl SendGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for SendGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.cancel.cancel();
        let message_id = self.message_id;
        let target = self.target;
        let revealing = self.revealing;
        self.controller
            .finalize(self.state, target, "abandon-stream", |conversation| {
                if revealing {
                    conversation.finish_streaming(message_id, None);
                } else {
                    conversation.remove_message(message_id);
                }
                StreamTransition::Cancel(target)
            });
        tracing::debug!(
            conversation_id = %target.conversation_id,
            session_id = target.session_id.0,
            "send dropped before finishing"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use gigi_llm::{BoxFuture, ProviderResult, Role};
    use gigi_storage::MemoryStore;

    use super::*;
    use crate::chat::error::ChatError;
    use crate::chat::history::FALLBACK_REPLY;
    use crate::chat::message::StreamState;

    enum Script {
        Reply(&'static str),
        ReplyAfter(Duration, &'static str),
        Fail(&'static str),
        Hang,
    }

    #[derive(Default)]
    struct ScriptedProvider {
        script: Mutex<VecDeque<Script>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedProvider {
        fn new(script: impl IntoIterator<Item = Script>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into_iter().collect()),
                requests: Mutex::default(),
            })
        }

        fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl CompletionProvider for ScriptedProvider {
        fn id(&self) -> &str {
            "scripted"
        }

        fn name(&self) -> &str {
            "Scripted"
        }

        fn default_model(&self) -> &str {
            "scripted-model"
        }

        fn complete<'a>(
            &'a self,
            request: CompletionRequest,
            cancel: CancellationToken,
        ) -> BoxFuture<'a, ProviderResult<String>> {
            self.requests.lock().unwrap().push(request);
            let step = self.script.lock().unwrap().pop_front().unwrap_or(Script::Hang);
            Box::pin(async move {
                let (delay, reply) = match step {
                    Script::Reply(text) => (Duration::ZERO, text),
                    Script::ReplyAfter(delay, text) => (delay, text),
                    Script::Fail(message) => {
                        return Err(ProviderError::Api {
                            stage: "scripted",
                            message: message.to_string(),
                        });
                    }
                    Script::Hang => {
                        cancel.cancelled().await;
                        return Err(ProviderError::Cancelled { stage: "scripted" });
                    }
                };
                tokio::select! {
                    () = cancel.cancelled() => Err(ProviderError::Cancelled { stage: "scripted" }),
                    () = tokio::time::sleep(delay) => Ok(reply.to_string()),
                }
            })
        }
    }

    fn setup(
        script: impl IntoIterator<Item = Script>,
    ) -> (Arc<StreamController>, ChatState, Arc<ScriptedProvider>, Arc<MemoryStore>) {
        let provider = ScriptedProvider::new(script);
        let store = Arc::new(MemoryStore::new());
        let state = ChatState::load(store.clone()).unwrap();
        let config = DeliveryConfig::new("test-model")
            .with_system_prompt("be brief")
            .with_temperature(0.7)
            .with_max_tokens(2048)
            .with_request_timeout(Duration::from_secs(5));
        let controller = Arc::new(StreamController::new(provider.clone(), config));
        (controller, state, provider, store)
    }

    fn current(state: &ChatState) -> Conversation {
        let id = state.current_conversation_id().unwrap();
        state.conversation(id).unwrap()
    }

    fn spawn_send(
        controller: &Arc<StreamController>,
        state: &ChatState,
        prompt: &'static str,
    ) -> tokio::task::JoinHandle<ChatResult<StreamOutcome>> {
        let controller = controller.clone();
        let state = state.clone();
        let conversation_id = state.current_conversation_id().unwrap();
        tokio::spawn(async move {
            controller
                .send(&state, Submit::new(conversation_id, prompt))
                .await
        })
    }

    #[tokio::test(start_paused = true)]
    async fn completed_send_reveals_full_text() {
        let (controller, state, provider, store) =
            setup([Script::Reply("Hello there,\nfriend!  Bye")]);
        let conversation_id = state.current_conversation_id().unwrap();

        let outcome = controller
            .send(&state, Submit::new(conversation_id, "  say hi  "))
            .await
            .unwrap();

        let conversation = current(&state);
        let reply = conversation.messages.last().unwrap();
        assert_eq!(
            outcome,
            StreamOutcome::Completed {
                message_id: reply.id,
                word_count: 4,
            }
        );
        assert_eq!(reply.text, "Hello there,\nfriend!  Bye");
        assert!(!reply.is_streaming);
        assert_eq!(conversation.title, "say hi");
        assert!(matches!(conversation.stream_state, StreamState::Completed(_)));
        assert!(!controller.is_active(conversation_id));

        let request = &provider.requests()[0];
        assert_eq!(request.model_id, "test-model");
        assert_eq!(request.preamble.as_deref(), Some("be brief"));
        assert_eq!(request.max_tokens, Some(2048));
        let last = request.messages.last().unwrap();
        assert_eq!((last.role, last.content.as_str()), (Role::User, "say hi"));

        let saved = &store.snapshot()[0];
        assert_eq!(saved.messages.last().unwrap().text, reply.text);
    }

    #[tokio::test(start_paused = true)]
    async fn every_reveal_step_is_published() {
        let (controller, state, _, _) = setup([Script::Reply("The quick brown fox")]);
        let mut receiver = state.subscribe();
        let watcher = tokio::spawn(async move {
            let mut seen: Vec<String> = Vec::new();
            let mut started = false;
            while receiver.changed().await.is_ok() {
                let snapshot = receiver.borrow_and_update().clone();
                let Some(last) = snapshot.current().and_then(|c| c.messages.last()) else {
                    continue;
                };
                started |= last.is_streaming;
                if !started {
                    continue;
                }
                if !last.text.is_empty() && seen.last() != Some(&last.text) {
                    seen.push(last.text.clone());
                }
                if !last.is_streaming {
                    break;
                }
            }
            seen
        });

        spawn_send(&controller, &state, "go").await.unwrap().unwrap();
        assert_eq!(
            watcher.await.unwrap(),
            vec!["The", "The quick", "The quick brown", "The quick brown fox"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_revealing_keeps_exactly_revealed_words() {
        let (controller, state, _, store) = setup([Script::Reply("one two three four five")]);
        let conversation_id = state.current_conversation_id().unwrap();
        let handle = spawn_send(&controller, &state, "count");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(controller.cancel(conversation_id));
        let outcome = handle.await.unwrap().unwrap();

        let reply = current(&state).messages.last().cloned().unwrap();
        assert_eq!(
            outcome,
            StreamOutcome::CancelledDuringReveal {
                message_id: reply.id,
                revealed_word_count: 2,
            }
        );
        assert_eq!(reply.text, "one two");
        assert!(!reply.is_streaming);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(current(&state).messages.last().unwrap().text, "one two");
        assert!(matches!(
            current(&state).stream_state,
            StreamState::Cancelled(_)
        ));
        assert_eq!(store.snapshot()[0].messages.last().unwrap().text, "one two");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_requesting_removes_placeholder() {
        let (controller, state, _, _) = setup([Script::Hang]);
        let conversation_id = state.current_conversation_id().unwrap();
        let handle = spawn_send(&controller, &state, "anyone?");

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(controller.is_active(conversation_id));
        assert_eq!(current(&state).streaming_message_count(), 1);

        assert!(controller.cancel(conversation_id));
        assert_eq!(
            handle.await.unwrap().unwrap(),
            StreamOutcome::CancelledBeforeReveal
        );

        let conversation = current(&state);
        assert_eq!(conversation.streaming_message_count(), 0);
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[1].text, "anyone?");
        assert_eq!(controller.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn api_failure_becomes_error_text() {
        let (controller, state, _, _) = setup([Script::Fail("quota exceeded")]);
        let conversation_id = state.current_conversation_id().unwrap();

        let outcome = controller
            .send(&state, Submit::new(conversation_id, "hi"))
            .await
            .unwrap();

        let reply = current(&state).messages.last().cloned().unwrap();
        assert_eq!(
            outcome,
            StreamOutcome::Failed {
                message_id: reply.id,
                kind: FailureKind::Api,
                message: "quota exceeded".into(),
            }
        );
        assert_eq!(reply.text, "Error: quota exceeded");
        assert!(!reply.is_streaming);
        assert!(matches!(
            current(&state).stream_state,
            StreamState::Failed { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_provider_times_out() {
        let (controller, state, _, _) = setup([Script::Hang]);
        let conversation_id = state.current_conversation_id().unwrap();

        let outcome = controller
            .send(&state, Submit::new(conversation_id, "hello?"))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            StreamOutcome::Failed {
                kind: FailureKind::Timeout,
                ..
            }
        ));
        assert_eq!(
            current(&state).messages.last().unwrap().text,
            "Error: request timed out after 5s"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_send_on_same_conversation_is_rejected() {
        let (controller, state, _, _) = setup([Script::Hang, Script::Reply("never")]);
        let conversation_id = state.current_conversation_id().unwrap();
        let first = spawn_send(&controller, &state, "first");
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = controller
            .send(&state, Submit::new(conversation_id, "second"))
            .await;
        assert!(matches!(
            second,
            Err(ChatError::StreamRejected {
                rejection: StreamTransitionRejection::AlreadyStreaming { .. },
                ..
            })
        ));
        assert_eq!(current(&state).streaming_message_count(), 1);
        assert_eq!(current(&state).user_message_count(), 1);

        controller.cancel_all();
        assert!(first.await.unwrap().unwrap().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn separate_conversations_stream_independently() {
        let (controller, state, _, _) = setup([
            Script::ReplyAfter(Duration::from_millis(200), "slow answer"),
            Script::Reply("fast answer"),
        ]);
        let slow = spawn_send(&controller, &state, "slow");
        tokio::time::sleep(Duration::from_millis(10)).await;

        let other = state.new_conversation();
        let fast = controller
            .send(&state, Submit::new(other, "fast"))
            .await
            .unwrap();
        assert!(matches!(fast, StreamOutcome::Completed { .. }));
        assert_eq!(controller.active_count(), 1);

        assert!(matches!(
            slow.await.unwrap().unwrap(),
            StreamOutcome::Completed { .. }
        ));
        assert_eq!(controller.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_send_is_finalized_as_cancelled() {
        let (controller, state, _, _) = setup([Script::Reply("alpha beta gamma delta")]);
        let conversation_id = state.current_conversation_id().unwrap();

        let dropped = tokio::time::timeout(
            Duration::from_millis(100),
            controller.send(&state, Submit::new(conversation_id, "go")),
        )
        .await;
        assert!(dropped.is_err());

        let conversation = current(&state);
        let reply = conversation.messages.last().unwrap();
        assert_eq!(reply.text, "alpha beta");
        assert!(!reply.is_streaming);
        assert!(matches!(conversation.stream_state, StreamState::Cancelled(_)));
        assert_eq!(controller.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn blank_completion_reveals_fallback() {
        let (controller, state, _, _) = setup([Script::Reply("   ")]);
        let conversation_id = state.current_conversation_id().unwrap();
        controller
            .send(&state, Submit::new(conversation_id, "hi"))
            .await
            .unwrap();
        assert_eq!(current(&state).messages.last().unwrap().text, FALLBACK_REPLY);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_prompt_is_refused_without_touching_state() {
        let (controller, state, provider, _) = setup([]);
        let conversation_id = state.current_conversation_id().unwrap();
        let before = current(&state);

        let result = controller
            .send(&state, Submit::new(conversation_id, " \n "))
            .await;
        assert!(matches!(result, Err(ChatError::EmptyPrompt { .. })));
        assert_eq!(current(&state), before);
        assert!(provider.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_stop_does_not_cancel_newer_session() {
        let (controller, state, _, _) = setup([Script::Hang]);
        let conversation_id = state.current_conversation_id().unwrap();
        let handle = spawn_send(&controller, &state, "wait");
        tokio::time::sleep(Duration::from_millis(10)).await;

        let active = controller.active_target(conversation_id).unwrap();
        let stale = StreamTarget::new(
            conversation_id,
            StreamSessionId::new(active.session_id.0 + 99),
        );
        assert!(!controller.stop(Stop { target: stale }));
        assert!(controller.is_active(conversation_id));

        assert!(controller.stop(Stop { target: active }));
        assert!(handle.await.unwrap().unwrap().is_cancelled());
    }

    #[test]
    fn session_reveal_joins_words_with_single_spaces() {
        let target = StreamTarget::new(ConversationId::new_v7(), StreamSessionId::new(1));
        let mut session = StreamSession::new(target, MessageId::new_v7(), "a b  c".to_string());
        assert_eq!(session.word_count(), 4);
        assert_eq!(session.reveal_next(), "a");
        assert_eq!(session.reveal_next(), "a b");
        assert_eq!(session.reveal_next(), "a b ");
        assert_eq!(session.reveal_next(), "a b  c");
        assert!(session.is_fully_revealed());
        assert_eq!(session.revealed_text(), session.full_text());
    }
}
