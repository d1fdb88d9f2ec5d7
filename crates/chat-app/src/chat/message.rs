use std::time::{SystemTime, UNIX_EPOCH};

pub use gigi_storage::{AttachedFileRef, ConversationId, MessageId, Sender};
use gigi_storage::{ConversationRecord, DEFAULT_CONVERSATION_TITLE, MessageRecord};

/// Bot message seeding every fresh conversation.
pub const GREETING_TEXT: &str = "Hello! I'm Gigi, your AI assistant. How can I help you today?";
/// Bot message left behind when a conversation is cleared.
pub const CLEARED_TEXT: &str = "Chat cleared! How can I help you?";
/// Titles derived from the first prompt keep this many characters.
pub const TITLE_MAX_CHARS: usize = 30;

/// Identifier for one streaming generation session.
///
/// Changes on every send so late events from an older session can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamSessionId(pub u64);

impl StreamSessionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Routing key for one in-flight stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    pub conversation_id: ConversationId,
    pub session_id: StreamSessionId,
}

impl StreamTarget {
    pub const fn new(conversation_id: ConversationId, session_id: StreamSessionId) -> Self {
        Self {
            conversation_id,
            session_id,
        }
    }
}

/// One chat message as the conversation owns it.
///
/// Mutated only by the delivery controller while `is_streaming` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub id: MessageId,
    pub sender: Sender,
    pub text: String,
    pub timestamp_unix_ms: u64,
    pub is_streaming: bool,
    pub attached_file: Option<AttachedFileRef>,
}

impl RawMessage {
    /// Creates a settled message stamped with the current time.
    pub fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            id: MessageId::new_v7(),
            sender,
            text: text.into(),
            timestamp_unix_ms: now_unix_ms(),
            is_streaming: false,
            attached_file: None,
        }
    }

    /// Creates a user message, optionally carrying an attachment reference.
    pub fn user(text: impl Into<String>, attached_file: Option<AttachedFileRef>) -> Self {
        Self {
            attached_file,
            ..Self::new(Sender::User, text)
        }
    }

    /// Creates a settled bot message.
    pub fn bot(text: impl Into<String>) -> Self {
        Self::new(Sender::Bot, text)
    }

    /// Empty bot message that anchors a reply while it is requested and revealed.
    pub fn streaming_placeholder() -> Self {
        Self {
            is_streaming: true,
            ..Self::new(Sender::Bot, String::new())
        }
    }

    pub fn to_record(&self) -> MessageRecord {
        MessageRecord {
            id: self.id,
            sender: self.sender,
            text: self.text.clone(),
            timestamp_unix_ms: self.timestamp_unix_ms,
            attached_file: self.attached_file.clone(),
        }
    }
}

impl From<MessageRecord> for RawMessage {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: record.id,
            sender: record.sender,
            text: record.text,
            timestamp_unix_ms: record.timestamp_unix_ms,
            is_streaming: false,
            attached_file: record.attached_file,
        }
    }
}

/// Conversation aggregate root.
///
/// At most one message is streaming at a time, and `updated_at_unix_ms` strictly
/// increases with every mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    pub messages: Vec<RawMessage>,
    pub created_at_unix_ms: u64,
    pub updated_at_unix_ms: u64,
    pub stream_state: StreamState,
}

impl Conversation {
    /// Creates an empty conversation with `title`.
    pub fn new(title: impl Into<String>) -> Self {
        let now = now_unix_ms();
        Self {
            id: ConversationId::new_v7(),
            title: title.into(),
            messages: Vec::new(),
            created_at_unix_ms: now,
            updated_at_unix_ms: now,
            stream_state: StreamState::Idle,
        }
    }

    /// Fresh conversation with the default title and the bot greeting.
    pub fn with_greeting() -> Self {
        let mut conversation = Self::new(DEFAULT_CONVERSATION_TITLE);
        conversation.messages.push(RawMessage::bot(GREETING_TEXT));
        conversation
    }

    pub fn from_record(record: ConversationRecord) -> Self {
        Self {
            id: record.id,
            title: record.title,
            messages: record.messages.into_iter().map(RawMessage::from).collect(),
            created_at_unix_ms: record.created_at_unix_ms,
            updated_at_unix_ms: record.updated_at_unix_ms,
            stream_state: StreamState::Idle,
        }
    }

    /// Persisted form; messages still streaming are left out.
    pub fn to_record(&self) -> ConversationRecord {
        ConversationRecord {
            id: self.id,
            title: self.title.clone(),
            messages: self
                .messages
                .iter()
                .filter(|message| !message.is_streaming)
                .map(RawMessage::to_record)
                .collect(),
            created_at_unix_ms: self.created_at_unix_ms,
            updated_at_unix_ms: self.updated_at_unix_ms,
        }
    }

    fn touch(&mut self) {
        self.updated_at_unix_ms = now_unix_ms().max(self.updated_at_unix_ms.saturating_add(1));
    }

    pub fn message(&self, message_id: MessageId) -> Option<&RawMessage> {
        self.messages.iter().find(|message| message.id == message_id)
    }

    pub fn user_message_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|message| message.sender == Sender::User)
            .count()
    }

    pub fn streaming_message_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|message| message.is_streaming)
            .count()
    }

    /// Appends a user prompt, naming the conversation after it when it is the first one.
    pub fn push_user_message(&mut self, message: RawMessage) {
        if self.user_message_count() == 0 {
            self.title = derive_title(&message.text);
        }
        self.messages.push(message);
        self.touch();
    }

    pub fn push_message(&mut self, message: RawMessage) {
        self.messages.push(message);
        self.touch();
    }

    /// Replaces the text of a streaming message. Finalized messages are immutable.
    pub fn replace_streaming_text(&mut self, message_id: MessageId, text: String) -> bool {
        let Some(message) = self
            .messages
            .iter_mut()
            .find(|message| message.id == message_id && message.is_streaming)
        else {
            return false;
        };
        message.text = text;
        self.touch();
        true
    }

    /// Clears the streaming flag, optionally replacing the text first.
    pub fn finish_streaming(&mut self, message_id: MessageId, text: Option<String>) -> bool {
        let Some(message) = self
            .messages
            .iter_mut()
            .find(|message| message.id == message_id && message.is_streaming)
        else {
            return false;
        };
        if let Some(text) = text {
            message.text = text;
        }
        message.is_streaming = false;
        self.touch();
        true
    }

    pub fn remove_message(&mut self, message_id: MessageId) -> Option<RawMessage> {
        let index = self
            .messages
            .iter()
            .position(|message| message.id == message_id)?;
        let removed = self.messages.remove(index);
        self.touch();
        Some(removed)
    }

    /// Drops every message, leaving only the "chat cleared" notice.
    pub fn clear(&mut self) {
        self.messages = vec![RawMessage::bot(CLEARED_TEXT)];
        self.title = DEFAULT_CONVERSATION_TITLE.to_string();
        self.touch();
    }

    /// Applies a deterministic stream transition.
    pub fn apply_stream_transition(
        &mut self,
        transition: StreamTransition,
    ) -> StreamTransitionResult {
        let next_state = self.stream_state.apply(transition)?;
        self.stream_state = next_state.clone();
        Ok(next_state)
    }
}

/// First prompt, trimmed and cut to [`TITLE_MAX_CHARS`] characters with an ellipsis.
pub fn derive_title(prompt: &str) -> String {
    let trimmed = prompt.trim();
    let mut title: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    if trimmed.chars().count() > TITLE_MAX_CHARS {
        title.push_str("...");
    }
    title
}

pub(crate) fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis() as u64)
}

/// Per-conversation delivery lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    Requesting(StreamTarget),
    Revealing(StreamTarget),
    Completed(StreamTarget),
    Failed {
        target: StreamTarget,
        message: String,
    },
    Cancelled(StreamTarget),
}

/// State transition input for the delivery lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTransition {
    Start(StreamTarget),
    BeginReveal(StreamTarget),
    Complete(StreamTarget),
    Fail {
        target: StreamTarget,
        message: String,
    },
    Cancel(StreamTarget),
}

/// Rejection reason for illegal stream transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTransitionRejection {
    AlreadyStreaming {
        active: StreamTarget,
        attempted: StreamTarget,
    },
    NoActiveStream,
    /// Deleting or clearing was attempted while a stream is in flight.
    StreamInFlight {
        active: StreamTarget,
    },
    NotRequesting {
        attempted: StreamTarget,
    },
    SessionMismatch {
        active: StreamTarget,
        attempted: StreamTarget,
    },
}

pub type StreamTransitionResult = Result<StreamState, StreamTransitionRejection>;

impl StreamState {
    /// Target of the in-flight stream while requesting or revealing.
    pub fn active_target(&self) -> Option<StreamTarget> {
        match self {
            Self::Requesting(target) | Self::Revealing(target) => Some(*target),
            Self::Idle | Self::Completed(_) | Self::Failed { .. } | Self::Cancelled(_) => None,
        }
    }

    /// Returns `true` while requesting or revealing.
    pub fn is_active(&self) -> bool {
        self.active_target().is_some()
    }

    /// Applies one transition deterministically.
    ///
    /// Inactive states may start a new session directly. Every other transition must
    /// name the active session exactly.
    pub fn apply(&self, transition: StreamTransition) -> StreamTransitionResult {
        match transition {
            StreamTransition::Start(target) => self.apply_start(target),
            StreamTransition::BeginReveal(target) => self.apply_begin_reveal(target),
            StreamTransition::Complete(target) => {
                self.apply_terminal(target, StreamState::Completed(target))
            }
            StreamTransition::Fail { target, message } => {
                self.apply_terminal(target, StreamState::Failed { target, message })
            }
            StreamTransition::Cancel(target) => {
                self.apply_terminal(target, StreamState::Cancelled(target))
            }
        }
    }

    fn apply_start(&self, target: StreamTarget) -> StreamTransitionResult {
        match self.active_target() {
            Some(active) => Err(StreamTransitionRejection::AlreadyStreaming {
                active,
                attempted: target,
            }),
            None => Ok(Self::Requesting(target)),
        }
    }

    fn apply_begin_reveal(&self, target: StreamTarget) -> StreamTransitionResult {
        match self {
            Self::Requesting(active) if *active == target => Ok(Self::Revealing(target)),
            Self::Requesting(active) => Err(StreamTransitionRejection::SessionMismatch {
                active: *active,
                attempted: target,
            }),
            _ => Err(StreamTransitionRejection::NotRequesting { attempted: target }),
        }
    }

    fn apply_terminal(&self, target: StreamTarget, next: StreamState) -> StreamTransitionResult {
        match self.active_target() {
            Some(active) if active == target => Ok(next),
            Some(active) => Err(StreamTransitionRejection::SessionMismatch {
                active,
                attempted: target,
            }),
            None => Err(StreamTransitionRejection::NoActiveStream),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(session: u64) -> StreamTarget {
        StreamTarget::new(ConversationId::new_v7(), StreamSessionId::new(session))
    }

    #[test]
    fn lifecycle_runs_request_reveal_complete() {
        let first = target(1);
        let state = StreamState::Idle
            .apply(StreamTransition::Start(first))
            .and_then(|state| state.apply(StreamTransition::BeginReveal(first)))
            .and_then(|state| state.apply(StreamTransition::Complete(first)))
            .unwrap();
        assert_eq!(state, StreamState::Completed(first));
    }

    #[test]
    fn start_is_rejected_while_requesting_or_revealing() {
        let first = target(1);
        let second = StreamTarget::new(first.conversation_id, StreamSessionId::new(2));

        for state in [StreamState::Requesting(first), StreamState::Revealing(first)] {
            assert_eq!(
                state.apply(StreamTransition::Start(second)),
                Err(StreamTransitionRejection::AlreadyStreaming {
                    active: first,
                    attempted: second,
                })
            );
        }
    }

    #[test]
    fn terminal_states_allow_a_new_start() {
        let first = target(1);
        let second = target(2);
        for state in [
            StreamState::Completed(first),
            StreamState::Cancelled(first),
            StreamState::Failed {
                target: first,
                message: "boom".into(),
            },
        ] {
            assert_eq!(
                state.apply(StreamTransition::Start(second)),
                Ok(StreamState::Requesting(second))
            );
        }
    }

    #[test]
    fn stale_session_cannot_finish_the_active_one() {
        let active = target(7);
        let stale = StreamTarget::new(active.conversation_id, StreamSessionId::new(6));
        assert_eq!(
            StreamState::Revealing(active).apply(StreamTransition::Cancel(stale)),
            Err(StreamTransitionRejection::SessionMismatch {
                active,
                attempted: stale,
            })
        );
        assert_eq!(
            StreamState::Idle.apply(StreamTransition::Complete(active)),
            Err(StreamTransitionRejection::NoActiveStream)
        );
    }

    #[test]
    fn reveal_requires_requesting() {
        let active = target(3);
        assert_eq!(
            StreamState::Revealing(active).apply(StreamTransition::BeginReveal(active)),
            Err(StreamTransitionRejection::NotRequesting { attempted: active })
        );
    }

    #[test]
    fn first_user_message_names_the_conversation() {
        let mut conversation = Conversation::with_greeting();
        conversation.push_user_message(RawMessage::user(
            "  How do I reverse a linked list in Rust without unsafe?  ",
            None,
        ));
        assert_eq!(conversation.title, "How do I reverse a linked list...");

        conversation.push_user_message(RawMessage::user("second question", None));
        assert_eq!(conversation.title, "How do I reverse a linked list...");
    }

    #[test]
    fn short_prompt_title_has_no_ellipsis() {
        assert_eq!(derive_title("hi there"), "hi there");
        assert_eq!(derive_title(&"é".repeat(30)), "é".repeat(30));
        assert_eq!(derive_title(&"é".repeat(31)), format!("{}...", "é".repeat(30)));
    }

    #[test]
    fn updated_at_strictly_increases() {
        let mut conversation = Conversation::new("t");
        let placeholder = RawMessage::streaming_placeholder();
        let placeholder_id = placeholder.id;

        let mut stamps = vec![conversation.updated_at_unix_ms];
        conversation.push_message(placeholder);
        stamps.push(conversation.updated_at_unix_ms);
        for word in ["a", "a b", "a b c"] {
            assert!(conversation.replace_streaming_text(placeholder_id, word.to_string()));
            stamps.push(conversation.updated_at_unix_ms);
        }
        assert!(conversation.finish_streaming(placeholder_id, None));
        stamps.push(conversation.updated_at_unix_ms);

        assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]), "{stamps:?}");
    }

    #[test]
    fn finalized_messages_are_immutable() {
        let mut conversation = Conversation::new("t");
        let placeholder = RawMessage::streaming_placeholder();
        let id = placeholder.id;
        conversation.push_message(placeholder);
        assert!(conversation.finish_streaming(id, Some("done".into())));

        assert!(!conversation.replace_streaming_text(id, "again".into()));
        assert!(!conversation.finish_streaming(id, None));
        assert_eq!(conversation.message(id).map(|m| m.text.as_str()), Some("done"));
    }

    #[test]
    fn records_skip_streaming_messages() {
        let mut conversation = Conversation::with_greeting();
        conversation.push_message(RawMessage::streaming_placeholder());

        let record = conversation.to_record();
        assert_eq!(record.messages.len(), 1);
        assert_eq!(record.messages[0].text, GREETING_TEXT);

        let restored = Conversation::from_record(record);
        assert_eq!(restored.streaming_message_count(), 0);
        assert_eq!(restored.stream_state, StreamState::Idle);
    }

    #[test]
    fn clear_resets_title_and_messages() {
        let mut conversation = Conversation::with_greeting();
        conversation.push_user_message(RawMessage::user("hello", None));
        conversation.clear();

        assert_eq!(conversation.title, DEFAULT_CONVERSATION_TITLE);
        assert_eq!(conversation.messages.len(), 1);
        assert_eq!(conversation.messages[0].text, CLEARED_TEXT);
    }
}
