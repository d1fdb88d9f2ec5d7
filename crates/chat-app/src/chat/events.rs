use super::message::{AttachedFileRef, ConversationId, MessageId, StreamTarget};

/// Emitted when the user submits a prompt to generate a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submit {
    pub conversation_id: ConversationId,
    pub content: String,
    pub attached_file: Option<AttachedFileRef>,
}

impl Submit {
    /// Creates a submission for `conversation_id` with no attachment.
    pub fn new(conversation_id: ConversationId, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            content: content.into(),
            attached_file: None,
        }
    }

    pub fn with_attached_file(mut self, attached_file: AttachedFileRef) -> Self {
        self.attached_file = Some(attached_file);
        self
    }
}

/// Emitted when the user asks to stop an active stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stop {
    pub target: StreamTarget,
}

/// Why a request produced no reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The provider answered with a non-success response.
    Api,
    /// No answer within the configured request timeout.
    Timeout,
    /// Transport or client failure before an answer arrived.
    Provider,
}

/// Terminal result of one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed {
        message_id: MessageId,
        word_count: usize,
    },
    /// Cancelled while requesting: the placeholder was removed.
    CancelledBeforeReveal,
    /// Cancelled while revealing: the message keeps the words revealed so far.
    CancelledDuringReveal {
        message_id: MessageId,
        revealed_word_count: usize,
    },
    Failed {
        message_id: MessageId,
        kind: FailureKind,
        message: String,
    },
}

impl StreamOutcome {
    /// Returns `true` for either cancellation outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::CancelledBeforeReveal | Self::CancelledDuringReveal { .. }
        )
    }
}
