use gigi_storage::StorageError;
use snafu::Snafu;

use super::message::{ConversationId, StreamTransitionRejection};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("prompt is empty on `{stage}`"))]
    EmptyPrompt { stage: &'static str },
    #[snafu(display("conversation {conversation_id} not found on `{stage}`"))]
    ConversationNotFound {
        stage: &'static str,
        conversation_id: ConversationId,
    },
    #[snafu(display("stream transition rejected on `{stage}`: {rejection:?}"))]
    StreamRejected {
        stage: &'static str,
        rejection: StreamTransitionRejection,
    },
    #[snafu(display("failed to load conversations on `{stage}`: {source}"))]
    LoadConversations {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("failed to persist conversations on `{stage}`: {source}"))]
    Persist {
        stage: &'static str,
        source: StorageError,
    },
}

pub type ChatResult<T> = Result<T, ChatError>;
