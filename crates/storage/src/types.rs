use serde::{Deserialize, Serialize};

use super::ids::{ConversationId, MessageId};

/// Title given to conversations before the first user message names them.
pub const DEFAULT_CONVERSATION_TITLE: &str = "New Conversation";

/// Upper bound on conversations written to the store.
pub const MAX_CONVERSATIONS: usize = 50;

/// Storage-local speaker, kept separate from provider-facing roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Bot,
}

/// Reference to a file the user attached to a message. Only metadata is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedFileRef {
    pub name: String,
    pub uri: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub sender: Sender,
    pub text: String,
    pub timestamp_unix_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_file: Option<AttachedFileRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: ConversationId,
    pub title: String,
    pub messages: Vec<MessageRecord>,
    pub created_at_unix_ms: u64,
    pub updated_at_unix_ms: u64,
}
