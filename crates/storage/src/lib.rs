pub mod error;
pub mod ids;
pub mod json;
pub mod memory;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use ids::{ConversationId, MessageId};
pub use json::JsonFileStore;
pub use memory::MemoryStore;
pub use types::{
    AttachedFileRef, ConversationRecord, DEFAULT_CONVERSATION_TITLE, MAX_CONVERSATIONS,
    MessageRecord, Sender,
};

/// Whole-collection persistence for conversations: read everything, replace everything.
pub trait ConversationStore: Send + Sync {
    fn load(&self) -> StorageResult<Vec<ConversationRecord>>;

    /// Returns the conversation that was selected when the collection was last saved.
    fn load_current(&self) -> StorageResult<Option<ConversationId>>;

    /// Replaces the stored collection together with the selected conversation id.
    fn save(
        &self,
        conversations: &[ConversationRecord],
        current_conversation_id: Option<ConversationId>,
    ) -> StorageResult<()>;
}
