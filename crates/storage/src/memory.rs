use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use super::ConversationStore;
use super::error::StorageResult;
use super::ids::ConversationId;
use super::types::ConversationRecord;

/// Process-local store, used for tests and for running without a data directory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    conversations: Mutex<Vec<ConversationRecord>>,
    current_conversation_id: Mutex<Option<ConversationId>>,
    save_count: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-filled with `conversations` and no selection.
    pub fn with_conversations(conversations: Vec<ConversationRecord>) -> Self {
        Self {
            conversations: Mutex::new(conversations),
            ..Self::default()
        }
    }

    /// Marks `id` as the selected conversation, as if a previous session had saved it.
    pub fn with_current(self, id: ConversationId) -> Self {
        *self
            .current_conversation_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(id);
        self
    }

    /// Number of successful `save` calls so far.
    pub fn save_count(&self) -> usize {
        self.save_count.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Vec<ConversationRecord> {
        self.conversations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ConversationStore for MemoryStore {
    fn load(&self) -> StorageResult<Vec<ConversationRecord>> {
        Ok(self.snapshot())
    }

    fn load_current(&self) -> StorageResult<Option<ConversationId>> {
        Ok(*self
            .current_conversation_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner))
    }

    fn save(
        &self,
        conversations: &[ConversationRecord],
        current_conversation_id: Option<ConversationId>,
    ) -> StorageResult<()> {
        *self
            .conversations
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = conversations.to_vec();
        *self
            .current_conversation_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = current_conversation_id;
        self.save_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
