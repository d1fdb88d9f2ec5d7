//! Single-writer container for every conversation.
//!
//! All mutations go through [`ChatState`]; each one is published on a
//! `tokio::sync::watch` channel so front-ends observe every intermediate state,
//! including every reveal step of a streaming reply.

use std::sync::Arc;

use gigi_storage::{ConversationStore, MAX_CONVERSATIONS};
use snafu::{OptionExt, ResultExt};
use tokio::sync::watch;

use super::error::{
    ChatResult, ConversationNotFoundSnafu, LoadConversationsSnafu, PersistSnafu,
    StreamRejectedSnafu,
};
use super::message::{Conversation, ConversationId, StreamTransitionRejection};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatSnapshot {
    /// Display order, most recent first.
    pub conversations: Vec<Conversation>,
    pub current_conversation_id: Option<ConversationId>,
}

impl ChatSnapshot {
    /// Returns the conversation with `conversation_id`, if it exists.
    pub fn conversation(&self, conversation_id: ConversationId) -> Option<&Conversation> {
        self.conversations
            .iter()
            .find(|conversation| conversation.id == conversation_id)
    }

    fn conversation_mut(&mut self, conversation_id: ConversationId) -> Option<&mut Conversation> {
        self.conversations
            .iter_mut()
            .find(|conversation| conversation.id == conversation_id)
    }

    /// Returns the selected conversation.
    pub fn current(&self) -> Option<&Conversation> {
        self.current_conversation_id
            .and_then(|conversation_id| self.conversation(conversation_id))
    }
}

/// Cheap to clone; clones share the same state and store.
#[derive(Clone)]
pub struct ChatState {
    sender: Arc<watch::Sender<ChatSnapshot>>,
    store: Option<Arc<dyn ConversationStore>>,
}

impl ChatState {
    /// State with one fresh conversation and no persistence.
    pub fn in_memory() -> Self {
        Self::from_conversations(Vec::new(), None, None)
    }

    /// Loads every stored conversation and restores the saved selection.
    ///
    /// A saved id that no longer names a stored conversation falls back to the first one.
    pub fn load(store: Arc<dyn ConversationStore>) -> ChatResult<Self> {
        let records = store.load().context(LoadConversationsSnafu {
            stage: "load-conversations",
        })?;
        let saved_current = store.load_current().context(LoadConversationsSnafu {
            stage: "load-current-conversation",
        })?;
        let conversations: Vec<Conversation> =
            records.into_iter().map(Conversation::from_record).collect();
        tracing::info!(
            conversation_count = conversations.len(),
            restored_current = saved_current.is_some(),
            "loaded conversations"
        );
        Ok(Self::from_conversations(
            conversations,
            saved_current,
            Some(store),
        ))
    }

    fn from_conversations(
        mut conversations: Vec<Conversation>,
        saved_current: Option<ConversationId>,
        store: Option<Arc<dyn ConversationStore>>,
    ) -> Self {
        if conversations.is_empty() {
            conversations.push(Conversation::with_greeting());
        }
        let current_conversation_id = saved_current
            .filter(|saved| conversations.iter().any(|conversation| conversation.id == *saved))
            .or_else(|| conversations.first().map(|conversation| conversation.id));
        let (sender, _) = watch::channel(ChatSnapshot {
            conversations,
            current_conversation_id,
        });
        Self {
            sender: Arc::new(sender),
            store,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.sender.subscribe()
    }

    /// Returns a copy of the current state.
    pub fn snapshot(&self) -> ChatSnapshot {
        self.sender.borrow().clone()
    }

    /// Returns a copy of one conversation, if it exists.
    pub fn conversation(&self, conversation_id: ConversationId) -> Option<Conversation> {
        self.sender.borrow().conversation(conversation_id).cloned()
    }

    pub fn current_conversation_id(&self) -> Option<ConversationId> {
        self.sender.borrow().current_conversation_id
    }

    /// Runs `update` against one conversation and publishes the result.
    pub fn update_conversation<R>(
        &self,
        conversation_id: ConversationId,
        stage: &'static str,
        update: impl FnOnce(&mut Conversation) -> R,
    ) -> ChatResult<R> {
        let mut output = None;
        self.sender.send_if_modified(|snapshot| {
            match snapshot.conversation_mut(conversation_id) {
                Some(conversation) => {
                    output = Some(update(conversation));
                    true
                }
                None => false,
            }
        });
        output.context(ConversationNotFoundSnafu {
            stage,
            conversation_id,
        })
    }

    /// Prepends a greeting conversation and makes it current.
    pub fn new_conversation(&self) -> ConversationId {
        let conversation = Conversation::with_greeting();
        let conversation_id = conversation.id;
        self.sender.send_modify(|snapshot| {
            snapshot.conversations.insert(0, conversation);
            snapshot.current_conversation_id = Some(conversation_id);
        });
        tracing::debug!(%conversation_id, "created conversation");
        self.persist_logged("persist-new-conversation");
        conversation_id
    }

    /// Makes `conversation_id` current and persists the selection.
    pub fn select_conversation(&self, conversation_id: ConversationId) -> ChatResult<()> {
        let mut found = false;
        self.sender.send_if_modified(|snapshot| {
            found = snapshot.conversation(conversation_id).is_some();
            if found {
                snapshot.current_conversation_id = Some(conversation_id);
            }
            found
        });
        snafu::ensure!(
            found,
            ConversationNotFoundSnafu {
                stage: "select-conversation",
                conversation_id,
            }
        );
        tracing::debug!(%conversation_id, "selected conversation");
        self.persist_logged("persist-selected-conversation");
        Ok(())
    }

    /// Removes a conversation. Removing the last one leaves a fresh greeting conversation.
    pub fn delete_conversation(&self, conversation_id: ConversationId) -> ChatResult<()> {
        let mut outcome = Ok(());
        self.sender.send_if_modified(|snapshot| {
            outcome = idle_check(
                snapshot.conversation(conversation_id),
                conversation_id,
                "delete-conversation",
            );
            if outcome.is_err() {
                return false;
            }
            snapshot
                .conversations
                .retain(|conversation| conversation.id != conversation_id);
            if snapshot.conversations.is_empty() {
                snapshot.conversations.push(Conversation::with_greeting());
            }
            if snapshot.current().is_none() {
                snapshot.current_conversation_id =
                    snapshot.conversations.first().map(|conversation| conversation.id);
            }
            true
        });
        outcome?;
        tracing::debug!(%conversation_id, "deleted conversation");
        self.persist_logged("persist-deleted-conversation");
        Ok(())
    }

    /// Replaces a conversation's messages with the cleared notice.
    pub fn clear_conversation(&self, conversation_id: ConversationId) -> ChatResult<()> {
        let mut outcome = Ok(());
        self.sender.send_if_modified(|snapshot| {
            let conversation = snapshot.conversation_mut(conversation_id);
            outcome = idle_check(conversation.as_deref(), conversation_id, "clear-conversation");
            match conversation {
                Some(conversation) if outcome.is_ok() => {
                    conversation.clear();
                    true
                }
                _ => false,
            }
        });
        outcome?;
        tracing::debug!(%conversation_id, "cleared conversation");
        self.persist_logged("persist-cleared-conversation");
        Ok(())
    }

    /// Writes the most recent conversations and the selection through the attached store.
    pub fn persist(&self) -> ChatResult<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let (records, current_conversation_id) = {
            let snapshot = self.sender.borrow();
            let records: Vec<_> = snapshot
                .conversations
                .iter()
                .take(MAX_CONVERSATIONS)
                .map(Conversation::to_record)
                .collect();
            (records, snapshot.current_conversation_id)
        };
        store.save(&records, current_conversation_id).context(PersistSnafu {
            stage: "save-conversations",
        })
    }

    pub(crate) fn persist_logged(&self, stage: &'static str) {
        if let Err(error) = self.persist() {
            tracing::warn!(stage, error = %error, "failed to persist conversations");
        }
    }
}

fn idle_check(
    conversation: Option<&Conversation>,
    conversation_id: ConversationId,
    stage: &'static str,
) -> ChatResult<()> {
    let conversation = conversation.context(ConversationNotFoundSnafu {
        stage,
        conversation_id,
    })?;
    match conversation.stream_state.active_target() {
        Some(active) => StreamRejectedSnafu {
            stage,
            rejection: StreamTransitionRejection::StreamInFlight { active },
        }
        .fail(),
        None => Ok(()),
    }
}
