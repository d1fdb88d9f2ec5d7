use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use super::ConversationStore;
use super::error::{
    CreateStoreDirectorySnafu, DecodeStoreSnafu, EncodeStoreSnafu, ReadStoreSnafu,
    ReplaceStoreSnafu, StorageResult, WriteStoreSnafu,
};
use super::ids::ConversationId;
use super::types::ConversationRecord;

const ARCHIVE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct ConversationArchive {
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_conversation_id: Option<ConversationId>,
    conversations: Vec<ConversationRecord>,
}

/// Conversation store backed by a single JSON document, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Creates a store that reads and replaces the document at `path`.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_store_text(&self) -> StorageResult<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(source).context(ReadStoreSnafu {
                stage: "read-store",
                path: display_path(&self.path),
            }),
        }
    }

    /// Returns the decoded archive, or `None` when the document is missing or blank.
    fn read_archive(&self) -> StorageResult<Option<ConversationArchive>> {
        let Some(text) = self.read_store_text()? else {
            tracing::debug!(path = %self.path.display(), "conversation store missing; starting empty");
            return Ok(None);
        };

        if text.trim().is_empty() {
            return Ok(None);
        }

        let archive: ConversationArchive =
            serde_json::from_str(&text).context(DecodeStoreSnafu {
                stage: "decode-store",
                path: display_path(&self.path),
            })?;

        if archive.version != ARCHIVE_VERSION {
            tracing::warn!(
                path = %self.path.display(),
                version = archive.version,
                "conversation store has an unexpected version; reading it anyway"
            );
        }

        Ok(Some(archive))
    }
}

impl ConversationStore for JsonFileStore {
    fn load(&self) -> StorageResult<Vec<ConversationRecord>> {
        Ok(self
            .read_archive()?
            .map(|archive| archive.conversations)
            .unwrap_or_default())
    }

    fn load_current(&self) -> StorageResult<Option<ConversationId>> {
        Ok(self
            .read_archive()?
            .and_then(|archive| archive.current_conversation_id))
    }

    fn save(
        &self,
        conversations: &[ConversationRecord],
        current_conversation_id: Option<ConversationId>,
    ) -> StorageResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context(CreateStoreDirectorySnafu {
                stage: "create-store-directory",
                path: display_path(parent),
            })?;
        }

        let archive = ConversationArchive {
            version: ARCHIVE_VERSION,
            current_conversation_id,
            conversations: conversations.to_vec(),
        };
        let serialized = serde_json::to_string_pretty(&archive).context(EncodeStoreSnafu {
            stage: "encode-store",
        })?;

        // Readers never observe a half-written document: write aside, then rename over.
        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, serialized).context(WriteStoreSnafu {
            stage: "write-temporary-store",
            path: display_path(&temp_path),
        })?;
        std::fs::rename(&temp_path, &self.path).context(ReplaceStoreSnafu {
            stage: "rename-temporary-store",
            from: display_path(&temp_path),
            to: display_path(&self.path),
        })?;

        tracing::debug!(
            path = %self.path.display(),
            conversation_count = conversations.len(),
            "saved conversations"
        );
        Ok(())
    }
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::ids::{ConversationId, MessageId};
    use crate::types::{AttachedFileRef, MessageRecord, Sender};

    fn sample_conversation(title: &str) -> ConversationRecord {
        ConversationRecord {
            id: ConversationId::new_v7(),
            title: title.to_string(),
            messages: vec![
                MessageRecord {
                    id: MessageId::new_v7(),
                    sender: Sender::User,
                    text: "what is `ls`?".to_string(),
                    timestamp_unix_ms: 1_700_000_000_000,
                    attached_file: Some(AttachedFileRef {
                        name: "notes.txt".to_string(),
                        uri: "file:///tmp/notes.txt".to_string(),
                        mime_type: "text/plain".to_string(),
                        size_bytes: 42,
                    }),
                },
                MessageRecord {
                    id: MessageId::new_v7(),
                    sender: Sender::Bot,
                    text: "It **lists** files.".to_string(),
                    timestamp_unix_ms: 1_700_000_000_500,
                    attached_file: None,
                },
            ],
            created_at_unix_ms: 1_700_000_000_000,
            updated_at_unix_ms: 1_700_000_000_500,
        }
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("absent.json"));
        assert!(store.load().unwrap().is_empty());
        assert_eq!(store.load_current().unwrap(), None);
    }

    #[test]
    fn current_conversation_id_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversations.json");
        let conversations = vec![sample_conversation("first"), sample_conversation("second")];
        let current = conversations[1].id;

        JsonFileStore::new(path.clone())
            .save(&conversations, Some(current))
            .unwrap();

        let reopened = JsonFileStore::new(path);
        assert_eq!(reopened.load_current().unwrap(), Some(current));
        assert_eq!(reopened.load().unwrap(), conversations);
    }

    #[test]
    fn archive_without_current_id_still_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversations.json");
        std::fs::write(&path, r#"{ "version": 1, "conversations": [] }"#).unwrap();

        let store = JsonFileStore::new(path);
        assert!(store.load().unwrap().is_empty());
        assert_eq!(store.load_current().unwrap(), None);
    }

    #[test]
    fn save_creates_parent_directories_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/deeper/conversations.json"));
        let conversations = vec![sample_conversation("first"), sample_conversation("second")];

        store.save(&conversations, None).unwrap();

        assert_eq!(store.load().unwrap(), conversations);
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn save_replaces_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("conversations.json"));

        store.save(&[sample_conversation("old")], None).unwrap();
        let replacement = vec![sample_conversation("new")];
        store.save(&replacement, None).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].title, "new");
    }

    #[test]
    fn corrupt_document_reports_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversations.json");
        std::fs::write(&path, "{ not json").unwrap();

        let error = JsonFileStore::new(path).load().unwrap_err();
        assert!(matches!(error, StorageError::DecodeStore { .. }));
    }
}
