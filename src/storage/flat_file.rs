//! Flat-File Conversation Storage
//!
//! Information Hiding:
//! - Index file format and per-conversation file naming hidden from users
//! - Temp-file-and-rename writes hidden behind the storage trait
//! - The in-memory index is owned by one instance and guarded internally
//!
//! Layout under `storage_dir`:
//! - `conversations.json`: JSON object mapping `"{user_id}_{thread_name}"` to a
//!   path relative to `storage_dir`
//! - one JSON array of messages per conversation, `"{user_id}_{thread_name}.json"`
//!
//! The index is the source of truth. A conversation file is written before the
//! index is persisted, so a crash in between leaves a file the index does not
//! know about yet; that window is not repaired automatically. Pointing two
//! instances at the same directory is unsupported.
//!
//! Thread listing is a prefix scan on `"{user_id}_"`. When ids themselves contain
//! `_`, threads of user `alice_b` also show up for user `alice`, and the pairs
//! `("a_b", "c")` and `("a", "b_c")` share one conversation file. Key parts are
//! capped at `ConversationKey::MAX_PART_LEN` bytes so file names stay valid.

use super::{ConversationStore, StoreError, StoreResult};
use crate::core::message::{ConversationKey, Message, WriteOutcome};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

pub const INDEX_FILE: &str = "conversations.json";

type Index = BTreeMap<String, String>;

/// Directory of JSON files plus a JSON index
pub struct FlatFileStore {
    storage_dir: PathBuf,
    index: Mutex<Index>,
}

impl FlatFileStore {
    /// Create the storage directory if needed and load (or initialise) the index.
    ///
    /// An index file that fails to parse is reported as `DataCorruption` and left
    /// untouched on disk.
    pub async fn open(storage_dir: impl AsRef<Path>) -> StoreResult<Self> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        fs::create_dir_all(&storage_dir).await.map_err(|e| {
            StoreError::unavailable(
                format!("failed to create storage directory {:?}", storage_dir),
                e,
            )
        })?;

        let index_path = storage_dir.join(INDEX_FILE);
        let (index, fresh) = match fs::read_to_string(&index_path).await {
            Ok(json) => {
                let index: Index = serde_json::from_str(&json)
                    .map_err(|e| StoreError::corruption(index_path.display().to_string(), e))?;
                (index, false)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => (Index::new(), true),
            Err(e) => {
                return Err(StoreError::unavailable(
                    format!("failed to read index {:?}", index_path),
                    e,
                ))
            }
        };

        let store = Self {
            storage_dir,
            index: Mutex::new(index),
        };

        if fresh {
            let index = store.index.lock().await;
            store.persist_index(&index).await?;
            tracing::debug!("[FlatFileStore] Initialised empty index at {:?}", index_path);
        }

        tracing::info!(
            "[FlatFileStore] Opened {:?} with {} conversations",
            store.storage_dir,
            store.index.lock().await.len()
        );
        Ok(store)
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    fn index_path(&self) -> PathBuf {
        self.storage_dir.join(INDEX_FILE)
    }

    fn conversation_file_name(key: &ConversationKey) -> String {
        format!("{}.json", key.flat())
    }

    async fn persist_index(&self, index: &Index) -> StoreResult<()> {
        let json = serde_json::to_string_pretty(index)
            .map_err(|e| StoreError::Encoding(e.to_string()))?;
        write_atomic(&self.index_path(), json.as_bytes()).await
    }

    /// Read a conversation file. A missing file is an empty conversation.
    async fn read_messages(&self, relative_path: &str) -> StoreResult<Vec<Message>> {
        let path = self.storage_dir.join(relative_path);
        let json = match fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("[FlatFileStore] Indexed file {:?} is missing", path);
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(StoreError::unavailable(
                    format!("failed to read conversation file {:?}", path),
                    e,
                ))
            }
        };

        serde_json::from_str(&json).map_err(|e| StoreError::corruption(path.display().to_string(), e))
    }

    /// Write the full sequence and record the key in the index.
    /// Must be called with the index lock held.
    async fn write_conversation(
        &self,
        index: &mut Index,
        key: &ConversationKey,
        messages: &[Message],
    ) -> StoreResult<WriteOutcome> {
        let flat = key.flat();
        let (relative_path, outcome) = match index.get(&flat) {
            Some(existing) => (existing.clone(), WriteOutcome::Updated),
            None => (Self::conversation_file_name(key), WriteOutcome::Created),
        };

        let json = serde_json::to_string_pretty(messages)
            .map_err(|e| StoreError::Encoding(e.to_string()))?;
        let path = self.storage_dir.join(&relative_path);
        write_atomic(&path, json.as_bytes()).await?;

        if outcome.created() {
            index.insert(flat.clone(), relative_path);
        }
        if let Err(e) = self.persist_index(index).await {
            if outcome.created() {
                index.remove(&flat);
            }
            return Err(e);
        }

        tracing::debug!(
            "[FlatFileStore] Saved {} messages for '{}' to {:?} ({:?})",
            messages.len(),
            key,
            path,
            outcome
        );
        Ok(outcome)
    }
}

/// Replace `path` by writing a sibling temp file and renaming it over the target
async fn write_atomic(path: &Path, contents: &[u8]) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| {
            StoreError::unavailable(format!("failed to create directory {:?}", parent), e)
        })?;
    }

    let mut temp_name = OsString::from(path.as_os_str());
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    fs::write(&temp_path, contents)
        .await
        .map_err(|e| StoreError::unavailable(format!("failed to write {:?}", temp_path), e))?;
    fs::rename(&temp_path, path)
        .await
        .map_err(|e| StoreError::unavailable(format!("failed to replace {:?}", path), e))
}

#[async_trait]
impl ConversationStore for FlatFileStore {
    async fn get_conversation(&self, user_id: &str, thread_name: &str) -> StoreResult<Vec<Message>> {
        let key = ConversationKey::new(user_id, thread_name)?;
        let relative_path = match self.index.lock().await.get(&key.flat()) {
            Some(path) => path.clone(),
            None => {
                tracing::debug!("[FlatFileStore] Conversation '{}' does not exist", key);
                return Ok(Vec::new());
            }
        };

        match self.read_messages(&relative_path).await {
            Ok(messages) => {
                tracing::debug!(
                    "[FlatFileStore] Loaded {} messages for '{}'",
                    messages.len(),
                    key
                );
                Ok(messages)
            }
            Err(e @ StoreError::DataCorruption { .. }) => {
                tracing::warn!("[FlatFileStore] Reading '{}' as empty: {}", key, e);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn save_conversation(
        &self,
        user_id: &str,
        thread_name: &str,
        messages: &[Message],
    ) -> StoreResult<WriteOutcome> {
        let key = ConversationKey::new(user_id, thread_name)?;
        let mut index = self.index.lock().await;
        self.write_conversation(&mut index, &key, messages).await
    }

    // Read, push, rewrite: cost grows with the conversation length.
    // A corrupted file fails the append instead of being overwritten.
    async fn append_message(
        &self,
        user_id: &str,
        thread_name: &str,
        message: Message,
    ) -> StoreResult<WriteOutcome> {
        let key = ConversationKey::new(user_id, thread_name)?;
        let message = message.stamped();

        let mut index = self.index.lock().await;
        let mut messages = match index.get(&key.flat()) {
            Some(relative_path) => self.read_messages(relative_path).await?,
            None => Vec::new(),
        };
        messages.push(message);

        self.write_conversation(&mut index, &key, &messages).await
    }

    async fn list_user_threads(&self, user_id: &str) -> StoreResult<BTreeSet<String>> {
        ConversationKey::validate_user_id(user_id)?;
        let prefix = ConversationKey::user_prefix(user_id);

        let threads: BTreeSet<String> = self
            .index
            .lock()
            .await
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter(|thread| !thread.is_empty())
            .map(str::to_string)
            .collect();

        tracing::debug!(
            "[FlatFileStore] Listed {} threads for user '{}'",
            threads.len(),
            user_id
        );
        Ok(threads)
    }

    async fn delete_conversation(&self, user_id: &str, thread_name: &str) -> StoreResult<bool> {
        let key = ConversationKey::new(user_id, thread_name)?;
        let flat = key.flat();

        let mut index = self.index.lock().await;
        let Some(relative_path) = index.remove(&flat) else {
            tracing::debug!("[FlatFileStore] Conversation '{}' does not exist, nothing to delete", key);
            return Ok(false);
        };

        if let Err(e) = self.persist_index(&index).await {
            index.insert(flat, relative_path);
            return Err(e);
        }

        // The index no longer references the file, so a leftover file is only an orphan.
        let path = self.storage_dir.join(&relative_path);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("[FlatFileStore] Failed to remove {:?}: {}", path, e),
        }

        tracing::debug!("[FlatFileStore] Deleted conversation '{}' at {:?}", key, path);
        Ok(true)
    }

    async fn exists(&self, user_id: &str, thread_name: &str) -> StoreResult<bool> {
        let key = ConversationKey::new(user_id, thread_name)?;
        Ok(self.index.lock().await.contains_key(&key.flat()))
    }

    fn backend_name(&self) -> &'static str {
        "flat-file"
    }
}
