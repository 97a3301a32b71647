//! Conversation Storage Abstraction
//!
//! Information Hiding:
//! - Storage backend implementation details hidden behind trait
//! - Callers hold `Arc<dyn ConversationStore>` and never branch on the backend
//! - Each backend encapsulates its own layout, indexing and concurrency control

use crate::config::{BackendKind, StorageConfig};
use crate::core::message::{Message, WriteOutcome};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

pub mod document;
pub mod error;
pub mod flat_file;

pub use document::DocumentStore;
pub use error::{StoreError, StoreResult};
pub use flat_file::FlatFileStore;

/// Persistence contract shared by every backend.
///
/// Conversations are addressed by `(user_id, thread_name)`. Reads are total:
/// an unknown or unreadable conversation comes back empty rather than as an error.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Load the ordered messages of a conversation.
    /// Returns an empty vector if the conversation doesn't exist.
    async fn get_conversation(&self, user_id: &str, thread_name: &str) -> StoreResult<Vec<Message>>;

    /// Replace the whole message sequence, creating the conversation if needed
    async fn save_conversation(
        &self,
        user_id: &str,
        thread_name: &str,
        messages: &[Message],
    ) -> StoreResult<WriteOutcome>;

    /// Append one message, stamping it with the current time.
    /// Any timestamp already set on `message` is replaced.
    async fn append_message(
        &self,
        user_id: &str,
        thread_name: &str,
        message: Message,
    ) -> StoreResult<WriteOutcome>;

    /// Thread names known for a user
    async fn list_user_threads(&self, user_id: &str) -> StoreResult<BTreeSet<String>>;

    /// Remove a conversation. Returns `false` if there was nothing to delete.
    async fn delete_conversation(&self, user_id: &str, thread_name: &str) -> StoreResult<bool>;

    /// Check if a conversation record exists (an empty saved conversation counts)
    async fn exists(&self, user_id: &str, thread_name: &str) -> StoreResult<bool>;

    /// Release backend resources
    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str;
}

/// Open the backend selected by configuration
pub async fn open_store(config: &StorageConfig) -> StoreResult<Arc<dyn ConversationStore>> {
    let store: Arc<dyn ConversationStore> = match config.backend {
        BackendKind::FlatFile => Arc::new(FlatFileStore::open(&config.flat_file.storage_dir).await?),
        BackendKind::Document => Arc::new(
            DocumentStore::connect(
                &config.document.uri,
                &config.document.database,
                Duration::from_millis(config.document.timeout_ms),
            )
            .await?,
        ),
    };

    tracing::info!("Opened {} conversation store", store.backend_name());
    Ok(store)
}
