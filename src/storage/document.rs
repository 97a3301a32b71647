//! MongoDB Conversation Storage
//!
//! Information Hiding:
//! - Document shape, update operators and index definitions hidden behind the trait
//! - Driver errors translated to `StoreError` kinds
//! - Client lifecycle owned by the store and released through `close`
//!
//! One document per conversation in the `conversations` collection:
//! `{ _id, user_id, thread_name, messages, created_at, updated_at }`, with `_id`
//! derived as `"{user_id}_{thread_name}"`. Writes filter on all three identity
//! fields, so two distinct pairs that derive the same `_id` collide on the
//! primary key and the second writer gets `StoreError::Conflict`.

use super::{ConversationStore, StoreError, StoreResult};
use crate::core::message::{format_timestamp, now, ConversationKey, Message, WriteOutcome};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Collection, IndexModel};
use std::collections::BTreeSet;
use std::time::Duration;

pub const COLLECTION: &str = "conversations";

const BAD_VALUE: i32 = 2;
const TYPE_MISMATCH: i32 = 14;
const DUPLICATE_KEY: i32 = 11000;

/// Conversation store backed by a MongoDB collection
pub struct DocumentStore {
    client: Client,
    conversations: Collection<Document>,
}

impl DocumentStore {
    /// Connect, select `database` and make sure the collection indexes exist.
    ///
    /// `timeout` bounds connection setup and server selection; when it elapses the
    /// operation fails with `StorageUnavailable`.
    pub async fn connect(uri: &str, database: &str, timeout: Duration) -> StoreResult<Self> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| map_driver_error("failed to parse connection string", e))?;
        options.app_name = Some("chai".to_string());
        options.connect_timeout = Some(timeout);
        options.server_selection_timeout = Some(timeout);

        let client = Client::with_options(options)
            .map_err(|e| map_driver_error("failed to create client", e))?;
        let conversations = client.database(database).collection::<Document>(COLLECTION);

        let store = Self {
            client,
            conversations,
        };
        store.ensure_indexes().await?;

        tracing::info!(
            "[DocumentStore] Connected to database '{}' collection '{}'",
            database,
            COLLECTION
        );
        Ok(store)
    }

    /// Unique (user_id, thread_name) plus user_id for listing. Idempotent.
    async fn ensure_indexes(&self) -> StoreResult<()> {
        let unique_key = IndexModel::builder()
            .keys(doc! { "user_id": 1, "thread_name": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        let by_user = IndexModel::builder().keys(doc! { "user_id": 1 }).build();

        self.conversations
            .create_indexes([unique_key, by_user])
            .await
            .map_err(|e| map_driver_error("failed to create indexes", e))?;
        Ok(())
    }

    async fn upsert(
        &self,
        key: &ConversationKey,
        update: Document,
        operation: &str,
    ) -> StoreResult<WriteOutcome> {
        let result = self
            .conversations
            .update_one(identity_filter(key), update)
            .upsert(true)
            .await
            .map_err(|e| match server_code(&e).and_then(classify_rejection) {
                Some(Rejection::DuplicateKey) => StoreError::Conflict { key: key.flat() },
                // e.g. `$push` onto a `messages` field that is not an array
                Some(Rejection::MalformedDocument) => {
                    StoreError::corruption(format!("{}/{}", COLLECTION, key.flat()), e)
                }
                None => map_driver_error(format!("failed to {} '{}'", operation, key), e),
            })?;

        Ok(match result.upserted_id {
            Some(_) => WriteOutcome::Created,
            None => WriteOutcome::Updated,
        })
    }
}

fn identity_filter(key: &ConversationKey) -> Document {
    doc! {
        "_id": key.flat(),
        "user_id": key.user_id(),
        "thread_name": key.thread_name(),
    }
}

fn encode_message(message: &Message) -> StoreResult<Bson> {
    bson::to_bson(message).map_err(|e| StoreError::Encoding(e.to_string()))
}

/// Whole-document replacement; `created_at` is only written on insert.
fn save_update(key: &ConversationKey, messages: &[Message], timestamp: &str) -> StoreResult<Document> {
    let messages = messages
        .iter()
        .map(encode_message)
        .collect::<StoreResult<Vec<Bson>>>()?;

    Ok(doc! {
        "$set": {
            "user_id": key.user_id(),
            "thread_name": key.thread_name(),
            "messages": messages,
            "updated_at": timestamp,
        },
        "$setOnInsert": { "created_at": timestamp },
    })
}

/// Single atomic push. `_id` comes from the filter on the insert path.
fn append_update(key: &ConversationKey, message: &Message, timestamp: &str) -> StoreResult<Document> {
    let message = encode_message(message)?;
    Ok(doc! {
        "$push": { "messages": message },
        "$set": { "updated_at": timestamp },
        "$setOnInsert": {
            "user_id": key.user_id(),
            "thread_name": key.thread_name(),
            "created_at": timestamp,
        },
    })
}

/// Decode the `messages` array of a conversation document.
/// A missing or non-array field is an empty conversation.
fn decode_messages(document: &Document) -> StoreResult<Vec<Message>> {
    let Ok(raw) = document.get_array("messages") else {
        return Ok(Vec::new());
    };

    raw.iter()
        .map(|item| bson::from_bson::<Message>(item.clone()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            let id = document.get_str("_id").unwrap_or("<unknown>");
            StoreError::corruption(format!("{}/{}", COLLECTION, id), e)
        })
}

/// Server-side reasons a write was refused that are not connectivity problems
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    DuplicateKey,
    MalformedDocument,
}

fn server_code(error: &mongodb::error::Error) -> Option<i32> {
    match error.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => Some(e.code),
        ErrorKind::Command(e) => Some(e.code),
        _ => None,
    }
}

fn classify_rejection(code: i32) -> Option<Rejection> {
    match code {
        DUPLICATE_KEY => Some(Rejection::DuplicateKey),
        BAD_VALUE | TYPE_MISMATCH => Some(Rejection::MalformedDocument),
        _ => None,
    }
}

fn map_driver_error(context: impl Into<String>, error: mongodb::error::Error) -> StoreError {
    StoreError::unavailable(context, error)
}

#[async_trait]
impl ConversationStore for DocumentStore {
    async fn get_conversation(&self, user_id: &str, thread_name: &str) -> StoreResult<Vec<Message>> {
        let key = ConversationKey::new(user_id, thread_name)?;
        let document = self
            .conversations
            .find_one(doc! { "user_id": key.user_id(), "thread_name": key.thread_name() })
            .await
            .map_err(|e| map_driver_error(format!("failed to load '{}'", key), e))?;

        let Some(document) = document else {
            tracing::debug!("[DocumentStore] Conversation '{}' does not exist", key);
            return Ok(Vec::new());
        };

        match decode_messages(&document) {
            Ok(messages) => {
                tracing::debug!(
                    "[DocumentStore] Loaded {} messages for '{}'",
                    messages.len(),
                    key
                );
                Ok(messages)
            }
            Err(e) => {
                tracing::warn!("[DocumentStore] Reading '{}' as empty: {}", key, e);
                Ok(Vec::new())
            }
        }
    }

    async fn save_conversation(
        &self,
        user_id: &str,
        thread_name: &str,
        messages: &[Message],
    ) -> StoreResult<WriteOutcome> {
        let key = ConversationKey::new(user_id, thread_name)?;
        let update = save_update(&key, messages, &format_timestamp(&now()))?;
        let outcome = self.upsert(&key, update, "save").await?;

        tracing::debug!(
            "[DocumentStore] Saved {} messages for '{}' ({:?})",
            messages.len(),
            key,
            outcome
        );
        Ok(outcome)
    }

    async fn append_message(
        &self,
        user_id: &str,
        thread_name: &str,
        message: Message,
    ) -> StoreResult<WriteOutcome> {
        let key = ConversationKey::new(user_id, thread_name)?;
        let stamped_at = now();
        let message = message.with_timestamp(stamped_at);

        let update = append_update(&key, &message, &format_timestamp(&stamped_at))?;
        let outcome = self.upsert(&key, update, "append to").await?;

        tracing::debug!("[DocumentStore] Appended message to '{}' ({:?})", key, outcome);
        Ok(outcome)
    }

    async fn list_user_threads(&self, user_id: &str) -> StoreResult<BTreeSet<String>> {
        ConversationKey::validate_user_id(user_id)?;

        let documents: Vec<Document> = self
            .conversations
            .find(doc! { "user_id": user_id })
            .projection(doc! { "thread_name": 1, "_id": 0 })
            .await
            .map_err(|e| map_driver_error(format!("failed to list threads of '{}'", user_id), e))?
            .try_collect()
            .await
            .map_err(|e| map_driver_error(format!("failed to list threads of '{}'", user_id), e))?;

        let threads: BTreeSet<String> = documents
            .iter()
            .filter_map(|document| document.get_str("thread_name").ok())
            .map(str::to_string)
            .collect();

        tracing::debug!(
            "[DocumentStore] Listed {} threads for user '{}'",
            threads.len(),
            user_id
        );
        Ok(threads)
    }

    async fn delete_conversation(&self, user_id: &str, thread_name: &str) -> StoreResult<bool> {
        let key = ConversationKey::new(user_id, thread_name)?;
        let result = self
            .conversations
            .delete_one(identity_filter(&key))
            .await
            .map_err(|e| map_driver_error(format!("failed to delete '{}'", key), e))?;

        let deleted = result.deleted_count > 0;
        tracing::debug!("[DocumentStore] Delete '{}': removed={}", key, deleted);
        Ok(deleted)
    }

    async fn exists(&self, user_id: &str, thread_name: &str) -> StoreResult<bool> {
        let key = ConversationKey::new(user_id, thread_name)?;
        let count = self
            .conversations
            .count_documents(doc! { "user_id": key.user_id(), "thread_name": key.thread_name() })
            .await
            .map_err(|e| map_driver_error(format!("failed to look up '{}'", key), e))?;
        Ok(count > 0)
    }

    async fn close(&self) -> StoreResult<()> {
        self.client.clone().shutdown().await;
        tracing::info!("[DocumentStore] Connection closed");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "mongodb"
    }
}
