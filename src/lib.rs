//! Chai - chat conversations persisted behind interchangeable storage backends
//!
//! A conversation is the ordered message history of one `(user_id, thread_name)`
//! pair. Every backend implements [`ConversationStore`]; callers pick one through
//! [`open_store`] and never depend on which is active.

pub mod cli;
pub mod config;
pub mod core;
pub mod storage;
pub mod utils;

pub use crate::config::Settings;
pub use crate::core::{ConversationKey, Message, MockResponder, Responder, Role, WriteOutcome};
pub use storage::{
    open_store, ConversationStore, DocumentStore, FlatFileStore, StoreError, StoreResult,
};
