//! Conversation Data Model
//!
//! Information Hiding:
//! - Wire shape of a message (lowercase roles, optional timestamp) kept in one place
//! - Timestamp formatting fixed to a sortable UTC representation
//! - Key validation and flat-key derivation hidden behind `ConversationKey`

use crate::storage::{StoreError, StoreResult};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single chat message.
///
/// `timestamp` is attached by the store when the message is appended; callers
/// normally leave it empty. Any additional fields found in persisted data are
/// carried in `extra` so they survive a read/write cycle.
///
/// Timestamps are kept as instants, not as the text they were read from: any
/// RFC 3339 offset form (`+00:00`) is written back in the `Z` form, and an
/// explicit `"timestamp": null` is dropped on the next write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "timestamp_format"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: None,
            extra: Map::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Replace any caller-supplied timestamp with the current time.
    pub(crate) fn stamped(self) -> Self {
        self.with_timestamp(now())
    }
}

/// Current UTC time at the precision timestamps are persisted with.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339 form (`2024-01-01T00:00:00.000000Z`), so string order is time order.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

mod timestamp_format {
    use super::format_timestamp;
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(timestamp) => serializer.serialize_some(&format_timestamp(timestamp)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|value| {
            DateTime::parse_from_rfc3339(&value)
                .map(|parsed| parsed.with_timezone(&Utc))
                .map_err(de::Error::custom)
        })
        .transpose()
    }
}

/// Identifies one conversation: a thread belonging to a user.
///
/// The flat form `"{user_id}_{thread_name}"` is used as the flat-file index key
/// and the document `_id`. It is not injective: `("a_b", "c")` and `("a", "b_c")`
/// share the flat key `a_b_c`. Backends document how they behave in that case.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    user_id: String,
    thread_name: String,
}

impl ConversationKey {
    pub const SEPARATOR: char = '_';

    /// Longest `user_id` or `thread_name` in bytes. Two parts plus the separator
    /// and the `.json.tmp` suffix stay under the common 255-byte file name limit.
    pub const MAX_PART_LEN: usize = 120;

    pub fn new(user_id: impl Into<String>, thread_name: impl Into<String>) -> StoreResult<Self> {
        let user_id = user_id.into();
        let thread_name = thread_name.into();
        validate_part("user_id", &user_id)?;
        validate_part("thread_name", &thread_name)?;
        Ok(Self {
            user_id,
            thread_name,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub fn flat(&self) -> String {
        format!("{}{}{}", self.user_id, Self::SEPARATOR, self.thread_name)
    }

    /// Prefix shared by the flat keys of every thread of `user_id`.
    pub fn user_prefix(user_id: &str) -> String {
        format!("{}{}", user_id, Self::SEPARATOR)
    }

    pub fn validate_user_id(user_id: &str) -> StoreResult<()> {
        validate_part("user_id", user_id)
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.thread_name)
    }
}

// Key parts end up in file names, so anything that could leave the storage
// directory is rejected.
fn validate_part(field: &str, value: &str) -> StoreResult<()> {
    if value.is_empty() {
        return Err(StoreError::InvalidKey(format!("{} must not be empty", field)));
    }
    if value == "." || value == ".." {
        return Err(StoreError::InvalidKey(format!(
            "{} must not be '{}'",
            field, value
        )));
    }
    if value.len() > ConversationKey::MAX_PART_LEN {
        return Err(StoreError::InvalidKey(format!(
            "{} is {} bytes long, the limit is {}",
            field,
            value.len(),
            ConversationKey::MAX_PART_LEN
        )));
    }
    if value.contains(['/', '\\', '\0']) {
        return Err(StoreError::InvalidKey(format!(
            "{} '{}' contains a path separator or NUL",
            field, value
        )));
    }
    Ok(())
}

/// Whether a write created the conversation or changed an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Updated,
}

impl WriteOutcome {
    pub fn created(&self) -> bool {
        matches!(self, WriteOutcome::Created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_wire_shape_without_timestamp() {
        let value = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(value, json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn test_message_timestamp_is_fixed_width_utc() {
        let ts = DateTime::parse_from_rfc3339("2024-03-01T10:20:30Z")
            .unwrap()
            .with_timezone(&Utc);
        let value = serde_json::to_value(Message::assistant("hello").with_timestamp(ts)).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["timestamp"], "2024-03-01T10:20:30.000000Z");
    }

    #[test]
    fn test_message_preserves_unknown_fields() {
        let raw = json!({"role": "system", "content": "be brief", "model": "mock", "tokens": 3});
        let message: Message = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(message.role, Role::System);
        assert_eq!(message.extra.get("model"), Some(&json!("mock")));
        assert_eq!(serde_json::to_value(&message).unwrap(), raw);
    }

    #[test]
    fn test_loaded_timestamp_text_is_normalised() {
        let raw = json!({"role": "user", "content": "hi", "timestamp": "2024-01-01T00:00:00.123456+00:00"});
        let message: Message = serde_json::from_value(raw).unwrap();
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["timestamp"], "2024-01-01T00:00:00.123456Z");

        let raw = json!({"role": "user", "content": "hi", "timestamp": null});
        let message: Message = serde_json::from_value(raw).unwrap();
        assert!(message.timestamp.is_none());
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"role": "user", "content": "hi"})
        );
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let raw = json!({"role": "robot", "content": "beep"});
        assert!(serde_json::from_value::<Message>(raw).is_err());
    }

    #[test]
    fn test_now_round_trips_through_json() {
        let message = Message::user("x").stamped();
        let text = serde_json::to_string(&message).unwrap();
        let back: Message = serde_json::from_str(&text).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn test_flat_key_and_prefix() {
        let key = ConversationKey::new("alice", "trip").unwrap();
        assert_eq!(key.flat(), "alice_trip");
        assert!(key.flat().starts_with(&ConversationKey::user_prefix("alice")));
        assert!(!key.flat().starts_with(&ConversationKey::user_prefix("alicia")));
    }

    #[test]
    fn test_flat_key_collision_is_possible() {
        let a = ConversationKey::new("a_b", "c").unwrap();
        let b = ConversationKey::new("a", "b_c").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.flat(), b.flat());
    }

    #[test]
    fn test_invalid_keys_are_rejected() {
        assert!(matches!(
            ConversationKey::new("", "trip"),
            Err(StoreError::InvalidKey(_))
        ));
        assert!(ConversationKey::new("alice", "..").is_err());
        assert!(ConversationKey::new("alice", "../escape").is_err());
        assert!(ConversationKey::new("al\\ice", "trip").is_err());
        assert!(ConversationKey::validate_user_id("alice").is_ok());
    }

    #[test]
    fn test_overlong_parts_are_rejected() {
        let longest = "t".repeat(ConversationKey::MAX_PART_LEN);
        let key = ConversationKey::new(longest.as_str(), longest.as_str()).unwrap();
        assert!(format!("{}.json.tmp", key.flat()).len() <= 255);

        let too_long = "t".repeat(ConversationKey::MAX_PART_LEN + 1);
        assert!(matches!(
            ConversationKey::new("alice", too_long.as_str()),
            Err(StoreError::InvalidKey(_))
        ));
        assert!(ConversationKey::validate_user_id(&too_long).is_err());
    }
}
