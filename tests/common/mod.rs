//! Behaviour every `ConversationStore` backend must share.
//!
//! Each check takes a namespace that is prefixed to user ids, so runs against a
//! shared database don't see each other's data, and removes what it wrote.

#![allow(dead_code)]

use chai::{ConversationStore, Message, WriteOutcome};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::json;

pub async fn unknown_conversation_reads_empty(store: &dyn ConversationStore, ns: &str) {
    let user = format!("{ns}nobody");
    assert!(store.get_conversation(&user, "nothing").await.unwrap().is_empty());
    assert!(!store.exists(&user, "nothing").await.unwrap());
    assert!(store.list_user_threads(&user).await.unwrap().is_empty());
}

pub async fn save_then_get_returns_exact_sequence(store: &dyn ConversationStore, ns: &str) {
    let user = format!("{ns}sam");
    let mut tagged = Message::assistant("hello there");
    tagged.extra.insert("model".to_string(), json!("mock"));
    let messages = vec![
        Message::system("be brief"),
        Message::user("hi"),
        tagged,
        Message::user("bye").with_timestamp(chai::core::message::now()),
    ];

    let outcome = store.save_conversation(&user, "greeting", &messages).await.unwrap();
    assert_eq!(outcome, WriteOutcome::Created);
    assert_eq!(store.get_conversation(&user, "greeting").await.unwrap(), messages);

    let replacement = vec![Message::user("start over")];
    let outcome = store.save_conversation(&user, "greeting", &replacement).await.unwrap();
    assert_eq!(outcome, WriteOutcome::Updated);
    assert_eq!(store.get_conversation(&user, "greeting").await.unwrap(), replacement);

    assert!(store.delete_conversation(&user, "greeting").await.unwrap());
}

pub async fn append_extends_and_stamps(store: &dyn ConversationStore, ns: &str) {
    let user = format!("{ns}alice");
    store
        .save_conversation(&user, "trip", &[Message::user("hi")])
        .await
        .unwrap();

    let outcome = store
        .append_message(&user, "trip", Message::assistant("hello"))
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Updated);

    let messages = store.get_conversation(&user, "trip").await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0], Message::user("hi"));
    assert_eq!(messages[1].content, "hello");
    assert_eq!(messages[1].role, chai::Role::Assistant);
    assert!(messages[1].timestamp.is_some());

    assert!(store.delete_conversation(&user, "trip").await.unwrap());
}

pub async fn append_creates_missing_conversation(store: &dyn ConversationStore, ns: &str) {
    let user = format!("{ns}new");
    let outcome = store
        .append_message(&user, "fresh", Message::user("first"))
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Created);
    assert!(store.exists(&user, "fresh").await.unwrap());

    let messages = store.get_conversation(&user, "fresh").await.unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].timestamp.is_some());

    assert!(store.delete_conversation(&user, "fresh").await.unwrap());
}

pub async fn threads_are_listed_per_user(store: &dyn ConversationStore, ns: &str) {
    let alice = format!("{ns}alice");
    let alicia = format!("{ns}alicia");
    let msg = [Message::user("x")];

    store.save_conversation(&alice, "trip", &msg).await.unwrap();
    store.save_conversation(&alice, "work", &msg).await.unwrap();
    store
        .append_message(&alicia, "trip", Message::user("y"))
        .await
        .unwrap();

    let threads: Vec<String> = store.list_user_threads(&alice).await.unwrap().into_iter().collect();
    assert_eq!(threads, vec!["trip".to_string(), "work".to_string()]);
    let threads: Vec<String> = store.list_user_threads(&alicia).await.unwrap().into_iter().collect();
    assert_eq!(threads, vec!["trip".to_string()]);

    for (user, thread) in [(&alice, "trip"), (&alice, "work"), (&alicia, "trip")] {
        assert!(store.delete_conversation(user, thread).await.unwrap());
    }
}

pub async fn delete_is_idempotent(store: &dyn ConversationStore, ns: &str) {
    let user = format!("{ns}dana");
    store
        .save_conversation(&user, "temp", &[Message::user("x")])
        .await
        .unwrap();

    assert!(store.delete_conversation(&user, "temp").await.unwrap());
    assert!(!store.delete_conversation(&user, "temp").await.unwrap());
    assert!(!store.delete_conversation(&user, "temp").await.unwrap());
    assert!(store.get_conversation(&user, "temp").await.unwrap().is_empty());
    assert!(store.list_user_threads(&user).await.unwrap().is_empty());
}

pub async fn concurrent_appends_are_not_lost(store: &dyn ConversationStore, ns: &str) {
    let user = format!("{ns}busy");
    let user = user.as_str();
    let threads = ["a", "b", "c"];

    // Created up front: racing first writes may legitimately end in a conflict.
    for thread in threads {
        store.save_conversation(user, thread, &[]).await.unwrap();
    }

    let appends = threads.iter().flat_map(|thread| {
        (0..5).map(move |i| store.append_message(user, thread, Message::user(format!("{thread}-{i}"))))
    });
    for result in join_all(appends).await {
        result.unwrap();
    }

    for thread in threads {
        let messages = store.get_conversation(user, thread).await.unwrap();
        assert_eq!(messages.len(), 5, "thread {thread}");
        assert!(messages.iter().all(|m| m.content.starts_with(thread)));
        assert!(store.delete_conversation(user, thread).await.unwrap());
    }
}

pub async fn invalid_keys_are_rejected(store: &dyn ConversationStore, ns: &str) {
    let user = format!("{ns}eve");
    let err = store
        .append_message(&user, "", Message::user("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, chai::StoreError::InvalidKey(_)));
    assert!(store.get_conversation("", "t").await.is_err());
}

pub async fn append_replaces_caller_timestamp(store: &dyn ConversationStore, ns: &str) {
    let user = format!("{ns}tess");
    let stale = DateTime::parse_from_rfc3339("2000-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let before = chai::core::message::now();

    store
        .append_message(&user, "clock", Message::user("late").with_timestamp(stale))
        .await
        .unwrap();

    let messages = store.get_conversation(&user, "clock").await.unwrap();
    let stored = messages[0].timestamp.expect("append stamps a timestamp");
    assert_ne!(stored, stale);
    assert!(stored >= before, "{stored} is earlier than {before}");

    assert!(store.delete_conversation(&user, "clock").await.unwrap());
}

pub async fn empty_saved_conversation_exists(store: &dyn ConversationStore, ns: &str) {
    let user = format!("{ns}quiet");
    let outcome = store.save_conversation(&user, "blank", &[]).await.unwrap();
    assert_eq!(outcome, WriteOutcome::Created);

    assert!(store.exists(&user, "blank").await.unwrap());
    assert!(store.get_conversation(&user, "blank").await.unwrap().is_empty());
    let threads: Vec<String> = store.list_user_threads(&user).await.unwrap().into_iter().collect();
    assert_eq!(threads, vec!["blank".to_string()]);

    assert!(store.delete_conversation(&user, "blank").await.unwrap());
    assert!(!store.exists(&user, "blank").await.unwrap());
}
