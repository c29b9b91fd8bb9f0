mod common;

use chatmirror_core::{
    models::{MessageStatus, MessageType},
    SyncError,
};
use chatmirror_server::ingestion::FetchOptions;
use chrono::DateTime;
use common::*;
use std::sync::atomic::Ordering;

const T: i64 = 1_700_000_000;
const CHAT: &str = "15550001@c.us";

fn history(count: usize) -> Vec<chatmirror_core::RemoteMessage> {
    (0..count)
        .map(|i| {
            remote_message(
                &format!("M-{i}"),
                "15550001",
                i % 2 == 1,
                &format!("message {i}"),
                T + i as i64,
            )
        })
        .collect()
}

#[tokio::test]
async fn test_fetch_maps_both_directions() {
    let (engine, _factory) = setup_engine().await;
    let driver = FakeDriver::with_chats(vec![remote_chat("15550001", T, 0)]);
    driver.set_history(CHAT, history(4));
    let session_id = connected_session(&engine, driver).await;

    let messages = engine
        .fetch_messages(session_id, "+1 555 0001", &FetchOptions::default())
        .await
        .unwrap();

    assert_eq!(messages.len(), 4);
    assert_eq!(messages.iter().filter(|m| m.from_me).count(), 2);
    let inbound = &messages[0];
    assert_eq!(inbound.status, MessageStatus::Delivered);
    assert_eq!(inbound.counterpart(), "15550001");
    assert_eq!(inbound.timestamp, DateTime::from_timestamp(T, 0).unwrap());
    assert_eq!(messages[1].status, MessageStatus::Sent);
}

#[tokio::test]
async fn test_fetch_filters_locally() {
    let (engine, _factory) = setup_engine().await;
    let driver = FakeDriver::with_chats(vec![remote_chat("15550001", T, 0)]);
    let mut messages = history(6);
    messages[5].kind = "image".into();
    messages[5].body = String::new();
    messages[2].body = "Lunch TOMORROW?".into();
    driver.set_history(CHAT, messages);
    let session_id = connected_session(&engine, driver).await;

    let by_date = FetchOptions {
        from_date: DateTime::from_timestamp(T + 1, 0),
        to_date: DateTime::from_timestamp(T + 3, 0),
        ..FetchOptions::default()
    };
    let ids: Vec<_> = engine
        .fetch_messages(session_id, CHAT, &by_date)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, vec!["M-1", "M-2", "M-3"]);

    let images = FetchOptions {
        message_type: Some(MessageType::Image),
        ..FetchOptions::default()
    };
    let found = engine.fetch_messages(session_id, CHAT, &images).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].preview(), "[image]");

    let search = FetchOptions {
        search_text: Some("tomorrow".into()),
        ..FetchOptions::default()
    };
    let found = engine.fetch_messages(session_id, CHAT, &search).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, "M-2");
}

#[tokio::test]
async fn test_fetch_limit_is_capped() {
    let (engine, _factory) = setup_engine().await;
    let driver = FakeDriver::with_chats(vec![remote_chat("15550001", T, 0)]);
    driver.set_history(CHAT, history(150));
    let session_id = connected_session(&engine, driver).await;

    let defaulted = engine
        .fetch_messages(session_id, CHAT, &FetchOptions::default())
        .await
        .unwrap();
    assert_eq!(defaulted.len(), engine.config.default_fetch_limit);

    let capped = engine
        .fetch_messages(session_id, CHAT, &FetchOptions::with_limit(500))
        .await
        .unwrap();
    assert_eq!(capped.len(), engine.config.max_fetch_limit);
}

#[tokio::test]
async fn test_fetch_returns_empty_when_unavailable() {
    let (engine, _factory) = setup_engine().await;
    let session = engine.sessions.create_session().await.unwrap();

    // No driver handle.
    let none = engine
        .fetch_messages(session.id, CHAT, &FetchOptions::default())
        .await
        .unwrap();
    assert!(none.is_empty());

    // Unknown chat.
    let driver = FakeDriver::with_chats(vec![remote_chat("15550001", T, 0)]);
    engine.registry.register(session.id, driver.clone()).unwrap();
    let unknown = engine
        .fetch_messages(session.id, "15550404", &FetchOptions::default())
        .await
        .unwrap();
    assert!(unknown.is_empty());
    assert_eq!(driver.fetch_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_malformed_chat_id_is_rejected() {
    let (engine, _factory) = setup_engine().await;
    let session_id = connected_session(&engine, FakeDriver::new()).await;

    let err = engine
        .fetch_messages(session_id, "not a phone", &FetchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
}

#[tokio::test]
async fn test_repeated_fetch_stores_each_message_once() {
    let (engine, _factory) = setup_engine().await;
    let driver = FakeDriver::with_chats(vec![remote_chat("15550001", T, 0)]);
    driver.set_history(CHAT, history(5));
    let session_id = connected_session(&engine, driver).await;

    for _ in 0..2 {
        engine
            .fetch_messages(session_id, CHAT, &FetchOptions::default())
            .await
            .unwrap();
    }

    let stored = engine
        .repos
        .messages
        .find_by_conversation(session_id, "15550001", 100)
        .await
        .unwrap();
    assert_eq!(stored.len(), 5);
}

#[tokio::test]
async fn test_load_more_escalates_limit() {
    let (engine, _factory) = setup_engine().await;
    let driver = FakeDriver::with_chats(vec![remote_chat("15550001", T, 0)]);
    driver.set_history(CHAT, history(30));
    let session_id = connected_session(&engine, driver).await;

    let more = engine
        .load_more_messages(session_id, CHAT, 10, 10)
        .await
        .unwrap();
    assert_eq!(more.limit, 20);
    assert_eq!(more.messages.len(), 20);
    assert!(more.has_more);

    let rest = engine
        .load_more_messages(session_id, CHAT, 20, 20)
        .await
        .unwrap();
    assert_eq!(rest.limit, 40);
    assert_eq!(rest.messages.len(), 30);
    assert!(!rest.has_more);
}

#[tokio::test]
async fn test_load_more_respects_cap() {
    let (engine, _factory) = setup_engine().await;
    let driver = FakeDriver::with_chats(vec![remote_chat("15550001", T, 0)]);
    driver.set_history(CHAT, history(150));
    let session_id = connected_session(&engine, driver).await;

    let more = engine
        .load_more_messages(session_id, CHAT, 90, 50)
        .await
        .unwrap();
    assert_eq!(more.limit, 100);
    assert_eq!(more.messages.len(), 100);
    assert!(more.has_more);
}

#[tokio::test]
async fn test_refetch_advances_delivery_status() {
    let (engine, _factory) = setup_engine().await;
    let driver = FakeDriver::with_chats(vec![remote_chat("15550001", T, 0)]);
    let mut outbound = remote_message("OUT-9", "15550001", true, "see you", T);
    driver.set_history(CHAT, vec![outbound.clone()]);
    let session_id = connected_session(&engine, driver.clone()).await;

    engine
        .fetch_messages(session_id, CHAT, &FetchOptions::default())
        .await
        .unwrap();

    outbound.ack = Some(3);
    driver.set_history(CHAT, vec![outbound]);
    engine
        .fetch_messages(session_id, CHAT, &FetchOptions::default())
        .await
        .unwrap();

    let stored = engine
        .repos
        .messages
        .find_by_id(session_id, "OUT-9")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, MessageStatus::Read);
}
