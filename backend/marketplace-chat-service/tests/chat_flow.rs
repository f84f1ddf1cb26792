mod common;

use common::{client, manager, Harness};
use marketplace_chat_service::models::{MessageStatus, ViolationFilter, ViolationStatus, ViolationType};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn test_valid_message_is_delivered_and_read_once() -> anyhow::Result<()> {
    let h = Harness::new();
    let store_id = Uuid::new_v4();
    let ana = client("Ana");
    let tienda = manager(store_id);
    let chat = h.open_chat(&ana, store_id).await;

    let mut a = h.connect(&ana).await?;
    let mut b = h.connect(&tienda).await?;
    a.join(chat.id).await;
    b.join(chat.id).await;
    a.drain();
    b.drain();

    a.say(chat.id, "¿Tienen el filtro en stock?").await;

    let received = b.of_type("new_message");
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["message"]["status"], "sent");
    assert_eq!(received[0]["message"]["sequence"], 1);
    // the sender sees its own message once, through the room
    assert_eq!(a.of_type("new_message").len(), 1);

    let message_id: Uuid = serde_json::from_value(received[0]["message"]["id"].clone())?;
    let stored = h.store.list_messages(chat.id, 10).await?;
    assert_eq!(stored[0].status, MessageStatus::Delivered);

    b.command(json!({ "type": "mark_as_read", "chat_id": chat.id, "message_ids": [message_id] }))
        .await;
    let read = a.of_type("messages_read");
    assert_eq!(read.len(), 1);
    assert_eq!(read[0]["reader_id"], json!(tienda.user_id));

    // repeated receipts change nothing and announce nothing
    b.command(json!({ "type": "mark_as_read", "chat_id": chat.id, "message_ids": [message_id, message_id] }))
        .await;
    assert!(a.of_type("messages_read").is_empty());

    let stored = h.store.list_messages(chat.id, 10).await?;
    assert_eq!(stored[0].status, MessageStatus::Read);
    assert_eq!(stored[0].read_by.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_blocked_message_stays_with_sender() -> anyhow::Result<()> {
    let h = Harness::new();
    let store_id = Uuid::new_v4();
    let ana = client("Ana");
    let tienda = manager(store_id);
    let chat = h.open_chat(&ana, store_id).await;

    let mut a = h.connect(&ana).await?;
    let mut b = h.connect(&tienda).await?;
    a.join(chat.id).await;
    b.join(chat.id).await;
    a.drain();
    b.drain();

    a.say(chat.id, "Cel: 0414-5551212, escríbeme").await;

    let blocked = a.of_type("message_blocked");
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0]["violations"][0]["violation_type"], "phone");
    assert!(blocked[0]["blocked_content"]
        .as_array()
        .unwrap()
        .contains(&json!("0414-5551212")));
    assert!(!blocked[0]["suggestions"].as_array().unwrap().is_empty());
    assert!(b.drain().is_empty());

    // history: the sender sees it marked blocked, the store does not see it
    let own = a.join(chat.id).await;
    assert_eq!(own["messages"].as_array().unwrap().len(), 1);
    assert_eq!(own["messages"][0]["status"], "blocked");
    let theirs = b.join(chat.id).await;
    assert!(theirs["messages"].as_array().unwrap().is_empty());

    let ledger = h
        .store
        .list_violations(&ViolationFilter {
            status: Some(ViolationStatus::Pending),
            limit: 10,
            ..Default::default()
        })
        .await?;
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].violation_type, ViolationType::Phone);
    assert_eq!(ledger[0].chat_id, chat.id);

    let stored = h.store.list_messages(chat.id, 10).await?;
    assert_eq!(stored[0].original_content.as_deref(), Some("Cel: 0414-5551212, escríbeme"));
    assert!(!stored[0].content.contains("0414-5551212"));
    Ok(())
}

#[tokio::test]
async fn test_sequences_follow_persistence_order() -> anyhow::Result<()> {
    let h = Harness::new();
    let store_id = Uuid::new_v4();
    let ana = client("Ana");
    let tienda = manager(store_id);
    let chat = h.open_chat(&ana, store_id).await;

    let mut a = h.connect(&ana).await?;
    let mut b = h.connect(&tienda).await?;
    a.join(chat.id).await;
    b.join(chat.id).await;
    b.drain();

    a.say(chat.id, "Hola").await;
    a.say(chat.id, "Pago por Zelle directo").await;
    b.say(chat.id, "Buenas tardes, sí tenemos").await;

    let seen: Vec<i64> = b
        .of_type("new_message")
        .iter()
        .map(|e| e["message"]["sequence"].as_i64().unwrap())
        .collect();
    // the blocked message consumed sequence 2 but was never shown
    assert_eq!(seen, vec![1, 3]);
    Ok(())
}

#[tokio::test]
async fn test_non_participants_are_rejected() -> anyhow::Result<()> {
    let h = Harness::new();
    let store_id = Uuid::new_v4();
    let ana = client("Ana");
    let chat = h.open_chat(&ana, store_id).await;

    let mut intruder = h.connect(&client("Pedro")).await?;
    let reply = intruder.join(chat.id).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["code"], "FORBIDDEN");

    let mut other_store = h.connect(&manager(Uuid::new_v4())).await?;
    other_store.say(chat.id, "hola").await;
    let reply = other_store.next().unwrap();
    assert_eq!(reply["code"], "FORBIDDEN");
    assert_eq!(reply["command"], "send_message");

    assert!(h.store.list_messages(chat.id, 10).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_invalid_payloads_are_bad_requests() -> anyhow::Result<()> {
    let h = Harness::new();
    let ana = client("Ana");
    let chat = h.open_chat(&ana, Uuid::new_v4()).await;
    let mut a = h.connect(&ana).await?;
    a.join(chat.id).await;

    a.say(chat.id, "   ").await;
    assert_eq!(a.next().unwrap()["code"], "BAD_REQUEST");

    a.say(chat.id, &"a".repeat(2001)).await;
    assert_eq!(a.next().unwrap()["code"], "BAD_REQUEST");

    a.command(json!({
        "type": "send_message",
        "chat_id": chat.id,
        "content": "hola",
        "message_type": "system",
    }))
    .await;
    assert_eq!(a.next().unwrap()["code"], "BAD_REQUEST");

    a.conn.handle_text("{not json").await;
    assert_eq!(a.next().unwrap()["code"], "BAD_REQUEST");

    assert!(h.store.list_messages(chat.id, 10).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_typing_reaches_the_other_side_only() -> anyhow::Result<()> {
    let h = Harness::new();
    let store_id = Uuid::new_v4();
    let ana = client("Ana");
    let tienda = manager(store_id);
    let chat = h.open_chat(&ana, store_id).await;

    let mut a = h.connect(&ana).await?;
    let mut b = h.connect(&tienda).await?;
    a.join(chat.id).await;
    b.join(chat.id).await;
    a.drain();
    b.drain();

    a.command(json!({ "type": "typing", "chat_id": chat.id, "is_typing": true }))
        .await;
    let typing = b.of_type("user_typing");
    assert_eq!(typing.len(), 1);
    assert_eq!(typing[0]["is_typing"], true);
    assert_eq!(typing[0]["user_name"], "Ana");
    assert!(a.drain().is_empty());

    // leaving the room stops the indicator
    a.command(json!({ "type": "leave_chat", "chat_id": chat.id })).await;
    let typing = b.of_type("user_typing");
    assert_eq!(typing.len(), 1);
    assert_eq!(typing[0]["is_typing"], false);

    a.command(json!({ "type": "typing", "chat_id": chat.id, "is_typing": true }))
        .await;
    assert_eq!(a.next().unwrap()["code"], "FORBIDDEN");
    Ok(())
}

#[tokio::test]
async fn test_store_stats() -> anyhow::Result<()> {
    let h = Harness::new();
    let store_id = Uuid::new_v4();
    let ana = client("Ana");
    let tienda = manager(store_id);
    let chat = h.open_chat(&ana, store_id).await;
    h.open_chat(&client("Luis"), store_id).await;

    h.app.pipeline.send(&ana, chat.id, "Hola, ¿precio?", Default::default()).await?;
    h.app.pipeline.send(&ana, chat.id, "Cel: 0414-5551212", Default::default()).await?;
    h.app.pipeline.send(&tienda, chat.id, "Son 20 dólares", Default::default()).await?;

    let stats = h.app.channels.store_stats(&tienda, store_id).await?;
    assert_eq!(stats.total, 2);
    assert_eq!(stats.active, 2);
    assert_eq!(stats.unread, 1);
    assert_eq!(stats.violations_today, 1);
    assert!(stats.avg_response_time.is_some());

    let outsider = manager(Uuid::new_v4());
    assert!(h.app.channels.store_stats(&outsider, store_id).await.is_err());
    Ok(())
}
