// Storage contract tests against a temporary database: commit point
// atomicity, counters, idempotent pin inserts and the filter algebra.

use serde_json::json;
use uuid::Uuid;
use weft_common::{
    crypto::hash,
    event::{Event, EventType},
    message::{MessageState, MessageType},
    offset::{Offset, OffsetKind},
    pin::{expected_pin_hash, NextPin, Pin},
    query::{Filter, QueryParams},
    subscription::Subscription,
    time::get_current_time_in_millis,
};

use crate::core::{
    assembler::new_message,
    storage::{
        CommitPointProvider, EventProvider, MessageProvider, NextPinProvider, OffsetProvider,
        PinProvider, SledStorage, SubscriptionProvider,
    },
};

fn temp_storage() -> SledStorage {
    SledStorage::temporary().expect("temporary storage")
}

fn sample_event(namespace: &str) -> Event {
    Event::new(
        namespace.to_owned(),
        EventType::MessageConfirmed,
        Uuid::new_v4(),
        None,
        Some("t".to_owned()),
        get_current_time_in_millis(),
    )
}

#[tokio::test]
async fn test_commit_point_rollback_discards_everything() {
    let mut storage = temp_storage();

    let mut message = new_message(
        "ns1",
        "org-a",
        MessageType::Broadcast,
        vec!["t".to_owned()],
        None,
    );
    message.seal().expect("seal");

    storage.start_commit_point().await.expect("start");
    storage.insert_message(&message).await.expect("insert");
    storage
        .insert_event(sample_event("ns1"))
        .await
        .expect("event");
    storage.end_commit_point(false).await.expect("rollback");

    assert!(storage
        .get_message(&message.id)
        .await
        .expect("get")
        .is_none());
    // the sequence counter rolled back with the event
    assert_eq!(storage.latest_sequence().await.expect("sequence"), 0);
}

#[tokio::test]
async fn test_event_sequence_is_gap_free() {
    let mut storage = temp_storage();
    for expected in 1..=3u64 {
        storage.start_commit_point().await.expect("start");
        let event = storage
            .insert_event(sample_event("ns1"))
            .await
            .expect("insert");
        storage.end_commit_point(true).await.expect("commit");
        assert_eq!(event.sequence, expected);
    }
    let events = storage.get_events_after(1, 10).await.expect("read");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].sequence, 2);
    assert_eq!(events[1].sequence, 3);
}

#[tokio::test]
async fn test_event_insert_requires_commit_point() {
    let mut storage = temp_storage();
    let result = storage.insert_event(sample_event("ns1")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_pin_insert_is_idempotent_per_batch_index() {
    let mut storage = temp_storage();
    let batch = Uuid::new_v4();
    let pin = Pin {
        sequence: 0,
        namespace: "ns1".to_owned(),
        context: hash(b"ctx"),
        signer: "0xa".to_owned(),
        nonce: 0,
        batch,
        batch_hash: hash(b"payload"),
        index: 0,
        payload_ref: None,
        dispatched: false,
        created: 1,
    };

    let first = storage.insert_pin(pin.clone()).await.expect("insert");
    let replay = storage.insert_pin(pin).await.expect("replay");
    assert_eq!(first, replay);
    assert_eq!(
        storage.get_pins_for_batch(&batch).await.expect("pins").len(),
        1
    );
}

#[tokio::test]
async fn test_subscription_name_conflict_is_id_mismatch() {
    let mut storage = temp_storage();
    let sub = Subscription {
        id: Uuid::new_v4(),
        namespace: "ns1".to_owned(),
        name: "s1".to_owned(),
        transport: "collect".to_owned(),
        filter: Default::default(),
        options: Default::default(),
        created: 1,
    };
    storage.upsert_subscription(&sub).await.expect("insert");

    let squatter = Subscription {
        id: Uuid::new_v4(),
        ..sub.clone()
    };
    assert!(storage.upsert_subscription(&squatter).await.is_err());

    // same id re-upserts fine
    storage.upsert_subscription(&sub).await.expect("update");
}

#[tokio::test]
async fn test_next_pin_and_offset_roundtrip() {
    let mut storage = temp_storage();
    let context = hash(b"ctx");
    let next = NextPin {
        namespace: "ns1".to_owned(),
        context: context.clone(),
        identity: "org-a".to_owned(),
        nonce: 7,
        hash: expected_pin_hash(&context, "org-a", 7, false),
    };
    storage.upsert_next_pin(&next).await.expect("upsert");
    let read = storage
        .get_next_pin(&context, "org-a")
        .await
        .expect("get")
        .expect("present");
    assert_eq!(read.nonce, 7);
    assert!(storage
        .get_next_pin(&context, "org-b")
        .await
        .expect("get")
        .is_none());

    let offset = Offset {
        kind: OffsetKind::Aggregator,
        name: "pins".to_owned(),
        current: 42,
    };
    storage.upsert_offset(&offset).await.expect("upsert");
    let read = storage
        .get_offset(OffsetKind::Aggregator, "pins")
        .await
        .expect("get")
        .expect("present");
    assert_eq!(read.current, 42);
    storage
        .delete_offset(OffsetKind::Aggregator, "pins")
        .await
        .expect("delete");
    assert!(storage
        .get_offset(OffsetKind::Aggregator, "pins")
        .await
        .expect("get")
        .is_none());
}

#[tokio::test]
async fn test_message_query_filters_and_sorts() {
    let mut storage = temp_storage();
    for (author, topic, created) in [
        ("org-a", "t1", 30u64),
        ("org-b", "t1", 20),
        ("org-a", "t2", 10),
    ] {
        let mut message = new_message(
            "ns1",
            author,
            MessageType::Broadcast,
            vec![topic.to_owned()],
            None,
        );
        message.header.created = created;
        message.seal().expect("seal");
        storage.insert_message(&message).await.expect("insert");
    }
    // a row in another namespace stays invisible
    let mut foreign = new_message(
        "ns2",
        "org-a",
        MessageType::Broadcast,
        vec!["t1".to_owned()],
        None,
    );
    foreign.seal().expect("seal");
    storage.insert_message(&foreign).await.expect("insert");

    let filter = Filter::Eq("header.author".to_owned(), json!("org-a"));
    let params = QueryParams::sorted_by("header.created");
    let result = storage
        .query_messages("ns1", Some(&filter), &params)
        .await
        .expect("query");
    assert_eq!(result.len(), 2);
    assert_eq!(result[0].header.topics[0], "t2");
    assert_eq!(result[1].header.topics[0], "t1");

    let limited = storage
        .query_messages("ns1", None, &QueryParams::sorted_by("header.created").with_limit(1))
        .await
        .expect("query");
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn test_message_restate_survives_commit_point() {
    let mut storage = temp_storage();
    let mut message = new_message(
        "ns1",
        "org-a",
        MessageType::Broadcast,
        vec!["t".to_owned()],
        None,
    );
    message.seal().expect("seal");
    storage.insert_message(&message).await.expect("insert");

    let batch = Uuid::new_v4();
    storage.start_commit_point().await.expect("start");
    storage
        .set_message_batch(&message.id, &batch, MessageState::Ready)
        .await
        .expect("set");
    // reads inside the commit point observe the overlay
    let inside = storage
        .get_message(&message.id)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(inside.state, MessageState::Ready);
    storage.end_commit_point(true).await.expect("commit");

    let after = storage
        .get_message(&message.id)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(after.state, MessageState::Ready);
    assert_eq!(after.batch, Some(batch));
}
