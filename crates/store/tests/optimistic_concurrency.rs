// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::sync::Arc;

use eventrail_core::{ExpectedVersion, LogTarget};
use eventrail_store::fixtures::entries;
use eventrail_store::{EventStore, InMemoryEventStore, ReadDirection, ReadFrom, StoreError};

async fn stream_contents(store: &InMemoryEventStore, stream: &str) -> Vec<String> {
    store
        .read(&LogTarget::Stream(stream.into()), ReadDirection::Forward, ReadFrom::Origin, 100)
        .await
        .unwrap()
        .records
        .into_iter()
        .map(|r| String::from_utf8(r.payload.to_vec()).unwrap())
        .collect()
}

#[tokio::test]
async fn test_no_stream_rejected_when_stream_exists() {
    let store = InMemoryEventStore::new();
    store
        .append_to_stream("order-7", ExpectedVersion::NoStream, entries("Placed", 1))
        .await
        .unwrap();
    let before = stream_contents(&store, "order-7").await;

    let err = store
        .append_to_stream("order-7", ExpectedVersion::NoStream, entries("Placed", 2))
        .await
        .unwrap_err();

    match err {
        StoreError::ConcurrencyConflict { stream, expected, actual } => {
            assert_eq!(stream, "order-7");
            assert_eq!(expected, ExpectedVersion::NoStream);
            assert_eq!(actual, Some(0));
        }
        other => panic!("expected conflict, got {:?}", other),
    }
    assert_eq!(stream_contents(&store, "order-7").await, before);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_stale_exact_version_rejected() {
    let store = InMemoryEventStore::new();
    let first = store
        .append_to_stream("order-7", ExpectedVersion::NoStream, entries("Placed", 1))
        .await
        .unwrap();
    store
        .append_to_stream("order-7", ExpectedVersion::Exact(first.next_expected_version), entries("Paid", 1))
        .await
        .unwrap();

    // a writer still holding the first version loses
    let err = store
        .append_to_stream("order-7", ExpectedVersion::Exact(first.next_expected_version), entries("Cancelled", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ConcurrencyConflict { actual: Some(1), .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_writers_one_wins_per_version() {
    let store = Arc::new(InMemoryEventStore::new());
    store
        .append_to_stream("counter", ExpectedVersion::NoStream, entries("Created", 1))
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            store
                .append_to_stream("counter", ExpectedVersion::Exact(0), entries("Incremented", 1))
                .await
                .is_ok()
        }));
    }

    let mut winners = 0;
    for task in tasks {
        if task.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(store.len(), 2);
}
