// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
mod common;

use std::sync::Arc;
use std::time::Duration;

use eventrail_core::{ExpectedVersion, GlobalPosition, LogTarget, Status, StreamPosition, SubscriptionPosition};
use eventrail_engine::{
    CheckpointSettings, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, SubscriptionConfig,
    SubscriptionCoordinator,
};
use eventrail_store::fixtures::entries;
use eventrail_store::{EventStore, FileEventStore, InMemoryEventStore};
use futures::StreamExt;

use common::{recording, slow_recording, wait_until};

fn at(global: u64) -> SubscriptionPosition {
    SubscriptionPosition {
        stream: StreamPosition(global),
        global: GlobalPosition(global),
    }
}

#[tokio::test(start_paused = true)]
async fn test_count_cadence_and_final_checkpoint() {
    let store = Arc::new(InMemoryEventStore::new());
    store
        .append_to_stream("s", ExpectedVersion::Any, entries("E", 10))
        .await
        .unwrap();
    let checkpoints = Arc::new(MemoryCheckpointStore::new());

    let mut config = SubscriptionConfig::new("counted", LogTarget::All);
    config.checkpoint = CheckpointSettings::every_events(3);
    let coordinator =
        SubscriptionCoordinator::with_checkpoints(store, config, checkpoints.clone(), tracing::Span::none()).unwrap();
    let (consumer, seen) = slow_recording("c", Duration::from_millis(100));
    coordinator.add_consumer(consumer).unwrap();
    coordinator.start().await.unwrap();

    wait_until(Duration::from_secs(5), || seen.lock().unwrap().len() >= 10).await;
    let periodic: Vec<u64> = checkpoints.saves("counted").iter().map(|p| p.global.0).collect();
    // after the 3rd, 6th and 9th handled event
    assert_eq!(periodic, vec![2, 5, 8]);

    coordinator.stop().await;
    let saves: Vec<u64> = checkpoints.saves("counted").iter().map(|p| p.global.0).collect();
    assert_eq!(saves, vec![2, 5, 8, 9]);
    assert_eq!(checkpoints.get("counted"), Some(at(9)));
    assert_eq!(coordinator.report().checkpoint, Some(at(9)));
}

#[tokio::test]
async fn test_dropped_feed_does_not_hold_checkpoint_back() {
    let store = Arc::new(InMemoryEventStore::new());
    store
        .append_to_stream("s", ExpectedVersion::Any, entries("E", 10))
        .await
        .unwrap();
    let checkpoints = Arc::new(MemoryCheckpointStore::new());

    let mut config = SubscriptionConfig::new("tail", LogTarget::All);
    config.checkpoint = CheckpointSettings::every_events(1);
    let coordinator =
        SubscriptionCoordinator::with_checkpoints(store, config, checkpoints.clone(), tracing::Span::none()).unwrap();
    let mut feed = coordinator.feed(1).unwrap();
    let (consumer, seen) = recording("c");
    coordinator.add_consumer(consumer).unwrap();
    coordinator.start().await.unwrap();

    let first = feed.next().await.unwrap();
    assert_eq!(first.global_position.0, 0);
    let feed_session = feed.session().clone();
    drop(feed);
    assert_eq!(feed_session.status(), Status::Stopped);

    wait_until(Duration::from_secs(5), || seen.lock().unwrap().len() >= 10).await;
    assert_eq!(coordinator.checkpoint_position(), Some(at(9)));
    coordinator.stop().await;

    assert_eq!(checkpoints.get("tail"), Some(at(9)));
}

#[tokio::test(start_paused = true)]
async fn test_time_cadence_follows_slowest_session() {
    let store = Arc::new(InMemoryEventStore::new());
    store
        .append_to_stream("s", ExpectedVersion::Any, entries("E", 10))
        .await
        .unwrap();
    let checkpoints = Arc::new(MemoryCheckpointStore::new());

    let mut config = SubscriptionConfig::new("timed", LogTarget::All);
    config.checkpoint = CheckpointSettings::every(Duration::from_secs(1));
    let coordinator =
        SubscriptionCoordinator::with_checkpoints(store, config, checkpoints.clone(), tracing::Span::none()).unwrap();
    let (fast, _) = recording("fast");
    let (slow, _) = slow_recording("slow", Duration::from_millis(400));
    coordinator.add_consumer(fast).unwrap();
    coordinator.add_consumer(slow).unwrap();
    coordinator.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(2_100)).await;
    let during: Vec<u64> = checkpoints.saves("timed").iter().map(|p| p.global.0).collect();
    // the slow session has handled five events in two seconds; the fast one all ten
    assert!(!during.is_empty());
    assert!(during.iter().all(|g| *g <= 4), "checkpoint ran ahead of slow session: {:?}", during);

    coordinator.stop().await;
}

#[tokio::test]
async fn test_resume_from_checkpoint_skips_bookmarked_event() {
    let store = Arc::new(InMemoryEventStore::new());
    store
        .append_to_stream("s", ExpectedVersion::Any, entries("E", 8))
        .await
        .unwrap();
    let checkpoints = Arc::new(MemoryCheckpointStore::with_position("resumed", at(5)));

    let coordinator = SubscriptionCoordinator::with_checkpoints(
        store,
        SubscriptionConfig::new("resumed", LogTarget::All),
        checkpoints.clone(),
        tracing::Span::none(),
    )
    .unwrap();
    let (consumer, seen) = recording("c");
    coordinator.add_consumer(consumer).unwrap();
    coordinator.start().await.unwrap();

    wait_until(Duration::from_secs(5), || seen.lock().unwrap().len() >= 2).await;
    coordinator.stop().await;
    assert_eq!(*seen.lock().unwrap(), vec![6, 7]);
    assert_eq!(checkpoints.get("resumed"), Some(at(7)));
}

#[tokio::test]
async fn test_durable_store_and_checkpoints_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("events.log");
    let checkpoint_path = dir.path().join("checkpoints.json");

    {
        let store = Arc::new(FileEventStore::open(&log_path).unwrap());
        store
            .append_to_stream("ledger", ExpectedVersion::NoStream, entries("Posted", 4))
            .await
            .unwrap();
        let coordinator = SubscriptionCoordinator::with_checkpoints(
            store.clone(),
            SubscriptionConfig::new("ledger", LogTarget::Stream("ledger".into())),
            Arc::new(FileCheckpointStore::new(&checkpoint_path)),
            tracing::Span::none(),
        )
        .unwrap();
        let (consumer, seen) = recording("first-run");
        coordinator.add_consumer(consumer).unwrap();
        coordinator.start().await.unwrap();
        wait_until(Duration::from_secs(5), || seen.lock().unwrap().len() >= 4).await;
        coordinator.stop().await;
        store.close();
    }

    let store = Arc::new(FileEventStore::open(&log_path).unwrap());
    assert_eq!(store.len(), 4);
    store
        .append_to_stream("ledger", ExpectedVersion::Exact(3), entries("Posted", 2))
        .await
        .unwrap();

    let checkpoints = Arc::new(FileCheckpointStore::new(&checkpoint_path));
    assert_eq!(checkpoints.load("ledger").await.unwrap(), Some(at(3)));
    let coordinator = SubscriptionCoordinator::with_checkpoints(
        store,
        SubscriptionConfig::new("ledger", LogTarget::Stream("ledger".into())),
        checkpoints,
        tracing::Span::none(),
    )
    .unwrap();
    let (consumer, seen) = recording("second-run");
    coordinator.add_consumer(consumer).unwrap();
    coordinator.start().await.unwrap();
    wait_until(Duration::from_secs(5), || seen.lock().unwrap().len() >= 2).await;
    coordinator.stop().await;

    assert_eq!(*seen.lock().unwrap(), vec![4, 5]);
}
