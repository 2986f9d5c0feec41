// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
mod common;

use std::sync::Arc;
use std::time::Duration;

use eventrail_core::{ExpectedVersion, LogTarget, Status};
use eventrail_engine::{BufferPolicy, SubscriptionConfig, SubscriptionCoordinator};
use eventrail_store::fixtures::entries;
use eventrail_store::{EventStore, InMemoryEventStore};
use tokio::time::Instant;

use common::{recording, slow_recording, wait_until};

const EVENTS: usize = 20;

async fn seeded() -> Arc<InMemoryEventStore> {
    let store = Arc::new(InMemoryEventStore::new());
    store
        .append_to_stream("s", ExpectedVersion::Any, entries("E", EVENTS))
        .await
        .unwrap();
    store
}

#[tokio::test(start_paused = true)]
async fn test_fast_session_is_not_held_back_by_slow_one() {
    let store = seeded().await;
    let coordinator =
        SubscriptionCoordinator::new(store, SubscriptionConfig::new("iso", LogTarget::All), tracing::Span::none())
            .unwrap();
    let (slow, slow_seen) = slow_recording("slow", Duration::from_millis(50));
    let (fast, fast_seen) = recording("fast");
    coordinator.add_consumer(slow).unwrap();
    coordinator.add_consumer(fast).unwrap();

    let started = Instant::now();
    coordinator.start().await.unwrap();

    while fast_seen.lock().unwrap().len() < EVENTS {
        tokio::task::yield_now().await;
    }
    // the clock has not moved, so the slow handler cannot have finished anything
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert!(slow_seen.lock().unwrap().is_empty());

    wait_until(Duration::from_secs(10), || slow_seen.lock().unwrap().len() >= EVENTS).await;
    coordinator.stop().await;

    let expected: Vec<u64> = (0..EVENTS as u64).collect();
    assert_eq!(*fast_seen.lock().unwrap(), expected);
    assert_eq!(*slow_seen.lock().unwrap(), expected);
}

#[tokio::test(start_paused = true)]
async fn test_bounded_buffer_throttles_every_session() {
    let store = seeded().await;
    let mut config = SubscriptionConfig::new("bounded", LogTarget::All);
    config.buffer = BufferPolicy::Bounded { capacity: 2 };
    let coordinator = SubscriptionCoordinator::new(store, config, tracing::Span::none()).unwrap();
    let (slow, slow_seen) = slow_recording("slow", Duration::from_millis(50));
    let (fast, fast_seen) = recording("fast");
    coordinator.add_consumer(slow).unwrap();
    coordinator.add_consumer(fast).unwrap();

    let started = Instant::now();
    coordinator.start().await.unwrap();
    wait_until(Duration::from_secs(10), || fast_seen.lock().unwrap().len() >= EVENTS).await;

    // the shared producer waited on the slow session's full buffer
    assert!(started.elapsed() >= Duration::from_millis(50 * (EVENTS as u64 - 4)));
    wait_until(Duration::from_secs(10), || slow_seen.lock().unwrap().len() >= EVENTS).await;
    coordinator.stop().await;
}

#[tokio::test]
async fn test_faulted_session_leaves_siblings_running() {
    let store = seeded().await;
    let coordinator = SubscriptionCoordinator::new(
        store.clone(),
        SubscriptionConfig::new("faults", LogTarget::All),
        tracing::Span::none(),
    )
    .unwrap();
    let broken = eventrail_engine::FnConsumer::new("broken", |r: eventrail_core::StoredEventRecord| async move {
        if r.global_position.0 == 3 {
            Err::<(), eventrail_engine::HandlerError>("poison".into())
        } else {
            Ok(())
        }
    });
    let broken = coordinator.add_consumer(Arc::new(broken)).unwrap();
    let (healthy, seen) = recording("healthy");
    coordinator.add_consumer(healthy).unwrap();
    coordinator.start().await.unwrap();

    broken.wait().await;
    store
        .append_to_stream("s", ExpectedVersion::Any, entries("E", 5))
        .await
        .unwrap();
    wait_until(Duration::from_secs(5), || seen.lock().unwrap().len() >= EVENTS + 5).await;

    assert_eq!(broken.status(), Status::Faulted);
    assert_eq!(broken.processed_position().map(|p| p.global.0), Some(2));
    assert!(broken.error().unwrap().to_string().contains("poison"));
    assert_eq!(coordinator.status(), Status::Live);
    coordinator.stop().await;
}
