// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use eventrail_core::{AppendResult, ExpectedVersion, LogPosition, LogTarget, Status, WritableEventEntry};
use eventrail_engine::{EngineError, ReconnectSettings, SubscriptionConfig, SubscriptionCoordinator, SupervisorState};
use eventrail_store::fixtures::{entries, FaultyStore};
use eventrail_store::{
    BoxLiveFeed, EventStore, InMemoryEventStore, ReadDirection, ReadFrom, ReadSlice, Result as StoreResult,
    StoreError,
};
use tokio::time::Instant;

use common::{recording, wait_until};

/// Drops the first live feed right away and refuses every later one,
/// remembering when each subscription was attempted.
struct FlakyBackend {
    inner: FaultyStore<InMemoryEventStore>,
    attempts: Mutex<Vec<Instant>>,
}

impl FlakyBackend {
    fn new() -> Self {
        let inner = FaultyStore::new(InMemoryEventStore::new());
        inner.drop_live_after(0);
        Self {
            inner,
            attempts: Mutex::new(Vec::new()),
        }
    }

    fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventStore for FlakyBackend {
    async fn append_to_stream(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        entries: Vec<WritableEventEntry>,
    ) -> StoreResult<AppendResult> {
        self.inner.append_to_stream(stream, expected, entries).await
    }

    async fn read(
        &self,
        target: &LogTarget,
        direction: ReadDirection,
        from: ReadFrom,
        max_count: usize,
    ) -> StoreResult<ReadSlice> {
        self.inner.read(target, direction, from, max_count).await
    }

    async fn subscribe_live(&self, target: &LogTarget, after: Option<LogPosition>) -> StoreResult<BoxLiveFeed> {
        let first = {
            let mut attempts = self.attempts.lock().unwrap();
            attempts.push(Instant::now());
            attempts.len() == 1
        };
        if first {
            self.inner.subscribe_live(target, after).await
        } else {
            Err(StoreError::Unavailable("backend down".into()))
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_then_gives_up() {
    let store = Arc::new(FlakyBackend::new());
    let mut config = SubscriptionConfig::new("flaky", LogTarget::All);
    config.reconnect = ReconnectSettings {
        base_delay_ms: 1_000,
        max_attempts: 3,
    };
    let coordinator = SubscriptionCoordinator::new(store.clone(), config, tracing::Span::none()).unwrap();
    let (consumer, _) = recording("c");
    let session = coordinator.add_consumer(consumer).unwrap();

    coordinator.start().await.unwrap();
    assert_eq!(coordinator.wait_for_completed().await, Status::Faulted);

    let attempts = store.attempts();
    assert_eq!(attempts.len(), 4, "initial subscribe plus three reconnects");
    let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(
        gaps,
        vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)]
    );

    assert!(matches!(
        coordinator.error().as_deref(),
        Some(EngineError::ReconnectExhausted { attempts: 3, .. })
    ));
    assert_eq!(session.status(), Status::Faulted);
    assert_eq!(coordinator.supervisor_state(), Some(SupervisorState::Stopped));

    // nothing else is attempted afterwards
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(store.attempts().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_reaching_live_resets_attempt_budget() {
    let store = Arc::new(FaultyStore::new(InMemoryEventStore::new()));
    store.drop_live_after(1);

    let mut config = SubscriptionConfig::new("resets", LogTarget::All);
    config.reconnect = ReconnectSettings {
        base_delay_ms: 1_000,
        max_attempts: 1,
    };
    let coordinator = SubscriptionCoordinator::new(store.clone(), config, tracing::Span::none()).unwrap();
    let (consumer, seen) = recording("c");
    coordinator.add_consumer(consumer).unwrap();
    coordinator.start().await.unwrap();
    wait_until(Duration::from_secs(5), || coordinator.status() == Status::Live).await;

    // the open feed drops after its next event; the reconnect's feed will too
    store.drop_live_after(1);
    store
        .append_to_stream("s", ExpectedVersion::Any, entries("E", 1))
        .await
        .unwrap();
    wait_until(Duration::from_secs(5), || {
        store.subscribe_calls() == 2 && coordinator.status() == Status::Live
    })
    .await;

    // the second one drops too; with one attempt allowed this only recovers
    // because going live again reset the counter
    store
        .append_to_stream("s", ExpectedVersion::Any, entries("E", 1))
        .await
        .unwrap();
    wait_until(Duration::from_secs(5), || {
        store.subscribe_calls() == 3 && coordinator.status() == Status::Live
    })
    .await;

    store
        .append_to_stream("s", ExpectedVersion::Any, entries("E", 1))
        .await
        .unwrap();
    wait_until(Duration::from_secs(5), || seen.lock().unwrap().len() >= 3).await;

    assert!(coordinator.error().is_none());
    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    coordinator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_history_read_reconnects() {
    let store = Arc::new(FaultyStore::new(InMemoryEventStore::new()));
    store
        .append_to_stream("s", ExpectedVersion::Any, entries("E", 6))
        .await
        .unwrap();
    store.fail_reads(1);

    let mut config = SubscriptionConfig::new("reads", LogTarget::All);
    config.page_size = 2;
    let coordinator = SubscriptionCoordinator::new(store.clone(), config, tracing::Span::none()).unwrap();
    let (consumer, seen) = recording("c");
    coordinator.add_consumer(consumer).unwrap();
    coordinator.start().await.unwrap();

    wait_until(Duration::from_secs(10), || seen.lock().unwrap().len() >= 6).await;
    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
    assert!(coordinator.error().is_none());
    coordinator.stop().await;
}
