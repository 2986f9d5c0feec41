// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Test Fixtures
//!
//! Sample events and [`FaultyStore`], a wrapper that injects the failures a
//! real backend produces: refused subscriptions, live feeds that drop
//! mid-stream, failing reads and slow reads.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use eventrail_core::{
    AppendResult, ExpectedVersion, GlobalPosition, LogPosition, LogTarget, StoredEventRecord, StreamPosition,
    WritableEventEntry,
};

use crate::error::{Result, StoreError};
use crate::store::{BoxLiveFeed, DropReason, EventStore, LiveFeed, LiveMessage, ReadDirection, ReadFrom, ReadSlice};

/// `count` entries named `name` with a JSON payload `{"n": i}`.
pub fn entries(name: &str, count: usize) -> Vec<WritableEventEntry> {
    (0..count)
        .map(|i| WritableEventEntry::new(name, format!("{{\"n\":{}}}", i).into_bytes()))
        .collect()
}

/// A record as a store would produce it.
pub fn record(stream: &str, stream_position: u64, global_position: u64) -> StoredEventRecord {
    StoredEventRecord {
        stream: stream.to_string(),
        name: "TestEvent".to_string(),
        payload: Bytes::from(format!("{{\"n\":{}}}", global_position)),
        metadata: None,
        stream_position: StreamPosition(stream_position),
        global_position: GlobalPosition(global_position),
    }
}

#[derive(Default)]
struct FaultPlan {
    refuse_subscriptions: u32,
    drop_live_after: Option<usize>,
    fail_reads: u32,
    read_delay: Option<Duration>,
}

/// Wraps a store and injects faults on demand.
pub struct FaultyStore<S> {
    inner: S,
    plan: Mutex<FaultPlan>,
    subscribe_calls: AtomicU32,
    read_calls: AtomicU32,
}

impl<S: EventStore> FaultyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            plan: Mutex::new(FaultPlan::default()),
            subscribe_calls: AtomicU32::new(0),
            read_calls: AtomicU32::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// The next `n` live subscriptions fail with [`StoreError::Unavailable`].
    pub fn refuse_subscriptions(&self, n: u32) {
        self.plan().refuse_subscriptions = n;
    }

    /// The next live feed drops with a server error after `n` events
    /// (backlog included).
    pub fn drop_live_after(&self, n: usize) {
        self.plan().drop_live_after = Some(n);
    }

    /// The next `n` reads fail with [`StoreError::Unavailable`].
    pub fn fail_reads(&self, n: u32) {
        self.plan().fail_reads = n;
    }

    /// Sleep before serving each read page.
    pub fn delay_reads(&self, delay: Duration) {
        self.plan().read_delay = Some(delay);
    }

    pub fn subscribe_calls(&self) -> u32 {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> u32 {
        self.read_calls.load(Ordering::SeqCst)
    }

    fn plan(&self) -> std::sync::MutexGuard<'_, FaultPlan> {
        self.plan.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<S: EventStore> EventStore for FaultyStore<S> {
    async fn append_to_stream(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        entries: Vec<WritableEventEntry>,
    ) -> Result<AppendResult> {
        self.inner.append_to_stream(stream, expected, entries).await
    }

    async fn read(
        &self,
        target: &LogTarget,
        direction: ReadDirection,
        from: ReadFrom,
        max_count: usize,
    ) -> Result<ReadSlice> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        let (fail, delay) = {
            let mut plan = self.plan();
            let fail = plan.fail_reads > 0;
            if fail {
                plan.fail_reads -= 1;
            }
            (fail, plan.read_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(StoreError::Unavailable("injected read failure".into()));
        }
        self.inner.read(target, direction, from, max_count).await
    }

    async fn subscribe_live(&self, target: &LogTarget, after: Option<LogPosition>) -> Result<BoxLiveFeed> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let (refuse, drop_after) = {
            let mut plan = self.plan();
            let refuse = plan.refuse_subscriptions > 0;
            if refuse {
                plan.refuse_subscriptions -= 1;
                (true, None)
            } else {
                (false, plan.drop_live_after.take())
            }
        };
        if refuse {
            tracing::debug!("Refusing injected live subscription");
            return Err(StoreError::Unavailable("injected subscription refusal".into()));
        }

        let feed = self.inner.subscribe_live(target, after).await?;
        match drop_after {
            Some(limit) => Ok(Box::new(DroppingFeed {
                inner: feed,
                remaining: limit,
            })),
            None => Ok(feed),
        }
    }
}

struct DroppingFeed {
    inner: BoxLiveFeed,
    remaining: usize,
}

#[async_trait]
impl LiveFeed for DroppingFeed {
    async fn next(&mut self) -> LiveMessage {
        if self.remaining == 0 {
            return LiveMessage::Dropped {
                reason: DropReason::ServerError,
                error: Some(StoreError::Unavailable("injected connection drop".into())),
            };
        }
        let message = self.inner.next().await;
        if matches!(message, LiveMessage::Event(_)) {
            self.remaining -= 1;
        }
        message
    }
}
