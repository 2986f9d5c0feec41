// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! In-Memory Event Store
//!
//! The global log is a `Vec` indexed by global position; each stream keeps the
//! list of global positions it owns. Appends take the write lock, assign
//! positions, and broadcast the new records before releasing it. Live
//! subscriptions snapshot their backlog and subscribe to the broadcast under
//! the read lock, so no append can fall between the two.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use eventrail_core::config::DEFAULT_LIVE_CAPACITY;
use eventrail_core::{
    AppendResult, ExpectedVersion, GlobalPosition, LogPosition, LogTarget, StoredEventRecord, StreamPosition,
    WritableEventEntry,
};
use tokio::sync::{broadcast, watch};

use crate::error::{Result, StoreError};
use crate::store::{BoxLiveFeed, DropReason, EventStore, LiveFeed, LiveMessage, ReadDirection, ReadFrom, ReadSlice};

#[derive(Clone, Debug)]
pub struct MemoryStoreConfig {
    /// Records a live reader may fall behind before it is dropped.
    pub live_capacity: usize,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            live_capacity: DEFAULT_LIVE_CAPACITY,
        }
    }
}

#[derive(Default)]
struct Log {
    events: Vec<StoredEventRecord>,
    streams: HashMap<String, Vec<u64>>,
}

impl Log {
    fn stream_version(&self, stream: &str) -> Option<u64> {
        self.streams
            .get(stream)
            .and_then(|positions| positions.len().checked_sub(1))
            .map(|v| v as u64)
    }

    /// Global positions of `target`, in order.
    fn positions(&self, target: &LogTarget) -> Result<Vec<u64>> {
        match target {
            LogTarget::All => Ok((0..self.events.len() as u64).collect()),
            LogTarget::Stream(name) => self
                .streams
                .get(name)
                .cloned()
                .ok_or_else(|| StoreError::StreamNotFound(name.clone())),
        }
    }

    fn last_position(&self, target: &LogTarget) -> Option<u64> {
        match target {
            LogTarget::All => (self.events.len() as u64).checked_sub(1),
            LogTarget::Stream(name) => self.stream_version(name),
        }
    }

    fn push(&mut self, record: StoredEventRecord) {
        self.streams
            .entry(record.stream.clone())
            .or_default()
            .push(record.global_position.0);
        self.events.push(record);
    }
}

struct Shared {
    log: RwLock<Log>,
    live: broadcast::Sender<StoredEventRecord>,
    closed: watch::Sender<bool>,
}

/// Non-durable store; also the index behind [`crate::file::FileEventStore`].
#[derive(Clone)]
pub struct InMemoryEventStore {
    shared: Arc<Shared>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::with_config(MemoryStoreConfig::default())
    }

    pub fn with_config(config: MemoryStoreConfig) -> Self {
        let (live, _) = broadcast::channel(config.live_capacity.max(1));
        let (closed, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                log: RwLock::new(Log::default()),
                live,
                closed,
            }),
        }
    }

    /// Rebuild a store from records already persisted elsewhere.
    ///
    /// Records must be in global position order starting at 0.
    pub fn from_records(records: Vec<StoredEventRecord>, config: MemoryStoreConfig) -> Self {
        let store = Self::with_config(config);
        {
            let mut log = store.shared.log.write().unwrap_or_else(PoisonError::into_inner);
            for record in records {
                log.push(record);
            }
        }
        store
    }

    /// Number of events in the global log.
    pub fn len(&self) -> usize {
        self.shared.log.read().unwrap_or_else(PoisonError::into_inner).events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every live feed with a server error and refuse further appends.
    pub fn close(&self) {
        tracing::info!("Closing in-memory store");
        self.shared.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }

    /// Append with a hook that runs after validation and before the records
    /// become visible. A hook error aborts the append.
    pub(crate) fn append_with<F>(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        entries: Vec<WritableEventEntry>,
        persist: F,
    ) -> Result<AppendResult>
    where
        F: FnOnce(&[StoredEventRecord]) -> Result<()>,
    {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        if entries.is_empty() {
            return Err(StoreError::EmptyAppend(stream.to_string()));
        }

        let mut log = self.shared.log.write().unwrap_or_else(PoisonError::into_inner);

        let current = log.stream_version(stream);
        if !expected.is_satisfied_by(current) {
            tracing::debug!(stream, %expected, ?current, "Append rejected by concurrency check");
            return Err(StoreError::ConcurrencyConflict {
                stream: stream.to_string(),
                expected,
                actual: current,
            });
        }

        let mut next_stream = current.map(|v| v + 1).unwrap_or(0);
        let mut next_global = log.events.len() as u64;
        let records: Vec<StoredEventRecord> = entries
            .into_iter()
            .map(|entry| {
                let record = entry.into_record(stream, StreamPosition(next_stream), GlobalPosition(next_global));
                next_stream += 1;
                next_global += 1;
                record
            })
            .collect();

        persist(&records)?;

        let first_global = records[0].global_position;
        let last = &records[records.len() - 1];
        let result = AppendResult {
            next_expected_version: last.stream_position.0,
            first_global,
            last_global: last.global_position,
        };

        for record in records {
            log.push(record.clone());
            // no receivers is fine
            let _ = self.shared.live.send(record);
        }

        Ok(result)
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append_to_stream(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        entries: Vec<WritableEventEntry>,
    ) -> Result<AppendResult> {
        self.append_with(stream, expected, entries, |_| Ok(()))
    }

    async fn read(
        &self,
        target: &LogTarget,
        direction: ReadDirection,
        from: ReadFrom,
        max_count: usize,
    ) -> Result<ReadSlice> {
        let log = self.shared.log.read().unwrap_or_else(PoisonError::into_inner);
        let positions = log.positions(target)?;
        let to_record = |global: &u64| log.events[*global as usize].clone();
        let position_of = |global: &u64| target.position_of(&log.events[*global as usize]).value().unwrap_or(0);

        let records: Vec<StoredEventRecord>;
        let is_end;
        match direction {
            ReadDirection::Forward => {
                let start = match from {
                    ReadFrom::Origin => 0,
                    ReadFrom::End => positions.len().saturating_sub(1),
                    ReadFrom::At(p) => positions.partition_point(|g| position_of(g) < p),
                };
                let end = (start + max_count).min(positions.len());
                records = positions[start.min(end)..end].iter().map(to_record).collect();
                is_end = end >= positions.len();
            }
            ReadDirection::Backward => {
                // index one past the first event to return
                let upper = match from {
                    ReadFrom::Origin => positions.len().min(1),
                    ReadFrom::End => positions.len(),
                    ReadFrom::At(p) => positions.partition_point(|g| position_of(g) <= p),
                };
                let lower = upper.saturating_sub(max_count);
                records = positions[lower..upper].iter().rev().map(to_record).collect();
                is_end = lower == 0;
            }
        }

        Ok(ReadSlice { records, is_end })
    }

    async fn subscribe_live(&self, target: &LogTarget, after: Option<LogPosition>) -> Result<BoxLiveFeed> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }

        let log = self.shared.log.read().unwrap_or_else(PoisonError::into_inner);
        let rx = self.shared.live.subscribe();

        let (backlog, last) = match after {
            Some(LogPosition::End) => (VecDeque::new(), log.last_position(target)),
            bound => {
                let after = bound.and_then(|p| p.value());
                let backlog: VecDeque<StoredEventRecord> = log
                    .positions(target)
                    .unwrap_or_default()
                    .iter()
                    .map(|g| &log.events[*g as usize])
                    .filter(|r| match after {
                        Some(a) => target.position_of(r) > LogPosition::At(a),
                        None => true,
                    })
                    .cloned()
                    .collect();
                let last = backlog
                    .back()
                    .and_then(|r| target.position_of(r).value())
                    .or(after);
                (backlog, last)
            }
        };
        drop(log);

        tracing::debug!(target = target.name(), backlog = backlog.len(), "Live feed opened");

        Ok(Box::new(MemoryLiveFeed {
            target: target.clone(),
            backlog,
            caught_up: false,
            last,
            rx,
            closed: self.shared.closed.subscribe(),
            dropped: None,
        }))
    }
}

struct MemoryLiveFeed {
    target: LogTarget,
    backlog: VecDeque<StoredEventRecord>,
    caught_up: bool,
    /// Highest position handed out so far.
    last: Option<u64>,
    rx: broadcast::Receiver<StoredEventRecord>,
    closed: watch::Receiver<bool>,
    dropped: Option<String>,
}

impl MemoryLiveFeed {
    fn drop_with(&mut self, message: String) -> LiveMessage {
        tracing::warn!(target = self.target.name(), "Live feed dropped: {}", message);
        self.dropped = Some(message.clone());
        LiveMessage::Dropped {
            reason: DropReason::ServerError,
            error: Some(StoreError::Unavailable(message)),
        }
    }

    fn accept(&mut self, record: &StoredEventRecord) -> bool {
        if !self.target.contains(record) {
            return false;
        }
        let position = self.target.position_of(record);
        if let Some(last) = self.last {
            if position <= LogPosition::At(last) {
                return false;
            }
        }
        self.last = position.value();
        true
    }
}

#[async_trait]
impl LiveFeed for MemoryLiveFeed {
    async fn next(&mut self) -> LiveMessage {
        if let Some(message) = &self.dropped {
            return LiveMessage::Dropped {
                reason: DropReason::ServerError,
                error: Some(StoreError::Unavailable(message.clone())),
            };
        }
        if let Some(record) = self.backlog.pop_front() {
            return LiveMessage::Event(record);
        }
        if !self.caught_up {
            self.caught_up = true;
            return LiveMessage::CaughtUp;
        }

        loop {
            if *self.closed.borrow() {
                return self.drop_with("store closed".into());
            }
            tokio::select! {
                changed = self.closed.changed() => {
                    if changed.is_err() || *self.closed.borrow() {
                        return self.drop_with("store closed".into());
                    }
                }
                received = self.rx.recv() => match received {
                    Ok(record) => {
                        if self.accept(&record) {
                            return LiveMessage::Event(record);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        return self.drop_with(format!("live reader lagged by {} events", n));
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return self.drop_with("live channel closed".into());
                    }
                },
            }
        }
    }
}
