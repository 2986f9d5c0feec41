// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Storage Collaborator Contract
//!
//! The subscription engine only ever talks to a log through [`EventStore`]:
//! - `read` = paged historic reads, inclusive of the starting position
//! - `subscribe_live` = push feed of everything after a position
//! - `append_to_stream` = optimistic-concurrency writes
//!
//! # Live feed guarantees
//! A [`LiveFeed`] first yields every event after the requested position that
//! already exists, then [`LiveMessage::CaughtUp`], then new events as they
//! are appended. No event between the backlog and the tail is skipped.
//! Once a feed yields [`LiveMessage::Dropped`] it keeps yielding it.

use async_trait::async_trait;
use eventrail_core::{AppendResult, ExpectedVersion, LogPosition, LogTarget, StoredEventRecord, WritableEventEntry};

use crate::error::{Result, StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadDirection {
    Forward,
    Backward,
}

/// Inclusive starting point of a historic read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadFrom {
    /// First event of the target.
    Origin,
    /// The event at this position (or the nearest one in read direction).
    At(u64),
    /// Last event of the target.
    End,
}

/// One page of a historic read.
#[derive(Clone, Debug, Default)]
pub struct ReadSlice {
    pub records: Vec<StoredEventRecord>,
    /// No further events exist in the read direction.
    pub is_end: bool,
}

/// Why a live feed stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// The subscriber asked to stop.
    Disposed,
    /// A subscriber callback failed.
    SubscriberError,
    /// Transport or backend fault.
    ServerError,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DropReason::Disposed => "disposed",
            DropReason::SubscriberError => "subscriber-error",
            DropReason::ServerError => "server-error",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub enum LiveMessage {
    Event(StoredEventRecord),
    /// Backlog delivered; everything after this is live.
    CaughtUp,
    Dropped {
        reason: DropReason,
        error: Option<StoreError>,
    },
}

/// Push feed returned by [`EventStore::subscribe_live`]. Dropping it
/// unsubscribes.
#[async_trait]
pub trait LiveFeed: Send {
    async fn next(&mut self) -> LiveMessage;
}

pub type BoxLiveFeed = Box<dyn LiveFeed>;

#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Append `entries` to `stream` if `expected` holds.
    ///
    /// # Errors
    /// [`StoreError::ConcurrencyConflict`] when the expectation fails; the
    /// stream is left untouched.
    async fn append_to_stream(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        entries: Vec<WritableEventEntry>,
    ) -> Result<AppendResult>;

    /// Read up to `max_count` events of `target` starting at `from`.
    ///
    /// # Errors
    /// [`StoreError::StreamNotFound`] for a stream target with no events.
    async fn read(
        &self,
        target: &LogTarget,
        direction: ReadDirection,
        from: ReadFrom,
        max_count: usize,
    ) -> Result<ReadSlice>;

    /// Open a live feed of `target` starting strictly after `after`
    /// (`None` = from the first event, `Some(End)` = only new events).
    async fn subscribe_live(&self, target: &LogTarget, after: Option<LogPosition>) -> Result<BoxLiveFeed>;
}

/// Shared handle to any store.
#[async_trait]
impl<S: EventStore + ?Sized> EventStore for std::sync::Arc<S> {
    async fn append_to_stream(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        entries: Vec<WritableEventEntry>,
    ) -> Result<AppendResult> {
        (**self).append_to_stream(stream, expected, entries).await
    }

    async fn read(
        &self,
        target: &LogTarget,
        direction: ReadDirection,
        from: ReadFrom,
        max_count: usize,
    ) -> Result<ReadSlice> {
        (**self).read(target, direction, from, max_count).await
    }

    async fn subscribe_live(&self, target: &LogTarget, after: Option<LogPosition>) -> Result<BoxLiveFeed> {
        (**self).subscribe_live(target, after).await
    }
}
