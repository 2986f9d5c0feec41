// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Event Log Source
//!
//! Turns "read history from X" and "push live from X" into one ordered
//! sequence for a single log (global or one stream).
//!
//! # Protocol
//! 1. `on_catching_up`
//! 2. Page through history from the resume point. Reads are inclusive, so
//!    anything at or before an exclusive resume position is discarded.
//! 3. Open a live feed strictly after the last delivered position. The store
//!    replays whatever was appended during step 2 before going live, so the
//!    handoff has no gap; positions already delivered are discarded, so it
//!    has no duplicate either.
//! 4. `on_live` when the feed reports it caught up.
//! 5. On disconnect, `on_dropped` and return. The source never retries.

use std::sync::Arc;

use async_trait::async_trait;
use eventrail_core::{LogPosition, LogTarget, StoredEventRecord};
use eventrail_store::{DropReason, EventStore, LiveMessage, ReadDirection, ReadFrom, StoreError};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::errors::EngineError;

pub type SharedStore = Arc<dyn EventStore>;

/// Receives the ordered delivery sequence of an [`EventLogSource`].
#[async_trait]
pub trait SourceSink: Send + Sync {
    async fn on_catching_up(&self);

    /// An error here drops the subscription with
    /// [`DropReason::SubscriberError`].
    async fn on_event(&self, record: StoredEventRecord, position: LogPosition) -> Result<(), EngineError>;

    async fn on_live(&self);

    async fn on_dropped(&self, reason: DropReason, error: Option<&EngineError>);
}

/// How one `subscribe` call ended.
#[derive(Debug)]
pub enum SourceOutcome {
    /// The log ended the sequence cleanly (stream does not exist).
    Completed,
    /// The connection went away.
    Dropped {
        reason: DropReason,
        error: Option<EngineError>,
    },
    /// Not worth retrying.
    Failed(EngineError),
}

pub struct EventLogSource {
    store: SharedStore,
    target: LogTarget,
    page_size: usize,
    require_stream_exists: bool,
    span: tracing::Span,
}

impl EventLogSource {
    pub fn new(
        store: SharedStore,
        target: LogTarget,
        page_size: usize,
        require_stream_exists: bool,
        span: tracing::Span,
    ) -> Self {
        Self {
            store,
            target,
            page_size: page_size.max(1),
            require_stream_exists,
            span,
        }
    }

    pub fn target(&self) -> &LogTarget {
        &self.target
    }

    /// Deliver every event after `from_exclusive` (`None` = from the first
    /// event, inclusive) until dropped or cancelled.
    pub async fn subscribe(
        &self,
        from_exclusive: Option<LogPosition>,
        sink: &dyn SourceSink,
        cancel: &CancellationToken,
    ) -> SourceOutcome {
        self.run(from_exclusive, sink, cancel)
            .instrument(self.span.clone())
            .await
    }

    async fn run(
        &self,
        from_exclusive: Option<LogPosition>,
        sink: &dyn SourceSink,
        cancel: &CancellationToken,
    ) -> SourceOutcome {
        tracing::debug!(from = ?from_exclusive, "Subscribing");
        sink.on_catching_up().await;

        // `End` is resolved by the live feed; only concrete positions bound delivery
        let mut last = from_exclusive.filter(|p| !p.is_end());

        // History
        if from_exclusive != Some(LogPosition::End) {
            let mut read_from = match from_exclusive {
                Some(LogPosition::At(p)) => ReadFrom::At(p),
                _ => ReadFrom::Origin,
            };
            loop {
                let slice = tokio::select! {
                    _ = cancel.cancelled() => return self.dropped(sink, DropReason::Disposed, None).await,
                    slice = self.store.read(&self.target, ReadDirection::Forward, read_from, self.page_size) => slice,
                };
                let slice = match slice {
                    Ok(slice) => slice,
                    Err(StoreError::StreamNotFound(name)) => {
                        if self.require_stream_exists {
                            tracing::error!("Stream {} does not exist", name);
                            return SourceOutcome::Failed(EngineError::StreamNotFound(name));
                        }
                        tracing::info!("Stream {} does not exist, nothing to deliver", name);
                        return SourceOutcome::Completed;
                    }
                    Err(e) => {
                        tracing::warn!("Historic read failed: {}", e);
                        return self.dropped(sink, DropReason::ServerError, Some(e.into())).await;
                    }
                };

                let page_len = slice.records.len();
                for record in slice.records {
                    match self.deliver(record, &mut last, sink, cancel).await {
                        Ok(()) => {}
                        Err(outcome) => return outcome,
                    }
                }

                if slice.is_end || page_len == 0 {
                    break;
                }
                read_from = match last {
                    Some(LogPosition::At(p)) => ReadFrom::At(p + 1),
                    _ => break,
                };
            }
            tracing::debug!(last = ?last, "Historic replay finished");
        }

        // Live
        let feed = tokio::select! {
            _ = cancel.cancelled() => return self.dropped(sink, DropReason::Disposed, None).await,
            feed = self.store.subscribe_live(&self.target, last.or(from_exclusive)) => feed,
        };
        let mut feed = match feed {
            Ok(feed) => feed,
            Err(e) => {
                tracing::warn!("Live subscription failed: {}", e);
                return self.dropped(sink, DropReason::ServerError, Some(e.into())).await;
            }
        };

        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => return self.dropped(sink, DropReason::Disposed, None).await,
                message = feed.next() => message,
            };
            match message {
                LiveMessage::Event(record) => {
                    if let Err(outcome) = self.deliver(record, &mut last, sink, cancel).await {
                        return outcome;
                    }
                }
                LiveMessage::CaughtUp => {
                    tracing::info!(position = ?last, "Caught up, now live");
                    sink.on_live().await;
                }
                LiveMessage::Dropped { reason, error } => {
                    return self.dropped(sink, reason, error.map(EngineError::from)).await;
                }
            }
        }
    }

    /// Hand one record to the sink unless it is at or before `last`.
    async fn deliver(
        &self,
        record: StoredEventRecord,
        last: &mut Option<LogPosition>,
        sink: &dyn SourceSink,
        cancel: &CancellationToken,
    ) -> Result<(), SourceOutcome> {
        let position = self.target.position_of(&record);
        if let Some(bound) = last {
            if position <= *bound {
                tracing::trace!(%position, "Discarding already delivered event");
                return Ok(());
            }
        }

        let delivered = tokio::select! {
            _ = cancel.cancelled() => return Err(self.dropped(sink, DropReason::Disposed, None).await),
            r = sink.on_event(record, position) => r,
        };
        if let Err(e) = delivered {
            tracing::error!(%position, "Subscriber rejected event: {}", e);
            return Err(self.dropped(sink, DropReason::SubscriberError, Some(e)).await);
        }

        metrics::counter!("eventrail_events_delivered_total", 1, "target" => self.target.name().to_string());
        *last = Some(position);
        Ok(())
    }

    async fn dropped(&self, sink: &dyn SourceSink, reason: DropReason, error: Option<EngineError>) -> SourceOutcome {
        match &error {
            Some(e) => tracing::info!(%reason, "Subscription dropped: {}", e),
            None => tracing::info!(%reason, "Subscription dropped"),
        }
        sink.on_dropped(reason, error.as_ref()).await;
        SourceOutcome::Dropped { reason, error }
    }
}
