// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Pull-based view of a subscription.
//!
//! [`EventFeed`] is a [`Stream`] of records backed by its own session. The
//! session hands each event to a bounded channel and waits for room, so an
//! unread feed only ever holds `capacity` records. Dropping the feed stops
//! its session; the stream ends once the session stops or faults.

use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use async_trait::async_trait;
use eventrail_core::StoredEventRecord;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::consumer::Consumer;
use crate::coordinator::SubscriptionCoordinator;
use crate::errors::{HandlerError, Result};
use crate::session::ConsumerSession;

struct ChannelConsumer {
    name: String,
    tx: Mutex<Option<mpsc::Sender<StoredEventRecord>>>,
}

impl ChannelConsumer {
    fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

#[async_trait]
impl Consumer for ChannelConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &StoredEventRecord) -> std::result::Result<(), HandlerError> {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(tx) = tx {
            // a closed receiver means the feed was dropped; its session is stopping
            let _ = tx.send(event.clone()).await;
        }
        Ok(())
    }
}

pub struct EventFeed {
    rx: ReceiverStream<StoredEventRecord>,
    session: ConsumerSession,
}

impl EventFeed {
    pub(crate) fn attach(coordinator: &SubscriptionCoordinator, capacity: usize) -> Result<Self> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let name = format!("{}-feed-{}", coordinator.name(), coordinator.sessions().len());
        let consumer = Arc::new(ChannelConsumer {
            name,
            tx: Mutex::new(Some(tx)),
        });
        let session = coordinator.add_consumer(consumer.clone())?;

        // end the stream once the session can no longer produce
        let watched = session.clone();
        tokio::spawn(async move {
            watched.wait().await;
            consumer.close();
        });

        Ok(Self {
            rx: ReceiverStream::new(rx),
            session,
        })
    }

    pub fn session(&self) -> &ConsumerSession {
        &self.session
    }

    /// Stop the backing session. Records already in the channel can still be
    /// read.
    pub fn close(&mut self) {
        self.session.request_stop();
    }
}

impl Stream for EventFeed {
    type Item = StoredEventRecord;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

impl Drop for EventFeed {
    fn drop(&mut self) {
        self.session.request_stop();
    }
}
