// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Consumer Session
//!
//! One buffer and one drain task per consumer. The Log Source pushes into the
//! buffer through [`ConsumerSession::notify_event_received`]; the drain task
//! pulls in FIFO order and awaits each handler call before pulling the next.
//!
//! With [`BufferPolicy::Unbounded`] pushing never waits on the handler, so a
//! slow session cannot hold up the source or its siblings. With
//! [`BufferPolicy::Bounded`] a full buffer makes the push wait.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use eventrail_core::{LogPosition, Status, StoredEventRecord, SubscriptionPosition};
use serde::Serialize;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::BufferPolicy;
use crate::consumer::Consumer;
use crate::errors::{EngineError, Result};
use crate::retry::AckRetryPolicy;

#[derive(Debug)]
struct Delivery {
    record: StoredEventRecord,
    position: LogPosition,
}

#[derive(Clone)]
enum BufferSender {
    Unbounded(mpsc::UnboundedSender<Delivery>),
    Bounded(mpsc::Sender<Delivery>),
}

enum BufferReceiver {
    Unbounded(mpsc::UnboundedReceiver<Delivery>),
    Bounded(mpsc::Receiver<Delivery>),
}

impl BufferReceiver {
    async fn recv(&mut self) -> Option<Delivery> {
        match self {
            BufferReceiver::Unbounded(rx) => rx.recv().await,
            BufferReceiver::Bounded(rx) => rx.recv().await,
        }
    }
}

fn buffer(policy: BufferPolicy) -> (BufferSender, BufferReceiver) {
    match policy {
        BufferPolicy::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (BufferSender::Unbounded(tx), BufferReceiver::Unbounded(rx))
        }
        BufferPolicy::Bounded { capacity } => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (BufferSender::Bounded(tx), BufferReceiver::Bounded(rx))
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Point-in-time view of a session for dashboards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub consumer: String,
    pub status: Status,
    pub last_error: Option<String>,
    pub pending: usize,
    pub handled: u64,
    pub processed: Option<SubscriptionPosition>,
}

struct SessionInner {
    consumer: Arc<dyn Consumer>,
    retry: Option<AckRetryPolicy>,
    sender: Mutex<Option<BufferSender>>,
    receiver: Mutex<Option<BufferReceiver>>,
    status: watch::Sender<Status>,
    error: Mutex<Option<Arc<EngineError>>>,
    pending: AtomicUsize,
    handled: AtomicU64,
    processed: Mutex<Option<SubscriptionPosition>>,
    initialized: AtomicBool,
    progress: Option<Arc<Notify>>,
    task: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    span: tracing::Span,
}

/// Handle to one consumer's buffer and drain task. Clones share the session.
#[derive(Clone)]
pub struct ConsumerSession {
    inner: Arc<SessionInner>,
}

impl ConsumerSession {
    pub fn new(consumer: Arc<dyn Consumer>, buffer: BufferPolicy, span: tracing::Span) -> Self {
        Self::build(consumer, buffer, None, None, span)
    }

    /// A session whose handler calls go through `policy`.
    pub fn with_retry(
        consumer: Arc<dyn Consumer>,
        buffer: BufferPolicy,
        policy: AckRetryPolicy,
        span: tracing::Span,
    ) -> Self {
        Self::build(consumer, buffer, Some(policy), None, span)
    }

    pub(crate) fn build(
        consumer: Arc<dyn Consumer>,
        policy: BufferPolicy,
        retry: Option<AckRetryPolicy>,
        progress: Option<Arc<Notify>>,
        span: tracing::Span,
    ) -> Self {
        let (tx, rx) = buffer(policy);
        let (status, _) = watch::channel(Status::Uninitialized);
        Self {
            inner: Arc::new(SessionInner {
                consumer,
                retry,
                sender: Mutex::new(Some(tx)),
                receiver: Mutex::new(Some(rx)),
                status,
                error: Mutex::new(None),
                pending: AtomicUsize::new(0),
                handled: AtomicU64::new(0),
                processed: Mutex::new(None),
                initialized: AtomicBool::new(false),
                progress,
                task: Mutex::new(None),
                cancel: CancellationToken::new(),
                span,
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.consumer.name()
    }

    pub fn status(&self) -> Status {
        *self.inner.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<Status> {
        self.inner.status.subscribe()
    }

    pub fn error(&self) -> Option<Arc<EngineError>> {
        lock(&self.inner.error).clone()
    }

    /// Events buffered and not yet pulled by the drain task.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    pub fn handled(&self) -> u64 {
        self.inner.handled.load(Ordering::SeqCst)
    }

    /// Position of the last event the handler finished.
    pub fn processed_position(&self) -> Option<SubscriptionPosition> {
        *lock(&self.inner.processed)
    }

    pub fn report(&self) -> SessionReport {
        SessionReport {
            consumer: self.name().to_string(),
            status: self.status(),
            last_error: self.error().map(|e| e.to_string()),
            pending: self.pending(),
            handled: self.handled(),
            processed: self.processed_position(),
        }
    }

    /// Run the consumer's `on_initialize` once. Later calls do nothing.
    pub async fn initialize(&self) -> Result<()> {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.inner.consumer.on_initialize().await {
            let error = EngineError::handler(self.name(), &e);
            self.inner.fault(EngineError::handler(self.name(), &e));
            return Err(error);
        }
        Ok(())
    }

    /// Spawn the drain task. Does nothing if it already runs; refused once
    /// the session has stopped or faulted.
    pub fn start(&self) -> Result<()> {
        match self.status() {
            Status::Faulted => return Err(EngineError::SessionFaulted(self.name().to_string())),
            Status::Stopped => return Err(EngineError::SessionStopped(self.name().to_string())),
            _ => {}
        }

        let mut task = lock(&self.inner.task);
        if task.is_some() {
            return Ok(());
        }
        let Some(rx) = lock(&self.inner.receiver).take() else {
            return Ok(());
        };
        self.inner.transition(Status::CatchingUp);

        let inner = self.inner.clone();
        *task = Some(tokio::spawn(drain(inner, rx).instrument(self.inner.span.clone())));
        Ok(())
    }

    pub fn mark_catching_up(&self) {
        self.inner.transition(Status::CatchingUp);
    }

    pub fn mark_live(&self) {
        self.inner.transition(Status::Live);
    }

    /// Buffer one event. Returns `false` once the session no longer accepts
    /// events.
    pub async fn notify_event_received(&self, record: StoredEventRecord, position: LogPosition) -> bool {
        let sender = match lock(&self.inner.sender).as_ref() {
            Some(sender) => sender.clone(),
            None => return false,
        };
        if self.status().is_terminal() {
            return false;
        }

        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        let delivery = Delivery { record, position };
        let sent = match sender {
            BufferSender::Unbounded(tx) => tx.send(delivery).is_ok(),
            BufferSender::Bounded(tx) => tokio::select! {
                _ = self.inner.cancel.cancelled() => false,
                sent = tx.send(delivery) => sent.is_ok(),
            },
        };
        if !sent {
            self.inner.pending.fetch_sub(1, Ordering::SeqCst);
        }
        sent
    }

    /// No more events are coming: drain what is buffered, then stop.
    pub async fn complete(&self) {
        lock(&self.inner.sender).take();
        if lock(&self.inner.task).is_none() {
            self.inner.transition(Status::Stopped);
        }
        self.join().await;
    }

    /// Stop draining now. Buffered events stay undelivered.
    pub async fn stop(&self) {
        self.request_stop();
        self.join().await;
    }

    /// [`ConsumerSession::stop`] without waiting for the drain task.
    pub fn request_stop(&self) {
        if self.inner.transition(Status::Stopped) {
            tracing::info!(parent: &self.inner.span, pending = self.pending(), "Session stopped");
        }
        lock(&self.inner.sender).take();
        self.inner.cancel.cancel();
    }

    pub fn fault(&self, error: EngineError) {
        self.inner.fault(error);
    }

    /// Resolves once the session is `Stopped` or `Faulted`.
    pub async fn wait(&self) {
        let mut status = self.inner.status.subscribe();
        let _ = status.wait_for(|s| s.is_terminal()).await;
    }

    async fn join(&self) {
        let handle = lock(&self.inner.task).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(parent: &self.inner.span, "Drain task panicked: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for ConsumerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerSession")
            .field("consumer", &self.name())
            .field("status", &self.status())
            .field("pending", &self.pending())
            .finish()
    }
}

impl SessionInner {
    fn transition(&self, next: Status) -> bool {
        self.status.send_if_modified(|current| {
            if current.can_move_to(next) {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    fn fault(&self, error: EngineError) {
        if self.transition(Status::Faulted) {
            tracing::error!(parent: &self.span, "Session faulted: {}", error);
            *lock(&self.error) = Some(Arc::new(error));
        }
        lock(&self.sender).take();
        self.cancel.cancel();
    }

    async fn handle(&self, record: &StoredEventRecord) -> Result<()> {
        match &self.retry {
            Some(policy) => policy.handle(self.consumer.as_ref(), record).await.map(|_| ()),
            None => self
                .consumer
                .handle(record)
                .await
                .map_err(|e| EngineError::handler(self.consumer.name(), &e)),
        }
    }
}

async fn drain(inner: Arc<SessionInner>, mut rx: BufferReceiver) {
    tracing::debug!("Drain loop started");
    loop {
        let delivery = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => break,
            delivery = rx.recv() => delivery,
        };
        let Some(delivery) = delivery else {
            if inner.transition(Status::Stopped) {
                tracing::info!(handled = inner.handled.load(Ordering::SeqCst), "Session drained and stopped");
            }
            break;
        };
        inner.pending.fetch_sub(1, Ordering::SeqCst);

        let handled = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            handled = inner.handle(&delivery.record) => handled,
        };
        match handled {
            Ok(()) => {
                *lock(&inner.processed) = Some(SubscriptionPosition::of(&delivery.record));
                inner.handled.fetch_add(1, Ordering::SeqCst);
                metrics::counter!("eventrail_events_handled_total", 1, "consumer" => inner.consumer.name().to_string());
                tracing::trace!(position = %delivery.position, "Handled");
                if let Some(progress) = &inner.progress {
                    progress.notify_one();
                }
            }
            Err(e) => {
                if inner.retry.is_none() {
                    metrics::counter!("eventrail_handler_failures_total", 1, "consumer" => inner.consumer.name().to_string());
                }
                tracing::warn!(position = %delivery.position, "Handler failed: {}", e);
                inner.fault(e);
                break;
            }
        }
    }
    // whatever is left stays queued, undelivered
    *lock(&inner.receiver) = Some(rx);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::FnConsumer;
    use crate::errors::HandlerError;
    use eventrail_store::fixtures::record;
    use std::time::Duration;

    fn recording(name: &str) -> (Arc<dyn Consumer>, Arc<Mutex<Vec<u64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let consumer = {
            let seen = seen.clone();
            FnConsumer::new(name, move |r: StoredEventRecord| {
                seen.lock().unwrap().push(r.global_position.0);
                async { Ok::<(), HandlerError>(()) }
            })
        };
        let consumer: Arc<dyn Consumer> = Arc::new(consumer);
        (consumer, seen)
    }

    async fn push(session: &ConsumerSession, positions: std::ops::Range<u64>) {
        for p in positions {
            assert!(session.notify_event_received(record("s", p, p), LogPosition::At(p)).await);
        }
    }

    #[tokio::test]
    async fn test_drains_in_order_then_stops_on_complete() {
        let (consumer, seen) = recording("c");
        let session = ConsumerSession::new(consumer, BufferPolicy::Unbounded, tracing::Span::none());
        session.initialize().await.unwrap();
        push(&session, 0..5).await;
        session.start().unwrap();
        push(&session, 5..8).await;

        session.complete().await;

        assert_eq!(*seen.lock().unwrap(), (0..8).collect::<Vec<_>>());
        assert_eq!(session.status(), Status::Stopped);
        assert_eq!(session.handled(), 8);
        assert_eq!(session.processed_position().map(|p| p.global.0), Some(7));
        assert!(!session.notify_event_received(record("s", 8, 8), LogPosition::At(8)).await);
    }

    #[tokio::test]
    async fn test_handler_failure_faults_and_keeps_backlog() {
        let consumer = FnConsumer::new("picky", |r: StoredEventRecord| async move {
            if r.global_position.0 == 1 {
                Err::<(), HandlerError>("cannot handle".into())
            } else {
                Ok(())
            }
        });
        let session = ConsumerSession::new(Arc::new(consumer), BufferPolicy::Unbounded, tracing::Span::none());
        push(&session, 0..4).await;
        session.start().unwrap();
        session.wait().await;

        assert_eq!(session.status(), Status::Faulted);
        assert!(session.error().unwrap().to_string().contains("cannot handle"));
        assert_eq!(session.processed_position().map(|p| p.global.0), Some(0));
        assert_eq!(session.pending(), 2);
        assert!(!session.notify_event_received(record("s", 9, 9), LogPosition::At(9)).await);
        assert!(matches!(session.start(), Err(EngineError::SessionFaulted(_))));
    }

    #[tokio::test]
    async fn test_lifecycle_calls_are_idempotent() {
        let (consumer, _) = recording("c");
        let session = ConsumerSession::new(consumer, BufferPolicy::Unbounded, tracing::Span::none());
        session.initialize().await.unwrap();
        session.initialize().await.unwrap();
        session.start().unwrap();
        session.start().unwrap();
        session.mark_live();
        assert_eq!(session.status(), Status::Live);

        session.stop().await;
        session.stop().await;
        assert_eq!(session.status(), Status::Stopped);
        assert!(matches!(session.start(), Err(EngineError::SessionStopped(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_push_does_not_wait_for_handler() {
        let consumer = FnConsumer::new("slow", |_r: StoredEventRecord| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<(), HandlerError>(())
        });
        let session = ConsumerSession::new(Arc::new(consumer), BufferPolicy::Unbounded, tracing::Span::none());
        session.start().unwrap();

        let started = tokio::time::Instant::now();
        push(&session, 0..100).await;
        assert_eq!(started.elapsed(), Duration::ZERO);
        session.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_push_waits_for_room() {
        let consumer = FnConsumer::new("slow", |_r: StoredEventRecord| async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<(), HandlerError>(())
        });
        let session = ConsumerSession::new(
            Arc::new(consumer),
            BufferPolicy::Bounded { capacity: 2 },
            tracing::Span::none(),
        );
        session.start().unwrap();

        let started = tokio::time::Instant::now();
        push(&session, 0..6).await;
        assert!(started.elapsed() >= Duration::from_secs(2));
        session.complete().await;
        assert_eq!(session.handled(), 6);
    }

    #[tokio::test]
    async fn test_failing_initialize_faults() {
        struct Broken;

        #[async_trait::async_trait]
        impl Consumer for Broken {
            fn name(&self) -> &str {
                "broken"
            }

            async fn on_initialize(&self) -> std::result::Result<(), HandlerError> {
                Err("no database".into())
            }

            async fn handle(&self, _event: &StoredEventRecord) -> std::result::Result<(), HandlerError> {
                Ok(())
            }
        }

        let session = ConsumerSession::new(Arc::new(Broken), BufferPolicy::Unbounded, tracing::Span::none());
        assert!(session.initialize().await.is_err());
        assert_eq!(session.status(), Status::Faulted);
        assert!(session.start().is_err());
    }
}
