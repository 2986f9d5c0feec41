// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Subscription Coordinator
//!
//! One per named subscription. Owns a supervised Log Source and one
//! [`ConsumerSession`] per registered consumer; every delivered event is
//! pushed to every session (fan-out, not partitioning).
//!
//! Task layout once started:
//! - `run`: drives the [`ReconnectSupervisor`] and, when it stops for good,
//!   moves every session to `Stopped` or `Faulted`
//! - `checkpoint`: wakes on session progress or the cadence timer and hands
//!   the host the lowest processed position (only with a checkpoint store)

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use eventrail_core::{LogPosition, RetrySettings, Status, StoredEventRecord, SubscriptionPosition};
use eventrail_store::{Acknowledger, DropReason, ReadDirection, ReadFrom, StoreError};
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::checkpoint::{CheckpointCadence, CheckpointStore};
use crate::config::SubscriptionConfig;
use crate::consumer::Consumer;
use crate::errors::{EngineError, Result};
use crate::feed::EventFeed;
use crate::retry::AckRetryPolicy;
use crate::session::{ConsumerSession, SessionReport};
use crate::source::{EventLogSource, SharedStore, SourceSink};
use crate::supervisor::{ReconnectSupervisor, StopReason, SupervisorState};

/// Point-in-time view of a subscription for dashboards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubscriptionReport {
    pub name: String,
    pub target: String,
    pub status: Status,
    pub last_error: Option<String>,
    pub checkpoint: Option<SubscriptionPosition>,
    pub consumers: Vec<SessionReport>,
}

struct CoordinatorInner {
    config: SubscriptionConfig,
    store: SharedStore,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    sessions: Mutex<Vec<ConsumerSession>>,
    status: watch::Sender<Status>,
    error: Mutex<Option<Arc<EngineError>>>,
    supervisor: Mutex<Option<watch::Receiver<SupervisorState>>>,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
    progress: Arc<Notify>,
    last_checkpoint: Mutex<Option<SubscriptionPosition>>,
    completed: watch::Sender<bool>,
    span: tracing::Span,
}

pub struct SubscriptionCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl SubscriptionCoordinator {
    pub fn new(store: SharedStore, config: SubscriptionConfig, span: tracing::Span) -> Result<Self> {
        Self::build(store, config, None, span)
    }

    /// Like [`SubscriptionCoordinator::new`], resuming from and reporting
    /// progress to `checkpoints`.
    pub fn with_checkpoints(
        store: SharedStore,
        config: SubscriptionConfig,
        checkpoints: Arc<dyn CheckpointStore>,
        span: tracing::Span,
    ) -> Result<Self> {
        Self::build(store, config, Some(checkpoints), span)
    }

    fn build(
        store: SharedStore,
        config: SubscriptionConfig,
        checkpoints: Option<Arc<dyn CheckpointStore>>,
        span: tracing::Span,
    ) -> Result<Self> {
        config.validate()?;
        let (status, _) = watch::channel(Status::Uninitialized);
        let (completed, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(CoordinatorInner {
                config,
                store,
                checkpoints,
                sessions: Mutex::new(Vec::new()),
                status,
                error: Mutex::new(None),
                supervisor: Mutex::new(None),
                cancel: Mutex::new(None),
                task: Mutex::new(None),
                progress: Arc::new(Notify::new()),
                last_checkpoint: Mutex::new(None),
                completed,
                span,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &SubscriptionConfig {
        &self.inner.config
    }

    pub fn add_consumer(&self, consumer: Arc<dyn Consumer>) -> Result<ConsumerSession> {
        self.register(consumer, None)
    }

    /// Add a consumer whose events are acked to `acknowledger` and retried
    /// per `settings` on failure.
    pub fn add_ack_consumer(
        &self,
        consumer: Arc<dyn Consumer>,
        settings: RetrySettings,
        acknowledger: Arc<dyn Acknowledger>,
    ) -> Result<ConsumerSession> {
        let policy = AckRetryPolicy::new(settings, acknowledger)?;
        self.register(consumer, Some(policy))
    }

    /// A pull-based view of this subscription holding at most `capacity`
    /// unread events.
    pub fn feed(&self, capacity: usize) -> Result<EventFeed> {
        EventFeed::attach(self, capacity)
    }

    fn register(&self, consumer: Arc<dyn Consumer>, retry: Option<AckRetryPolicy>) -> Result<ConsumerSession> {
        if self.status() != Status::Uninitialized || lock(&self.inner.cancel).is_some() {
            return Err(EngineError::AlreadyStarted(self.name().to_string()));
        }
        let span = tracing::info_span!(parent: &self.inner.span, "session", consumer = %consumer.name());
        let session = ConsumerSession::build(
            consumer,
            self.inner.config.buffer,
            retry,
            Some(self.inner.progress.clone()),
            span,
        );
        lock(&self.inner.sessions).push(session.clone());
        Ok(session)
    }

    pub fn sessions(&self) -> Vec<ConsumerSession> {
        lock(&self.inner.sessions).clone()
    }

    pub async fn start(&self) -> Result<()> {
        self.start_with_cancellation(CancellationToken::new()).await
    }

    /// Start delivering. Cancelling `cancel` stops reads, the live feed and
    /// every drain loop.
    pub async fn start_with_cancellation(&self, cancel: CancellationToken) -> Result<()> {
        let inner = &self.inner;
        {
            let mut current = lock(&inner.cancel);
            if current.is_some() || self.status() != Status::Uninitialized {
                return Err(EngineError::AlreadyStarted(self.name().to_string()));
            }
            *current = Some(cancel.clone());
        }

        let from = match inner.resume_point().await {
            Ok(from) => from,
            Err(e) => {
                lock(&inner.cancel).take();
                return Err(e);
            }
        };

        let sessions = self.sessions();
        for session in &sessions {
            if let Err(e) = session.initialize().await {
                tracing::error!(parent: &inner.span, consumer = session.name(), "Initialization failed: {}", e);
                continue;
            }
            if let Err(e) = session.start() {
                tracing::warn!(parent: &inner.span, consumer = session.name(), "Not starting session: {}", e);
            }
        }

        let source = EventLogSource::new(
            inner.store.clone(),
            inner.config.target.clone(),
            inner.config.page_size,
            inner.config.require_stream_exists,
            tracing::info_span!(parent: &inner.span, "source"),
        );
        let supervisor = ReconnectSupervisor::new(
            source,
            inner.config.reconnect.clone(),
            tracing::info_span!(parent: &inner.span, "supervisor"),
        );
        *lock(&inner.supervisor) = Some(supervisor.watch_state());

        tracing::info!(
            parent: &inner.span,
            target = %inner.config.target.name(),
            from = ?from,
            consumers = sessions.len(),
            "Starting subscription"
        );
        let task = tokio::spawn(run(inner.clone(), supervisor, sessions, from, cancel).instrument(inner.span.clone()));
        *lock(&inner.task) = Some(task);
        Ok(())
    }

    /// Cancel and wait until every task has finished.
    pub async fn stop(&self) {
        let cancel = lock(&self.inner.cancel).clone();
        match cancel {
            Some(cancel) => {
                cancel.cancel();
                let task = lock(&self.inner.task).take();
                if let Some(task) = task {
                    if let Err(e) = task.await {
                        tracing::error!(parent: &self.inner.span, "Subscription task panicked: {}", e);
                    }
                }
                self.wait_for_completed().await;
            }
            None => {
                for session in self.sessions() {
                    session.stop().await;
                }
                self.inner.set_status(Status::Stopped);
                self.inner.completed.send_replace(true);
            }
        }
    }

    /// Resolves once the subscription has stopped or faulted, with its final
    /// status.
    pub async fn wait_for_completed(&self) -> Status {
        let mut completed = self.inner.completed.subscribe();
        let _ = completed.wait_for(|done| *done).await;
        self.status()
    }

    /// Aggregate status. A stopped or faulted subscription reports that;
    /// otherwise the least advanced running session decides; once every
    /// session is done the result is `Faulted` if any of them faulted.
    pub fn status(&self) -> Status {
        let own = *self.inner.status.borrow();
        if own.is_terminal() {
            return own;
        }
        let sessions = lock(&self.inner.sessions);
        if sessions.is_empty() {
            return own;
        }

        let statuses: Vec<Status> = sessions.iter().map(|s| s.status()).collect();
        let running = statuses.iter().filter(|s| !s.is_terminal()).min_by_key(|s| rank(**s));
        match running {
            Some(status) => *status,
            None if statuses.contains(&Status::Faulted) => Status::Faulted,
            None => Status::Stopped,
        }
    }

    pub fn error(&self) -> Option<Arc<EngineError>> {
        lock(&self.inner.error).clone()
    }

    pub fn supervisor_state(&self) -> Option<SupervisorState> {
        lock(&self.inner.supervisor).as_ref().map(|rx| *rx.borrow())
    }

    /// Lowest position every still-running session has handled.
    pub fn checkpoint_position(&self) -> Option<SubscriptionPosition> {
        self.inner.checkpoint_position(&attached(&self.sessions()))
    }

    pub fn report(&self) -> SubscriptionReport {
        SubscriptionReport {
            name: self.name().to_string(),
            target: self.inner.config.target.name().to_string(),
            status: self.status(),
            last_error: self.error().map(|e| e.to_string()),
            checkpoint: *lock(&self.inner.last_checkpoint),
            consumers: self.sessions().iter().map(|s| s.report()).collect(),
        }
    }
}

fn rank(status: Status) -> u8 {
    match status {
        Status::Uninitialized => 0,
        Status::CatchingUp => 1,
        Status::Live => 2,
        Status::Stopped => 3,
        Status::Faulted => 4,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CoordinatorInner {
    fn set_status(&self, next: Status) {
        self.status.send_if_modified(|current| {
            if current.can_move_to(next) {
                *current = next;
                true
            } else {
                false
            }
        });
    }

    async fn resume_point(&self) -> Result<Option<LogPosition>> {
        if let Some(checkpoints) = &self.checkpoints {
            if let Some(position) = checkpoints.load(&self.config.name).await? {
                tracing::info!(parent: &self.span, %position, "Resuming from checkpoint");
                *lock(&self.last_checkpoint) = Some(position);
                return Ok(Some(position.for_target(&self.config.target)));
            }
        }
        match self.config.start_from.exclusive_bound() {
            Some(LogPosition::End) => self.current_end().await,
            other => Ok(other),
        }
    }

    /// Pin "from the end" to the last position now, so a reconnect resumes
    /// from there instead of skipping what was appended meanwhile.
    async fn current_end(&self) -> Result<Option<LogPosition>> {
        let target = &self.config.target;
        match self.store.read(target, ReadDirection::Backward, ReadFrom::End, 1).await {
            Ok(slice) => Ok(slice.records.first().map(|r| target.position_of(r))),
            Err(StoreError::StreamNotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Lowest processed position over `sessions`, which the caller has
    /// already narrowed with [`attached`].
    fn checkpoint_position(&self, sessions: &[ConsumerSession]) -> Option<SubscriptionPosition> {
        let mut lowest: Option<SubscriptionPosition> = None;
        for session in sessions {
            // a healthy session with nothing handled yet holds the checkpoint back
            let position = session.processed_position()?;
            lowest = match lowest {
                Some(current) if current.for_target(&self.config.target) <= position.for_target(&self.config.target) => {
                    Some(current)
                }
                _ => Some(position),
            };
        }
        lowest
    }

    fn handled_by_all(&self, sessions: &[ConsumerSession]) -> u64 {
        sessions
            .iter()
            .map(|s| s.handled())
            .min()
            .unwrap_or(0)
    }

    async fn save_checkpoint(&self, sessions: &[ConsumerSession]) -> bool {
        let Some(checkpoints) = &self.checkpoints else {
            return false;
        };
        let Some(position) = self.checkpoint_position(sessions) else {
            return false;
        };
        if *lock(&self.last_checkpoint) == Some(position) {
            return false;
        }
        match checkpoints.save(&self.config.name, position).await {
            Ok(()) => {
                tracing::debug!(%position, "Checkpoint saved");
                metrics::counter!("eventrail_checkpoints_total", 1, "subscription" => self.config.name.clone());
                *lock(&self.last_checkpoint) = Some(position);
                true
            }
            Err(e) => {
                tracing::warn!(%position, "Checkpoint failed: {}", e);
                false
            }
        }
    }

    async fn finish(&self, reason: StopReason, sessions: &[ConsumerSession]) {
        match reason {
            StopReason::Completed => {
                tracing::info!("Log ended the subscription, draining sessions");
                futures::future::join_all(sessions.iter().map(|s| s.complete())).await;
                self.set_status(Status::Stopped);
            }
            StopReason::Disposed => {
                futures::future::join_all(sessions.iter().map(|s| s.stop())).await;
                self.set_status(Status::Stopped);
                tracing::info!("Subscription stopped");
            }
            StopReason::SubscriberFault(error) | StopReason::Exhausted(error) | StopReason::Fatal(error) => {
                tracing::error!("Subscription faulted: {}", error);
                for session in sessions {
                    session.fault(EngineError::SubscriptionFailed {
                        subscription: self.config.name.clone(),
                        message: error.to_string(),
                    });
                }
                *lock(&self.error) = Some(Arc::new(error));
                self.set_status(Status::Faulted);
            }
        }
    }
}

async fn run(
    inner: Arc<CoordinatorInner>,
    supervisor: ReconnectSupervisor,
    sessions: Vec<ConsumerSession>,
    from: Option<LogPosition>,
    cancel: CancellationToken,
) {
    let checkpointing = spawn_checkpointing(&inner, &sessions);

    let sink = FanOutSink {
        inner: inner.as_ref(),
        sessions: &sessions,
    };
    let reason = supervisor.run(from, &sink, &cancel).await;
    // sessions that stopped or faulted on their own no longer count
    let finishing = attached(&sessions);
    inner.finish(reason, &sessions).await;

    if let Some((stop, task)) = checkpointing {
        stop.cancel();
        if let Err(e) = task.await {
            tracing::error!("Checkpoint task panicked: {}", e);
        }
    }
    inner.save_checkpoint(&finishing).await;
    inner.completed.send_replace(true);
}

/// Sessions still fed by the subscription. One that stopped or faulted while
/// the subscription runs (a dropped [`EventFeed`], a poison event) has left
/// and must not hold the checkpoint back.
fn attached(sessions: &[ConsumerSession]) -> Vec<ConsumerSession> {
    sessions.iter().filter(|s| !s.status().is_terminal()).cloned().collect()
}

fn spawn_checkpointing(
    inner: &Arc<CoordinatorInner>,
    sessions: &[ConsumerSession],
) -> Option<(CancellationToken, JoinHandle<()>)> {
    inner.checkpoints.as_ref()?;
    let mut cadence = CheckpointCadence::new(&inner.config.checkpoint, Instant::now());
    if !cadence.is_enabled() {
        return None;
    }

    let stop = CancellationToken::new();
    let task = {
        let inner = inner.clone();
        let sessions = sessions.to_vec();
        let stop = stop.clone();
        let span = tracing::info_span!(parent: &inner.span, "checkpoint");
        tokio::spawn(
            async move {
                let mut ticker = cadence.interval().map(tokio::time::interval);
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = inner.progress.notified() => {}
                        _ = tick(&mut ticker) => {}
                    }
                    let active = attached(&sessions);
                    let count = inner.handled_by_all(&active);
                    let now = Instant::now();
                    if cadence.is_due(count, now) && inner.save_checkpoint(&active).await {
                        cadence.mark_saved(count, now);
                    }
                }
            }
            .instrument(span),
        )
    };
    Some((stop, task))
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Pushes every event from the source into every session.
struct FanOutSink<'a> {
    inner: &'a CoordinatorInner,
    sessions: &'a [ConsumerSession],
}

#[async_trait]
impl SourceSink for FanOutSink<'_> {
    async fn on_catching_up(&self) {
        self.inner.set_status(Status::CatchingUp);
        for session in self.sessions {
            session.mark_catching_up();
        }
    }

    async fn on_event(&self, record: StoredEventRecord, position: LogPosition) -> Result<()> {
        for session in self.sessions {
            session.notify_event_received(record.clone(), position).await;
        }
        Ok(())
    }

    async fn on_live(&self) {
        self.inner.set_status(Status::Live);
        for session in self.sessions {
            session.mark_live();
        }
    }

    async fn on_dropped(&self, reason: DropReason, error: Option<&EngineError>) {
        match error {
            Some(e) => tracing::debug!(%reason, "Source dropped: {}", e),
            None => tracing::debug!(%reason, "Source dropped"),
        }
    }
}
