// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Reconnect Supervisor
//!
//! Wraps an [`EventLogSource`] and decides what each drop means:
//! - `Disposed` → stop, caller asked for it
//! - `SubscriberError` → stop, a broken consumer is not retried here
//! - `ServerError` → back off (base, 2×base, 4×base, ...) and resubscribe
//!   from the last confirmed position, up to `max_attempts` times
//!
//! `Subscribed → Dropped → (Resubscribing → Subscribed)* → Stopped`
//!
//! One loop drives every attempt, so only one is ever in flight. The last
//! confirmed position and the attempt counter live here and nowhere else.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use eventrail_core::{LogPosition, StoredEventRecord};
use eventrail_store::DropReason;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::ReconnectSettings;
use crate::errors::EngineError;
use crate::source::{EventLogSource, SourceOutcome, SourceSink};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SupervisorState {
    Idle,
    Subscribed,
    Dropped,
    Resubscribing,
    Stopped,
}

/// Why the supervisor stopped for good.
#[derive(Debug)]
pub enum StopReason {
    /// Cancelled by the caller.
    Disposed,
    /// The log ended the sequence.
    Completed,
    /// A sink callback failed.
    SubscriberFault(EngineError),
    /// Server errors outlasted the reconnect budget.
    Exhausted(EngineError),
    /// A failure retrying cannot fix.
    Fatal(EngineError),
}

impl StopReason {
    pub fn error(&self) -> Option<&EngineError> {
        match self {
            StopReason::Disposed | StopReason::Completed => None,
            StopReason::SubscriberFault(e) | StopReason::Exhausted(e) | StopReason::Fatal(e) => Some(e),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.error().is_none()
    }
}

pub struct ReconnectSupervisor {
    source: EventLogSource,
    settings: ReconnectSettings,
    state: watch::Sender<SupervisorState>,
    span: tracing::Span,
}

impl ReconnectSupervisor {
    pub fn new(source: EventLogSource, settings: ReconnectSettings, span: tracing::Span) -> Self {
        let (state, _) = watch::channel(SupervisorState::Idle);
        Self {
            source,
            settings,
            state,
            span,
        }
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    /// Keep `sink` fed from `from_exclusive` onward until a permanent stop.
    pub async fn run(
        &self,
        from_exclusive: Option<LogPosition>,
        sink: &dyn SourceSink,
        cancel: &CancellationToken,
    ) -> StopReason {
        let tracker = TrackingSink {
            inner: sink,
            confirmed: Mutex::new(from_exclusive),
            went_live: AtomicBool::new(false),
        };
        let mut attempts: u32 = 0;

        let reason = loop {
            self.set_state(SupervisorState::Subscribed);
            let outcome = self.source.subscribe(tracker.confirmed(), &tracker, cancel).await;

            if tracker.went_live.swap(false, Ordering::SeqCst) {
                attempts = 0;
            }

            let error = match outcome {
                SourceOutcome::Completed => break StopReason::Completed,
                SourceOutcome::Failed(e) => break StopReason::Fatal(e),
                SourceOutcome::Dropped { reason: DropReason::Disposed, .. } => break StopReason::Disposed,
                SourceOutcome::Dropped { reason: DropReason::SubscriberError, error } => {
                    break StopReason::SubscriberFault(error.unwrap_or_else(|| EngineError::Subscriber {
                        position: format!("{:?}", tracker.confirmed()),
                        message: "subscriber error".into(),
                    }));
                }
                SourceOutcome::Dropped { reason: DropReason::ServerError, error } => error,
            };

            self.set_state(SupervisorState::Dropped);
            let last = error.map(|e| e.to_string()).unwrap_or_else(|| "connection dropped".into());
            attempts += 1;
            if attempts > self.settings.max_attempts {
                let _enter = self.span.enter();
                tracing::error!(attempts = self.settings.max_attempts, "Giving up reconnecting: {}", last);
                break StopReason::Exhausted(EngineError::ReconnectExhausted {
                    attempts: self.settings.max_attempts,
                    last,
                });
            }

            let delay = self.settings.delay_for(attempts);
            {
                let _enter = self.span.enter();
                tracing::warn!(
                    attempt = attempts,
                    max = self.settings.max_attempts,
                    "Connection dropped ({}). Reconnecting in {:?} from {:?}",
                    last,
                    delay,
                    tracker.confirmed()
                );
            }
            metrics::counter!("eventrail_reconnect_attempts_total", 1, "target" => self.source.target().name().to_string());

            tokio::select! {
                _ = cancel.cancelled() => break StopReason::Disposed,
                _ = tokio::time::sleep(delay) => {}
            }
            self.set_state(SupervisorState::Resubscribing);
        };

        self.set_state(SupervisorState::Stopped);
        reason
    }

    fn set_state(&self, state: SupervisorState) {
        self.state.send_replace(state);
    }
}

/// Records what the downstream sink confirmed and drops anything at or
/// before it, so a resubscription never redelivers.
struct TrackingSink<'a> {
    inner: &'a dyn SourceSink,
    confirmed: Mutex<Option<LogPosition>>,
    went_live: AtomicBool,
}

impl TrackingSink<'_> {
    fn confirmed(&self) -> Option<LogPosition> {
        *self.confirmed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SourceSink for TrackingSink<'_> {
    async fn on_catching_up(&self) {
        self.inner.on_catching_up().await;
    }

    async fn on_event(&self, record: StoredEventRecord, position: LogPosition) -> Result<(), EngineError> {
        if let Some(confirmed) = self.confirmed().filter(|p| !p.is_end()) {
            if position <= confirmed {
                return Ok(());
            }
        }
        self.inner.on_event(record, position).await?;
        *self.confirmed.lock().unwrap_or_else(PoisonError::into_inner) = Some(position);
        Ok(())
    }

    async fn on_live(&self) {
        self.went_live.store(true, Ordering::SeqCst);
        self.inner.on_live().await;
    }

    async fn on_dropped(&self, reason: DropReason, error: Option<&EngineError>) {
        self.inner.on_dropped(reason, error).await;
    }
}
