// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Acknowledgement Retry Policy
//!
//! Used instead of a direct handler call for consumers that confirm every
//! event back to the backend. A failing handler is retried on the
//! [`RetrySettings`] schedule; once retries run out the event is nacked with
//! the terminal action. If that nack fails too, a `Stop` nack is sent and the
//! error goes up so the owning session faults.

use std::sync::Arc;

use eventrail_core::{RetrySettings, StoredEventRecord, TerminalAction};
use eventrail_store::{Acknowledger, NackAction};

use crate::consumer::Consumer;
use crate::errors::{EngineError, Result};

/// How an event left the policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckOutcome {
    Acked { attempts: u32 },
    Parked { attempts: u32 },
    Skipped { attempts: u32 },
}

impl AckOutcome {
    pub fn attempts(&self) -> u32 {
        match *self {
            AckOutcome::Acked { attempts } | AckOutcome::Parked { attempts } | AckOutcome::Skipped { attempts } => {
                attempts
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct RetryState {
    retry_number: u32,
}

impl RetryState {
    fn attempts(&self) -> u32 {
        self.retry_number + 1
    }
}

#[derive(Clone)]
pub struct AckRetryPolicy {
    settings: RetrySettings,
    acknowledger: Arc<dyn Acknowledger>,
}

impl AckRetryPolicy {
    pub fn new(settings: RetrySettings, acknowledger: Arc<dyn Acknowledger>) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings, acknowledger })
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    pub async fn handle(&self, consumer: &dyn Consumer, record: &StoredEventRecord) -> Result<AckOutcome> {
        let mut state = RetryState::default();
        loop {
            let failure = match consumer.handle(record).await {
                Ok(()) => {
                    self.acknowledger.ack(record).await?;
                    return Ok(AckOutcome::Acked {
                        attempts: state.attempts(),
                    });
                }
                Err(e) => e,
            };

            metrics::counter!("eventrail_handler_failures_total", 1, "consumer" => consumer.name().to_string());
            let next = state.retry_number + 1;
            if next <= self.settings.max_retry_count {
                let delay = self.settings.delay_for(next);
                tracing::warn!(
                    consumer = consumer.name(),
                    position = %record.global_position,
                    retry = next,
                    "Handler failed: {}. Retrying in {:?}",
                    failure,
                    delay
                );
                metrics::counter!("eventrail_ack_retries_total", 1, "consumer" => consumer.name().to_string());
                tokio::time::sleep(delay).await;
                state.retry_number = next;
                continue;
            }

            return self.give_up(consumer, record, state, &failure.to_string()).await;
        }
    }

    async fn give_up(
        &self,
        consumer: &dyn Consumer,
        record: &StoredEventRecord,
        state: RetryState,
        reason: &str,
    ) -> Result<AckOutcome> {
        let (action, outcome, metric) = match self.settings.terminal_action {
            TerminalAction::Park => (
                NackAction::Park,
                AckOutcome::Parked {
                    attempts: state.attempts(),
                },
                "eventrail_events_parked_total",
            ),
            TerminalAction::Skip => (
                NackAction::Skip,
                AckOutcome::Skipped {
                    attempts: state.attempts(),
                },
                "eventrail_events_skipped_total",
            ),
        };

        match self.acknowledger.nack(record, action, reason).await {
            Ok(()) => {
                tracing::error!(
                    consumer = consumer.name(),
                    position = %record.global_position,
                    attempts = state.attempts(),
                    ?action,
                    "Giving up on event: {}",
                    reason
                );
                metrics::counter!(metric, 1, "consumer" => consumer.name().to_string());
                Ok(outcome)
            }
            Err(nack_error) => {
                tracing::error!(
                    consumer = consumer.name(),
                    position = %record.global_position,
                    "Terminal nack failed: {}. Requesting stop",
                    nack_error
                );
                if let Err(stop_error) = self.acknowledger.nack(record, NackAction::Stop, reason).await {
                    tracing::error!(consumer = consumer.name(), "Stop nack failed: {}", stop_error);
                }
                Err(EngineError::Nack(nack_error.to_string()))
            }
        }
    }
}

impl std::fmt::Debug for AckRetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckRetryPolicy").field("settings", &self.settings).finish()
    }
}
