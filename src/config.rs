// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Configuration constants and acknowledgement retry settings.

use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Events fetched per historic read page.
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Base delay before the first reconnect attempt.
pub const DEFAULT_RECONNECT_BASE_MS: u64 = 1_000;

/// Reconnect attempts allowed before a subscription stops for good.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;

/// Capacity of a store's live broadcast buffer.
pub const DEFAULT_LIVE_CAPACITY: usize = 1024;

/// What happens to an event whose retries are exhausted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TerminalAction {
    /// Move the event to the backend's failure queue for manual replay.
    #[default]
    Park,
    /// Drop the event and move on.
    Skip,
}

/// Retry behaviour for ack/nack consumers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retry_count: u32,
    pub delay_schedule_ms: Vec<u64>,
    pub terminal_action: TerminalAction,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retry_count: 3,
            delay_schedule_ms: vec![500, 2_000, 10_000],
            terminal_action: TerminalAction::Park,
        }
    }
}

impl RetrySettings {
    pub fn new(max_retry_count: u32, delay_schedule: &[Duration], terminal_action: TerminalAction) -> Self {
        Self {
            max_retry_count,
            delay_schedule_ms: delay_schedule.iter().map(|d| d.as_millis() as u64).collect(),
            terminal_action,
        }
    }

    /// Delay before retry number `retry_number`.
    ///
    /// Retry 0 is the initial attempt and never waits. Retries past the end
    /// of the schedule reuse its last entry; an empty schedule never waits.
    pub fn delay_for(&self, retry_number: u32) -> Duration {
        if retry_number == 0 || self.delay_schedule_ms.is_empty() {
            return Duration::ZERO;
        }
        let idx = (retry_number as usize).min(self.delay_schedule_ms.len()) - 1;
        Duration::from_millis(self.delay_schedule_ms[idx])
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_retry_count > 0 && self.delay_schedule_ms.is_empty() {
            return Err(CoreError::InvalidSettings(
                "delay_schedule_ms must not be empty when retries are enabled".into(),
            ));
        }
        Ok(())
    }
}
