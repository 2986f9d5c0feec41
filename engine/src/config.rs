// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::time::Duration;

use eventrail_core::config::{DEFAULT_PAGE_SIZE, DEFAULT_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BASE_MS};
use eventrail_core::{LogTarget, StartFrom};
use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, Result};

/// How a session buffers events between the source and its handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BufferPolicy {
    /// Never blocks the source. A slow session grows its buffer.
    #[default]
    Unbounded,
    /// Blocks the source once full, which throttles every session of the
    /// subscription to the slowest one.
    Bounded { capacity: usize },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub base_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_RECONNECT_BASE_MS,
            max_attempts: DEFAULT_RECONNECT_ATTEMPTS,
        }
    }
}

impl ReconnectSettings {
    /// Delay before reconnect attempt `attempt` (1-based): base, 2×base,
    /// 4×base, ... with no upper bound.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// When the coordinator hands the host a position to persist. With both set,
/// whichever threshold is crossed first triggers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CheckpointSettings {
    pub every_events: Option<u64>,
    pub every_ms: Option<u64>,
}

impl CheckpointSettings {
    pub fn every_events(n: u64) -> Self {
        Self {
            every_events: Some(n),
            every_ms: None,
        }
    }

    pub fn every(interval: Duration) -> Self {
        Self {
            every_events: None,
            every_ms: Some(interval.as_millis() as u64),
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        self.every_ms.map(Duration::from_millis)
    }
}

/// Everything a named subscription needs, fixed at construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    pub name: String,
    pub target: LogTarget,
    pub start_from: StartFrom,
    pub page_size: usize,
    pub require_stream_exists: bool,
    pub buffer: BufferPolicy,
    pub reconnect: ReconnectSettings,
    pub checkpoint: CheckpointSettings,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            target: LogTarget::All,
            start_from: StartFrom::Start,
            page_size: DEFAULT_PAGE_SIZE,
            require_stream_exists: false,
            buffer: BufferPolicy::Unbounded,
            reconnect: ReconnectSettings::default(),
            checkpoint: CheckpointSettings::default(),
        }
    }
}

impl SubscriptionConfig {
    pub fn new(name: impl Into<String>, target: LogTarget) -> Self {
        Self {
            name: name.into(),
            target,
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(EngineError::Config("subscription name must not be empty".into()));
        }
        if self.page_size == 0 {
            return Err(EngineError::Config("page_size must be positive".into()));
        }
        if let BufferPolicy::Bounded { capacity: 0 } = self.buffer {
            return Err(EngineError::Config("bounded buffer needs a positive capacity".into()));
        }
        if self.checkpoint.every_events == Some(0) || self.checkpoint.every_ms == Some(0) {
            return Err(EngineError::Config("checkpoint thresholds must be positive".into()));
        }
        Ok(())
    }
}
