// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Acknowledgement Contract
//!
//! Durable consumer groups confirm each event back to the backend. A
//! negative acknowledgement carries what the backend should do with the
//! event next.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use eventrail_core::{GlobalPosition, StoredEventRecord};

use crate::error::{Result, StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NackAction {
    /// Move to the failure queue for manual replay.
    Park,
    /// Discard.
    Skip,
    /// Redeliver later.
    Retry,
    /// Stop the consumer.
    Stop,
}

#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self, record: &StoredEventRecord) -> Result<()>;

    async fn nack(&self, record: &StoredEventRecord, action: NackAction, reason: &str) -> Result<()>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParkedEvent {
    pub record: StoredEventRecord,
    pub reason: String,
}

#[derive(Default)]
struct GroupState {
    acked: Vec<GlobalPosition>,
    parked: Vec<ParkedEvent>,
    skipped: Vec<GlobalPosition>,
    retried: Vec<GlobalPosition>,
    stop_requests: Vec<(GlobalPosition, String)>,
    fail_nacks: bool,
}

/// In-process consumer group bookkeeping.
#[derive(Default)]
pub struct MemoryPersistentGroup {
    name: String,
    state: Mutex<GroupState>,
}

impl MemoryPersistentGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(GroupState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Make every following nack fail, as a backend outage would.
    pub fn fail_nacks(&self, fail: bool) {
        self.lock().fail_nacks = fail;
    }

    pub fn acked(&self) -> Vec<GlobalPosition> {
        self.lock().acked.clone()
    }

    pub fn parked(&self) -> Vec<ParkedEvent> {
        self.lock().parked.clone()
    }

    pub fn skipped(&self) -> Vec<GlobalPosition> {
        self.lock().skipped.clone()
    }

    pub fn retried(&self) -> Vec<GlobalPosition> {
        self.lock().retried.clone()
    }

    pub fn stop_requests(&self) -> Vec<(GlobalPosition, String)> {
        self.lock().stop_requests.clone()
    }

    /// Empty the failure queue, handing its events back for replay.
    pub fn take_parked(&self) -> Vec<ParkedEvent> {
        std::mem::take(&mut self.lock().parked)
    }

    /// Highest acknowledged global position.
    pub fn checkpoint(&self) -> Option<GlobalPosition> {
        self.lock().acked.iter().max().copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GroupState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Acknowledger for MemoryPersistentGroup {
    async fn ack(&self, record: &StoredEventRecord) -> Result<()> {
        self.lock().acked.push(record.global_position);
        Ok(())
    }

    async fn nack(&self, record: &StoredEventRecord, action: NackAction, reason: &str) -> Result<()> {
        let mut state = self.lock();
        // a stop request is always recorded, the backend needs it most when failing
        if action == NackAction::Stop {
            state.stop_requests.push((record.global_position, reason.to_string()));
            return Ok(());
        }
        if state.fail_nacks {
            return Err(StoreError::Unavailable(format!("group {} refused nack", self.name)));
        }
        tracing::debug!(group = %self.name, position = %record.global_position, ?action, "nack");
        match action {
            NackAction::Park => state.parked.push(ParkedEvent {
                record: record.clone(),
                reason: reason.to_string(),
            }),
            NackAction::Skip => state.skipped.push(record.global_position),
            NackAction::Retry => state.retried.push(record.global_position),
            NackAction::Stop => {}
        }
        Ok(())
    }
}
