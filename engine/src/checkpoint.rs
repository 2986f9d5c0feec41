// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Checkpoint hooks.
//!
//! The host decides where bookmarks live; the engine decides when to hand
//! them over. `load` runs once when a subscription starts, `save` whenever
//! the [`CheckpointCadence`] says so and once more when it finishes.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use eventrail_core::SubscriptionPosition;
use tokio::time::Instant;

use crate::config::CheckpointSettings;
use crate::errors::{EngineError, Result};

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Where `subscription` should resume, if it ran before.
    async fn load(&self, subscription: &str) -> Result<Option<SubscriptionPosition>>;

    async fn save(&self, subscription: &str, position: SubscriptionPosition) -> Result<()>;
}

/// Keeps one row per subscription plus every save, in order.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    rows: Mutex<HashMap<String, SubscriptionPosition>>,
    history: Mutex<Vec<(String, SubscriptionPosition)>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_position(subscription: impl Into<String>, position: SubscriptionPosition) -> Self {
        let store = Self::new();
        lock(&store.rows).insert(subscription.into(), position);
        store
    }

    pub fn get(&self, subscription: &str) -> Option<SubscriptionPosition> {
        lock(&self.rows).get(subscription).copied()
    }

    /// Every position saved for `subscription`, oldest first.
    pub fn saves(&self, subscription: &str) -> Vec<SubscriptionPosition> {
        lock(&self.history)
            .iter()
            .filter(|(name, _)| name == subscription)
            .map(|(_, position)| *position)
            .collect()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, subscription: &str) -> Result<Option<SubscriptionPosition>> {
        Ok(self.get(subscription))
    }

    async fn save(&self, subscription: &str, position: SubscriptionPosition) -> Result<()> {
        lock(&self.rows).insert(subscription.to_string(), position);
        lock(&self.history).push((subscription.to_string(), position));
        Ok(())
    }
}

/// JSON file holding `{subscription: position}`. Saves rewrite the file
/// through a temporary sibling and a rename.
pub struct FileCheckpointStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileCheckpointStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<BTreeMap<String, SubscriptionPosition>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| EngineError::Checkpoint(format!("{}: {}", self.path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(EngineError::Checkpoint(e.to_string())),
        }
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, subscription: &str) -> Result<Option<SubscriptionPosition>> {
        Ok(self.read_all().await?.get(subscription).copied())
    }

    async fn save(&self, subscription: &str, position: SubscriptionPosition) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut rows = self.read_all().await?;
        rows.insert(subscription.to_string(), position);

        let json = serde_json::to_vec_pretty(&rows).map_err(|e| EngineError::Checkpoint(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| EngineError::Checkpoint(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| EngineError::Checkpoint(e.to_string()))?;
        Ok(())
    }
}

/// Count-based, time-based, or whichever comes first when both are set.
/// Either trigger resets both.
#[derive(Clone, Debug)]
pub struct CheckpointCadence {
    every_events: Option<u64>,
    interval: Option<Duration>,
    saved_count: u64,
    saved_at: Instant,
}

impl CheckpointCadence {
    pub fn new(settings: &CheckpointSettings, now: Instant) -> Self {
        Self {
            every_events: settings.every_events,
            interval: settings.interval(),
            saved_count: 0,
            saved_at: now,
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub fn is_enabled(&self) -> bool {
        self.every_events.is_some() || self.interval.is_some()
    }

    /// `count` is the number of events handled so far.
    pub fn is_due(&self, count: u64, now: Instant) -> bool {
        if count <= self.saved_count {
            return false;
        }
        let by_count = self
            .every_events
            .map_or(false, |n| count - self.saved_count >= n);
        let by_time = self
            .interval
            .map_or(false, |interval| now.duration_since(self.saved_at) >= interval);
        by_count || by_time
    }

    pub fn mark_saved(&mut self, count: u64, now: Instant) {
        self.saved_count = count;
        self.saved_at = now;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
