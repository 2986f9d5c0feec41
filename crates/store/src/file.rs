// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Durable Event Store
//!
//! Every append is framed into the log file and fsync'd BEFORE the records
//! become visible to readers and live feeds. On open, the file is replayed
//! into an [`InMemoryEventStore`] which then serves all reads.
//!
//! # Recovery
//! - Torn final frame → truncated away, store opens
//! - Damage with data after it → open fails
//! - Failed append → cut back off the file; if that fails too, the store
//!   refuses further appends until reopened

use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use eventrail_core::{
    AppendResult, ExpectedVersion, GlobalPosition, LogPosition, LogTarget, StoredEventRecord, StreamPosition,
    WritableEventEntry,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::memory::{InMemoryEventStore, MemoryStoreConfig};
use crate::store::{BoxLiveFeed, EventStore, ReadDirection, ReadFrom, ReadSlice};
use crate::wal;

/// On-disk body of one frame. The global position lives in the frame header.
#[derive(Serialize, Deserialize)]
struct PersistedEvent {
    stream: String,
    name: String,
    payload: Vec<u8>,
    metadata: Option<Vec<u8>>,
    stream_position: u64,
}

impl PersistedEvent {
    fn from_record(record: &StoredEventRecord) -> Self {
        Self {
            stream: record.stream.clone(),
            name: record.name.clone(),
            payload: record.payload.to_vec(),
            metadata: record.metadata.as_ref().map(|m| m.to_vec()),
            stream_position: record.stream_position.0,
        }
    }

    fn into_record(self, global: u64) -> StoredEventRecord {
        StoredEventRecord {
            stream: self.stream,
            name: self.name,
            payload: self.payload.into(),
            metadata: self.metadata.map(Into::into),
            stream_position: StreamPosition(self.stream_position),
            global_position: GlobalPosition(global),
        }
    }
}

#[derive(Clone)]
pub struct FileEventStore {
    path: PathBuf,
    /// `None` once the tail could not be rolled back.
    file: Arc<Mutex<Option<File>>>,
    index: InMemoryEventStore,
}

impl FileEventStore {
    /// Open or create a log file and rebuild the index from it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, MemoryStoreConfig::default())
    }

    pub fn open_with(path: impl AsRef<Path>, config: MemoryStoreConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        tracing::info!("Opening event log: {:?}", path);

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;

        let scanned = wal::scan(&buffer)?;
        if scanned.valid_len < buffer.len() {
            tracing::warn!(
                "Truncating torn tail: {} bytes after offset {}",
                buffer.len() - scanned.valid_len,
                scanned.valid_len
            );
            file.set_len(scanned.valid_len as u64)?;
            file.sync_all()?;
        }

        let mut records = Vec::with_capacity(scanned.frames.len());
        for (header, payload) in scanned.frames {
            let (event, _): (PersistedEvent, _) =
                bincode::serde::decode_from_slice(&payload, bincode::config::standard())
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
            records.push(event.into_record(header.global));
        }

        tracing::info!("Loaded {} events from log", records.len());

        Ok(Self {
            path,
            file: Arc::new(Mutex::new(Some(file))),
            index: InMemoryEventStore::from_records(records, config),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn close(&self) {
        self.index.close();
    }
}

#[async_trait]
impl EventStore for FileEventStore {
    async fn append_to_stream(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        entries: Vec<WritableEventEntry>,
    ) -> Result<AppendResult> {
        let file = self.file.clone();
        self.index.append_with(stream, expected, entries, move |records| {
            let payloads = records
                .iter()
                .map(|r| {
                    bincode::serde::encode_to_vec(PersistedEvent::from_record(r), bincode::config::standard())
                        .map_err(|e| StoreError::Serialization(e.to_string()))
                })
                .collect::<Result<Vec<_>>>()?;
            let mut guard = file.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(log) = guard.as_mut() else {
                return Err(StoreError::Closed);
            };
            let appended = wal::append_frames(log, records[0].global_position.0, &payloads);
            if let Err(StoreError::Corrupted { offset }) = &appended {
                tracing::error!("Log tail at offset {} is unrecoverable, refusing appends", offset);
                *guard = None;
            }
            appended
        })
    }

    async fn read(
        &self,
        target: &LogTarget,
        direction: ReadDirection,
        from: ReadFrom,
        max_count: usize,
    ) -> Result<ReadSlice> {
        self.index.read(target, direction, from, max_count).await
    }

    async fn subscribe_live(&self, target: &LogTarget, after: Option<LogPosition>) -> Result<BoxLiveFeed> {
        self.index.subscribe_live(target, after).await
    }
}
