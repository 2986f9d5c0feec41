// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Event Records
//!
//! [`WritableEventEntry`] is what callers hand to a store; it has no position.
//! [`StoredEventRecord`] is what a store hands back, from historic reads and
//! live pushes alike. Records are immutable once the store produced them.
//!
//! Payloads are opaque bytes. Encoding them is the caller's concern.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::position::{GlobalPosition, StreamPosition};

/// A committed event as delivered to subscribers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEventRecord {
    /// Stream the event was appended to.
    pub stream: String,
    /// Event type name, used for typed dispatch.
    pub name: String,
    pub payload: Bytes,
    pub metadata: Option<Bytes>,
    pub stream_position: StreamPosition,
    pub global_position: GlobalPosition,
}

/// An event waiting to be appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WritableEventEntry {
    pub name: String,
    pub payload: Bytes,
    pub metadata: Option<Bytes>,
}

impl WritableEventEntry {
    pub fn new(name: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: impl Into<Bytes>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    /// Stamp the entry with the positions a store assigned to it.
    pub fn into_record(
        self,
        stream: &str,
        stream_position: StreamPosition,
        global_position: GlobalPosition,
    ) -> StoredEventRecord {
        StoredEventRecord {
            stream: stream.to_string(),
            name: self.name,
            payload: self.payload,
            metadata: self.metadata,
            stream_position,
            global_position,
        }
    }
}

/// Optimistic concurrency expectation checked at append time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedVersion {
    /// No check.
    Any,
    /// The stream must not exist yet.
    NoStream,
    /// The stream must have at least one event.
    StreamExists,
    /// The stream's last event must be at this stream position.
    Exact(u64),
}

impl ExpectedVersion {
    /// Check the expectation against the stream's current last position
    /// (`None` when the stream has no events).
    pub fn is_satisfied_by(&self, current: Option<u64>) -> bool {
        match (self, current) {
            (ExpectedVersion::Any, _) => true,
            (ExpectedVersion::NoStream, None) => true,
            (ExpectedVersion::NoStream, Some(_)) => false,
            (ExpectedVersion::StreamExists, current) => current.is_some(),
            (ExpectedVersion::Exact(v), Some(c)) => *v == c,
            (ExpectedVersion::Exact(_), None) => false,
        }
    }
}

impl core::fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ExpectedVersion::Any => write!(f, "any"),
            ExpectedVersion::NoStream => write!(f, "no-stream"),
            ExpectedVersion::StreamExists => write!(f, "stream-exists"),
            ExpectedVersion::Exact(v) => write!(f, "{}", v),
        }
    }
}

/// Outcome of a successful append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AppendResult {
    /// Stream position of the last appended event; pass as
    /// `ExpectedVersion::Exact` for the next write.
    pub next_expected_version: u64,
    pub first_global: GlobalPosition,
    pub last_global: GlobalPosition,
}
