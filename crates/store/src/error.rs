use eventrail_core::ExpectedVersion;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Concurrency conflict on {stream}: expected {expected}, actual {actual:?}")]
    ConcurrencyConflict {
        stream: String,
        expected: ExpectedVersion,
        actual: Option<u64>,
    },
    #[error("Stream not found: {0}")]
    StreamNotFound(String),
    #[error("Append to {0} carried no events")]
    EmptyAppend(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Store closed")]
    Closed,
    #[error("Checksum mismatch: expected {expected}, found {found}")]
    ChecksumMismatch {
        expected: u64,
        found: u64,
    },
    #[error("Frame payload of {len} bytes does not fit the log format")]
    FrameTooLarge { len: usize },
    #[error("Log corrupted at offset {offset}")]
    Corrupted { offset: usize },
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl StoreError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::IoError(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
