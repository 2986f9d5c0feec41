// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Framed Append-Only Log
//!
//! # File Format
//! ```text
//! [Frame][Frame][Frame]...
//! Frame = [global: u64][len: u32][crc64: u64][payload: len bytes]
//! ```
//! The checksum covers `global`, `len` and the payload. Frames are written
//! and fsync'd one append at a time; a crash can only tear the last frame.
//! An append that fails is cut back off before the next one starts.

use crate::error::{Result, StoreError};
use crc64fast::Digest;
use std::fs::File;
use std::io::{self, Write};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub global: u64,
    pub payload_len: u32,
    pub checksum: u64,
}

impl FrameHeader {
    pub const SIZE: usize = 8 + 4 + 8; // 20 bytes

    pub fn for_payload(global: u64, payload: &[u8]) -> Result<Self> {
        let payload_len = frame_len(payload.len())?;
        Ok(Self {
            global,
            payload_len,
            checksum: checksum(global, payload_len, payload),
        })
    }

    pub fn read_from(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        let mut global = [0u8; 8];
        let mut len = [0u8; 4];
        let mut sum = [0u8; 8];
        global.copy_from_slice(&buf[0..8]);
        len.copy_from_slice(&buf[8..12]);
        sum.copy_from_slice(&buf[12..20]);
        Some(Self {
            global: u64::from_le_bytes(global),
            payload_len: u32::from_le_bytes(len),
            checksum: u64::from_le_bytes(sum),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&self.global.to_le_bytes());
        buf[8..12].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[12..20].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }
}

fn frame_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| StoreError::FrameTooLarge { len })
}

fn checksum(global: u64, payload_len: u32, payload: &[u8]) -> u64 {
    let mut digest = Digest::new();
    digest.write(&global.to_le_bytes());
    digest.write(&payload_len.to_le_bytes());
    digest.write(payload);
    digest.sum64()
}

/// The file operations an append needs, so a failed write can be undone.
pub trait LogFile: Write {
    fn end(&self) -> io::Result<u64>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
    fn sync_data(&mut self) -> io::Result<()>;
    fn sync_all(&mut self) -> io::Result<()>;
}

impl LogFile for File {
    fn end(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync_data(&mut self) -> io::Result<()> {
        File::sync_data(self)
    }

    fn sync_all(&mut self) -> io::Result<()> {
        File::sync_all(self)
    }
}

/// Write frames for `payloads` (one per global position, consecutive from
/// `first_global`) and fsync.
///
/// If the write or the fsync fails, the file is truncated back to where it
/// was. If even that fails the tail can no longer be trusted and
/// [`StoreError::Corrupted`] is returned; the caller must stop appending.
pub fn append_frames<F: LogFile>(file: &mut F, first_global: u64, payloads: &[Vec<u8>]) -> Result<()> {
    let mut buf = Vec::new();
    for (i, payload) in payloads.iter().enumerate() {
        let header = FrameHeader::for_payload(first_global + i as u64, payload)?;
        buf.extend_from_slice(&header.to_bytes());
        buf.extend_from_slice(payload);
    }

    let start = file.end()?;
    let written = file.write_all(&buf).and_then(|_| file.sync_data());
    let Err(e) = written else {
        return Ok(());
    };

    tracing::warn!("Append at offset {} failed, rolling back: {}", start, e);
    if let Err(rollback) = file.truncate(start).and_then(|_| file.sync_all()) {
        tracing::error!("Rollback to offset {} failed: {}", start, rollback);
        return Err(StoreError::Corrupted { offset: start as usize });
    }
    Err(e.into())
}

/// Result of scanning a whole log file.
#[derive(Debug, Default)]
pub struct ScannedLog {
    pub frames: Vec<(FrameHeader, Vec<u8>)>,
    /// Length of the valid prefix; anything after it is a torn tail.
    pub valid_len: usize,
}

/// Decode every frame in `buf`.
///
/// A torn or mismatching *final* frame is treated as an interrupted write
/// and excluded. Damage followed by more data fails closed.
pub fn scan(buf: &[u8]) -> Result<ScannedLog> {
    let mut scanned = ScannedLog::default();
    let mut offset = 0;

    while offset < buf.len() {
        let header = match FrameHeader::read_from(&buf[offset..]) {
            Some(h) => h,
            None => {
                tracing::warn!("Ignoring torn frame header at end of log (offset {})", offset);
                break;
            }
        };

        let start = offset + FrameHeader::SIZE;
        let end = start + header.payload_len as usize;
        if end > buf.len() {
            tracing::warn!("Ignoring torn frame payload at end of log (offset {})", offset);
            break;
        }

        let payload = &buf[start..end];
        let found = checksum(header.global, header.payload_len, payload);
        if found != header.checksum {
            if end == buf.len() {
                tracing::warn!("Ignoring final frame with bad checksum (offset {})", offset);
                break;
            }
            tracing::error!("Checksum mismatch mid-log at offset {}", offset);
            return Err(StoreError::ChecksumMismatch {
                expected: header.checksum,
                found,
            });
        }

        let expected_global = scanned.frames.len() as u64;
        if header.global != expected_global {
            return Err(StoreError::Corrupted { offset });
        }

        scanned.frames.push((header, payload.to_vec()));
        offset = end;
        scanned.valid_len = offset;
    }

    Ok(scanned)
}
