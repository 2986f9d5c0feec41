// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Error types.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A settings value is out of range or inconsistent.
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
    /// An upcaster rejected a payload.
    #[error("Upcast of {name} failed: {reason}")]
    Upcast { name: String, reason: String },
}

pub type CoreResult<T> = core::result::Result<T, CoreError>;
pub type Result<T> = CoreResult<T>;
