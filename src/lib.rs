// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.

//! eventrail-core: positions, records and settings shared by the event
//! store and the subscription engine. Holds no async runtime.

pub mod config;
pub mod error;
pub mod event;
pub mod position;
pub mod status;
pub mod upcast;

pub use config::{RetrySettings, TerminalAction};
pub use error::{CoreError, CoreResult};
pub use event::{AppendResult, ExpectedVersion, StoredEventRecord, WritableEventEntry};
pub use position::{GlobalPosition, LogPosition, LogTarget, StartFrom, StreamPosition, SubscriptionPosition};
pub use status::Status;
pub use upcast::{Upcaster, UpcasterChain};
