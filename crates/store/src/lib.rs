// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! eventrail-store: the storage side of the subscription engine.
//!
//! - [`EventStore`]: append, paged reads and live feeds
//! - [`InMemoryEventStore`] / [`FileEventStore`]: interchangeable engines
//! - [`Acknowledger`]: ack/nack contract for durable consumer groups

pub mod ack;
pub mod error;
pub mod file;
pub mod fixtures;
pub mod memory;
pub mod store;
pub mod wal;

pub use ack::{Acknowledger, MemoryPersistentGroup, NackAction, ParkedEvent};
pub use error::{Result, StoreError};
pub use file::FileEventStore;
pub use memory::{InMemoryEventStore, MemoryStoreConfig};
pub use store::{BoxLiveFeed, DropReason, EventStore, LiveFeed, LiveMessage, ReadDirection, ReadFrom, ReadSlice};
