// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod checkpoint;
pub mod config;
pub mod consumer;
pub mod coordinator;
pub mod dispatch;
pub mod errors;
pub mod feed;
pub mod host;
pub mod retry;
pub mod session;
pub mod source;
pub mod supervisor;
pub mod telemetry;

pub use checkpoint::{CheckpointCadence, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use config::{BufferPolicy, CheckpointSettings, ReconnectSettings, SubscriptionConfig};
pub use consumer::{Consumer, FnConsumer};
pub use coordinator::{SubscriptionCoordinator, SubscriptionReport};
pub use dispatch::{HandlerRegistry, UnknownEventPolicy};
pub use errors::{EngineError, HandlerError, Result};
pub use feed::EventFeed;
pub use host::SubscriptionHost;
pub use retry::{AckOutcome, AckRetryPolicy};
pub use session::{ConsumerSession, SessionReport};
pub use source::{EventLogSource, SharedStore, SourceOutcome, SourceSink};
pub use supervisor::{ReconnectSupervisor, StopReason, SupervisorState};
