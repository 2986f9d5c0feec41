// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use eventrail_core::CoreError;
use eventrail_store::StoreError;
use thiserror::Error;

/// Error returned by consumer handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Consumer {consumer} failed: {message}")]
    Handler { consumer: String, message: String },
    #[error("Stream not found: {0}")]
    StreamNotFound(String),
    #[error("Reconnect gave up after {attempts} attempts: {last}")]
    ReconnectExhausted { attempts: u32, last: String },
    #[error("Subscriber rejected event at {position}: {message}")]
    Subscriber { position: String, message: String },
    #[error("Session {0} is faulted")]
    SessionFaulted(String),
    #[error("Session {0} is stopped")]
    SessionStopped(String),
    #[error("Subscription {subscription} failed: {message}")]
    SubscriptionFailed { subscription: String, message: String },
    #[error("Subscription {0} already started")]
    AlreadyStarted(String),
    #[error("Checkpoint failed: {0}")]
    Checkpoint(String),
    #[error("Negative acknowledgement failed: {0}")]
    Nack(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Decode of {name} failed: {message}")]
    Decode { name: String, message: String },
    #[error("Unknown event type: {0}")]
    UnknownEvent(String),
}

impl From<CoreError> for EngineError {
    fn from(e: CoreError) -> Self {
        EngineError::Config(e.to_string())
    }
}

impl EngineError {
    pub fn handler(consumer: &str, err: &HandlerError) -> Self {
        EngineError::Handler {
            consumer: consumer.to_string(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
