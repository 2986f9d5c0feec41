// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Typed dispatch.
//!
//! [`HandlerRegistry`] maps an event name to one handler, fixed when the
//! registry is built. Payloads go through the [`UpcasterChain`] first and are
//! then decoded from JSON into the handler's type.

use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;
use eventrail_core::{StoredEventRecord, UpcasterChain};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::consumer::Consumer;
use crate::errors::{EngineError, HandlerError};

/// What to do with an event no handler is registered for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownEventPolicy {
    #[default]
    Ignore,
    /// Fail the handler call, which faults a plain session.
    Reject,
}

type BoxedHandler = Box<dyn Fn(StoredEventRecord) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

pub struct HandlerRegistry {
    name: String,
    handlers: HashMap<String, BoxedHandler>,
    upcasters: UpcasterChain,
    unknown: UnknownEventPolicy,
}

impl HandlerRegistry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: HashMap::new(),
            upcasters: UpcasterChain::new(),
            unknown: UnknownEventPolicy::default(),
        }
    }

    pub fn with_upcasters(mut self, upcasters: UpcasterChain) -> Self {
        self.upcasters = upcasters;
        self
    }

    pub fn unknown_events(mut self, policy: UnknownEventPolicy) -> Self {
        self.unknown = policy;
        self
    }

    /// Handle events called `event_name` as JSON-decoded `E`. A later
    /// registration for the same name replaces the earlier one.
    pub fn on<E, F, Fut>(self, event_name: impl Into<String>, f: F) -> Self
    where
        E: DeserializeOwned + Send + 'static,
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.on_record(event_name, move |record: StoredEventRecord| {
            let decoded = serde_json::from_slice::<E>(&record.payload).map_err(|e| EngineError::Decode {
                name: record.name.clone(),
                message: e.to_string(),
            });
            match decoded {
                Ok(event) => f(event).boxed(),
                Err(e) => futures::future::ready(Err::<(), HandlerError>(Box::new(e))).boxed(),
            }
        })
    }

    /// Handle events called `event_name` with the (upcast) record itself.
    pub fn on_record<F, Fut>(mut self, event_name: impl Into<String>, f: F) -> Self
    where
        F: Fn(StoredEventRecord) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.handlers
            .insert(event_name.into(), Box::new(move |record| f(record).boxed()));
        self
    }

    pub fn handles(&self, event_name: &str) -> bool {
        self.handlers.contains_key(event_name)
    }

    pub fn event_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl Consumer for HandlerRegistry {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &StoredEventRecord) -> Result<(), HandlerError> {
        let (name, payload) = self
            .upcasters
            .apply(&event.name, event.payload.clone())
            .map_err(|e| EngineError::Decode {
                name: event.name.clone(),
                message: e.to_string(),
            })?;

        let Some(handler) = self.handlers.get(&name) else {
            return match self.unknown {
                UnknownEventPolicy::Ignore => {
                    tracing::trace!(consumer = %self.name, event = %name, "No handler, ignoring");
                    Ok(())
                }
                UnknownEventPolicy::Reject => Err(Box::new(EngineError::UnknownEvent(name))),
            };
        };

        let record = StoredEventRecord {
            name,
            payload,
            ..event.clone()
        };
        handler(record).await
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("name", &self.name)
            .field("events", &self.event_names())
            .field("unknown", &self.unknown)
            .finish()
    }
}
