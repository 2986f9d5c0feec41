// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Consumer contract implemented by hosting code.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use eventrail_core::StoredEventRecord;

use crate::errors::HandlerError;

/// A handler fed by one [`crate::session::ConsumerSession`].
///
/// `handle` is never called concurrently for one consumer; the next event is
/// only pulled after the previous call returned.
#[async_trait]
pub trait Consumer: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Called once before the first event.
    async fn on_initialize(&self) -> Result<(), HandlerError> {
        Ok(())
    }

    async fn handle(&self, event: &StoredEventRecord) -> Result<(), HandlerError>;
}

/// Adapts an async closure into a [`Consumer`].
pub struct FnConsumer<F, Fut> {
    name: String,
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnConsumer<F, Fut>
where
    F: Fn(StoredEventRecord) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
            _fut: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> Consumer for FnConsumer<F, Fut>
where
    F: Fn(StoredEventRecord) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &StoredEventRecord) -> Result<(), HandlerError> {
        (self.f)(event.clone()).await
    }
}
