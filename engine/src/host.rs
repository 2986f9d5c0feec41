// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Subscription Host
//!
//! Owns every named subscription of a process, starts and stops them
//! together and reports their state for dashboards. A stopped or faulted
//! subscription stays registered so its last error remains visible.

use std::sync::Arc;

use eventrail_core::Status;
use tokio_util::sync::CancellationToken;

use crate::coordinator::{SubscriptionCoordinator, SubscriptionReport};
use crate::errors::{EngineError, Result};

pub struct SubscriptionHost {
    subscriptions: Vec<Arc<SubscriptionCoordinator>>,
    cancel: CancellationToken,
    span: tracing::Span,
}

impl SubscriptionHost {
    pub fn new(span: tracing::Span) -> Self {
        Self {
            subscriptions: Vec::new(),
            cancel: CancellationToken::new(),
            span,
        }
    }

    /// Register a subscription. Names must be unique.
    pub fn add(&mut self, coordinator: SubscriptionCoordinator) -> Result<Arc<SubscriptionCoordinator>> {
        if self.get(coordinator.name()).is_some() {
            return Err(EngineError::Config(format!(
                "subscription {} registered twice",
                coordinator.name()
            )));
        }
        let coordinator = Arc::new(coordinator);
        self.subscriptions.push(coordinator.clone());
        Ok(coordinator)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<SubscriptionCoordinator>> {
        self.subscriptions.iter().find(|s| s.name() == name)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Start every registered subscription. One failing to start does not
    /// keep the others from starting; the first failure is returned.
    pub async fn start_all(&self) -> Result<()> {
        let mut first_error = None;
        for subscription in &self.subscriptions {
            match subscription.start_with_cancellation(self.cancel.child_token()).await {
                Ok(()) => {}
                Err(e) => {
                    tracing::error!(parent: &self.span, subscription = subscription.name(), "Failed to start: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }
        tracing::info!(parent: &self.span, subscriptions = self.subscriptions.len(), "Host started");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn stop_all(&self) {
        self.cancel.cancel();
        futures::future::join_all(self.subscriptions.iter().map(|s| s.stop())).await;
        tracing::info!(parent: &self.span, "Host stopped");
    }

    /// Wait until every subscription has finished, returning each final
    /// status.
    pub async fn wait_all(&self) -> Vec<(String, Status)> {
        let finals = futures::future::join_all(self.subscriptions.iter().map(|s| s.wait_for_completed())).await;
        self.subscriptions
            .iter()
            .map(|s| s.name().to_string())
            .zip(finals)
            .collect()
    }

    pub fn statuses(&self) -> Vec<SubscriptionReport> {
        self.subscriptions.iter().map(|s| s.report()).collect()
    }

    pub fn statuses_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.statuses()).map_err(|e| EngineError::Config(e.to_string()))
    }
}
