// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
#![allow(dead_code)]

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use eventrail_core::StoredEventRecord;
use eventrail_engine::{Consumer, FnConsumer, HandlerError};

/// A consumer that records the global position of every event it handles.
pub fn recording(name: &str) -> (Arc<dyn Consumer>, Arc<Mutex<Vec<u64>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let consumer = {
        let seen = seen.clone();
        FnConsumer::new(name, move |r: StoredEventRecord| {
            seen.lock().unwrap().push(r.global_position.0);
            async { Ok::<(), HandlerError>(()) }
        })
    };
    let consumer: Arc<dyn Consumer> = Arc::new(consumer);
    (consumer, seen)
}

/// Like [`recording`], sleeping `delay` inside every handler call.
pub fn slow_recording(name: &str, delay: Duration) -> (Arc<dyn Consumer>, Arc<Mutex<Vec<u64>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let consumer = {
        let seen = seen.clone();
        FnConsumer::new(name, move |r: StoredEventRecord| {
            let seen = seen.clone();
            async move {
                tokio::time::sleep(delay).await;
                seen.lock().unwrap().push(r.global_position.0);
                Ok::<(), HandlerError>(())
            }
        })
    };
    let consumer: Arc<dyn Consumer> = Arc::new(consumer);
    (consumer, seen)
}

/// Poll `condition` every few milliseconds, panicking after `limit`.
pub async fn wait_until<F>(limit: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let waited = tokio::time::timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not met within {:?}", limit);
}

pub async fn within<T>(limit: Duration, fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(limit, fut).await.expect("timed out")
}
