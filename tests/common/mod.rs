//! Test utilities shared by the integration tests.
//!
//! Provides:
//! - Identity and gated handlers
//! - Output collection with timeouts
//! - Condition polling

#![allow(dead_code)]

use std::sync::{Arc, RwLock, RwLockWriteGuard};
use std::time::Duration;

use laneflow::{Output, Publisher};

/// Generous upper bound for anything a test waits on.
pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Publishes every input unchanged.
pub fn identity<T>(item: T, out: &mut Publisher<T>) {
    let _ = out.publish(item);
}

/// Gate that parks gated handlers until it is opened.
///
/// The handler side takes a read lock per item; the test holds the write
/// lock while the gate is closed.
#[derive(Clone, Default)]
pub struct Gate {
    lock: Arc<RwLock<()>>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the gate; it reopens when the guard is dropped.
    pub fn close(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().expect("gate poisoned")
    }

    /// Block until the gate is open.
    pub fn pass(&self) {
        drop(self.lock.read().expect("gate poisoned"));
    }

    /// Identity handler that waits at the gate before publishing.
    pub fn identity<T: 'static>(&self) -> impl Fn(T, &mut Publisher<T>) + Send + Sync + 'static {
        let lock = Arc::clone(&self.lock);
        move |item: T, out: &mut Publisher<T>| {
            let _open = lock.read().expect("gate poisoned");
            let _ = out.publish(item);
        }
    }
}

/// Receive exactly `count` items, failing the test on timeout or early end.
pub async fn collect<R>(output: &mut Output<R>, count: usize) -> Vec<R> {
    let mut items = Vec::with_capacity(count);
    while items.len() < count {
        match tokio::time::timeout(TIMEOUT, output.recv()).await {
            Ok(Some(item)) => items.push(item),
            Ok(None) => panic!("output ended after {} of {count} items", items.len()),
            Err(_) => panic!("timed out after {} of {count} items", items.len()),
        }
    }
    items
}

/// Receive until the stream ends, failing the test on timeout.
pub async fn collect_to_end<R>(output: &mut Output<R>) -> Vec<R> {
    let mut items = Vec::new();
    loop {
        match tokio::time::timeout(TIMEOUT, output.recv()).await {
            Ok(Some(item)) => items.push(item),
            Ok(None) => return items,
            Err(_) => panic!("output did not end, received {} items", items.len()),
        }
    }
}

/// Wait for a condition to become true with timeout.
///
/// # Returns
///
/// `true` if condition was met, `false` if timeout expired
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
