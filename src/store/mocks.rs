//! Test doubles for the counter store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{CounterStore, MemoryCounterStore};
use crate::error::{GatekeeperError, Result};

/// Memory store that records how often each primitive was invoked.
#[derive(Debug, Default)]
pub struct RecordingStore {
    pub inner: MemoryCounterStore,
    pub increments: AtomicUsize,
    pub expiries: AtomicUsize,
    pub conditional_expiries: AtomicUsize,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_calls(&self) -> usize {
        self.increments.load(Ordering::SeqCst)
    }

    pub fn expiry_calls(&self) -> usize {
        self.expiries.load(Ordering::SeqCst)
    }

    pub fn conditional_expiry_calls(&self) -> usize {
        self.conditional_expiries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CounterStore for RecordingStore {
    async fn increment(&self, key: &str) -> Result<u64> {
        self.increments.fetch_add(1, Ordering::SeqCst);
        self.inner.increment(key).await
    }

    async fn set_expiry(&self, key: &str, window: Duration) -> Result<()> {
        self.expiries.fetch_add(1, Ordering::SeqCst);
        self.inner.set_expiry(key, window).await
    }

    async fn set_expiry_if_unset(&self, key: &str, window: Duration) -> Result<bool> {
        self.conditional_expiries.fetch_add(1, Ordering::SeqCst);
        self.inner.set_expiry_if_unset(key, window).await
    }
}

/// Store whose every call fails as if the server were down.
#[derive(Debug, Default)]
pub struct UnavailableStore {
    pub calls: AtomicUsize,
}

impl UnavailableStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> Result<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(GatekeeperError::StoreUnavailable(
            "connection refused".to_string(),
        ))
    }
}

#[async_trait]
impl CounterStore for UnavailableStore {
    async fn increment(&self, _key: &str) -> Result<u64> {
        self.fail()
    }

    async fn set_expiry(&self, _key: &str, _window: Duration) -> Result<()> {
        self.fail()
    }

    async fn set_expiry_if_unset(&self, _key: &str, _window: Duration) -> Result<bool> {
        self.fail()
    }
}
