//! In-process counter store.
//!
//! Counters live in a sharded concurrent map. Each increment runs under the
//! shard lock for its key, which gives the same no-lost-update guarantee as
//! a Redis `INCR` within a single process. Expiry is lazy: an expired record
//! is treated as absent on the next access but keeps its map slot until
//! [`MemoryCounterStore::purge_expired`] runs. Long-lived stores that see
//! many distinct keys should purge on an interval, e.g. with
//! [`MemoryCounterStore::spawn_purge_task`].
//!
//! Deadlines use [`tokio::time::Instant`], so tests running on a paused
//! runtime clock can move windows forward deterministically.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::CounterStore;
use crate::error::{GatekeeperError, Result};

/// A single counter record.
#[derive(Debug, Clone, Copy, Default)]
struct CounterRecord {
    count: u64,
    expires_at: Option<Instant>,
}

impl CounterRecord {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline <= now)
    }
}

fn deadline(now: Instant, window: Duration) -> Result<Instant> {
    now.checked_add(window).ok_or_else(|| {
        GatekeeperError::Configuration(format!(
            "window of {}s cannot be represented as a deadline",
            window.as_secs()
        ))
    })
}

/// Counter store backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: DashMap<String, CounterRecord>,
}

impl MemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `key`, or `None` if absent or expired.
    pub fn count(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        self.counters
            .get(key)
            .filter(|record| !record.is_expired(now))
            .map(|record| record.count)
    }

    /// Remaining time-to-live of `key`.
    ///
    /// Returns `None` if the key is absent, expired, or has no ttl.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.counters
            .get(key)
            .filter(|record| !record.is_expired(now))
            .and_then(|record| record.expires_at)
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Drop every expired record.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters.retain(|_, record| !record.is_expired(now));
        before - self.counters.len()
    }

    /// Purge expired records every `period` until `cancel` fires.
    pub fn spawn_purge_task(
        self: &Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = store.purge_expired();
                        if purged > 0 {
                            debug!(purged, remaining = store.len(), "Purged expired counters");
                        }
                    }
                }
            }
        })
    }

    /// Number of stored records, including ones that expired but were not yet purged.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Remove all counters.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.counters.clear();
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str) -> Result<u64> {
        let now = Instant::now();
        let mut record = self.counters.entry(key.to_string()).or_default();

        if record.is_expired(now) {
            *record = CounterRecord::default();
        }
        record.count += 1;

        trace!(key = %key, count = record.count, "Incremented counter");
        Ok(record.count)
    }

    async fn set_expiry(&self, key: &str, window: Duration) -> Result<()> {
        let now = Instant::now();
        let expires_at = deadline(now, window)?;
        if let Some(mut record) = self.counters.get_mut(key) {
            if !record.is_expired(now) {
                record.expires_at = Some(expires_at);
            }
        }
        Ok(())
    }

    async fn set_expiry_if_unset(&self, key: &str, window: Duration) -> Result<bool> {
        let expires_at = deadline(Instant::now(), window)?;
        match self.counters.get_mut(key) {
            Some(mut record) if record.expires_at.is_none() => {
                record.expires_at = Some(expires_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
