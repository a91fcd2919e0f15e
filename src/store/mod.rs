//! Shared counter store.
//!
//! The store is the only synchronization point between gate instances: every
//! process increments the same keys and relies on the store for atomicity and
//! expiry. Nothing here performs a client-side read-modify-write.

mod memory;
mod redis_store;

#[cfg(test)]
pub(crate) mod mocks;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use self::memory::MemoryCounterStore;
pub use self::redis_store::RedisCounterStore;

/// Trait for atomic counter backends.
///
/// Implementations must be safe to call from any number of tasks and
/// processes at once and must hold no per-call state.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key` by one, creating it at 1 if absent.
    ///
    /// Returns the new value.
    async fn increment(&self, key: &str) -> Result<u64>;

    /// Set the time-to-live of `key` to `window` from now.
    ///
    /// Calling this again resets the ttl. A missing key is left untouched.
    async fn set_expiry(&self, key: &str, window: Duration) -> Result<()>;

    /// Set the time-to-live of `key` only if it currently has none.
    ///
    /// Returns `true` if a ttl was applied.
    async fn set_expiry_if_unset(&self, key: &str, window: Duration) -> Result<bool>;
}
