//! Fixed-window admission gate.
//!
//! Each key's window moves through three states, all driven by the store:
//! FRESH (no record), OPEN (count within the limit) and SATURATED (count past
//! the limit). The first increment of a window creates the record at 1 and the
//! caller that observes 1 attaches the window ttl; when the store expires the
//! record the key is FRESH again.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::key::RateLimitKey;
use super::policy::Policy;
use crate::error::Result;
use crate::store::CounterStore;

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The call may proceed
    Allow,
    /// The window is saturated
    Deny,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// When the gate attaches the window ttl to a counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryMode {
    /// Only the caller that observes a count of 1 sets the ttl.
    ///
    /// If that caller dies between the increment and the expire, the counter
    /// never expires and the key stays saturated until removed by hand.
    #[default]
    FirstIncrement,
    /// Every caller also applies the ttl with set-if-not-already-set semantics.
    ///
    /// Costs one extra store round trip per call and heals counters orphaned
    /// without a ttl.
    IfUnset,
}

/// Decides ALLOW or DENY for a key by counting calls in the shared store.
///
/// The gate holds no per-call state and is safe to share across tasks.
pub struct AdmissionGate<S: CounterStore + ?Sized> {
    store: Arc<S>,
    expiry_mode: ExpiryMode,
}

impl<S: CounterStore + ?Sized> Clone for AdmissionGate<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            expiry_mode: self.expiry_mode,
        }
    }
}

impl<S: CounterStore + ?Sized> AdmissionGate<S> {
    /// Create a gate over a shared store.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            expiry_mode: ExpiryMode::default(),
        }
    }

    /// Select how the window ttl is attached.
    pub fn with_expiry_mode(mut self, expiry_mode: ExpiryMode) -> Self {
        self.expiry_mode = expiry_mode;
        self
    }

    /// The underlying counter store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Count one call against `key` and decide whether it is admitted.
    ///
    /// Store failures are returned as-is; the gate never fails open or closed.
    pub async fn evaluate(&self, key: &RateLimitKey, policy: &Policy) -> Result<Decision> {
        let count = self.store.increment(key.as_str()).await?;

        trace!(
            key = %key,
            count = count,
            limit = policy.max_count(),
            "Evaluating admission"
        );

        if count == 1 {
            self.store.set_expiry(key.as_str(), policy.window()).await?;
            debug!(
                key = %key,
                window_ms = policy.window().as_millis() as u64,
                "Opened rate limit window"
            );
        } else if self.expiry_mode == ExpiryMode::IfUnset
            && self
                .store
                .set_expiry_if_unset(key.as_str(), policy.window())
                .await?
        {
            warn!(key = %key, count = count, "Restored missing ttl on rate limit counter");
        }

        if policy.is_exceeded_by(count) {
            debug!(
                key = %key,
                count = count,
                limit = policy.max_count(),
                "Rate limit window saturated"
            );
            Ok(Decision::Deny)
        } else {
            Ok(Decision::Allow)
        }
    }
}
