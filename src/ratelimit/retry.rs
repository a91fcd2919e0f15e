//! Single-retry admission policy.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::gate::{AdmissionGate, Decision};
use super::key::RateLimitKey;
use super::policy::Policy;
use crate::error::{GatekeeperError, Result};
use crate::store::CounterStore;

/// Default pause before the single retry.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// A denied call is evaluated at most this many times in total.
const MAX_ATTEMPTS: u32 = 2;

/// Wraps an [`AdmissionGate`] with a two-strike policy.
///
/// A first DENY suspends the caller for a fixed delay and evaluates once more;
/// a second DENY is terminal. This smooths over a burst that lands just before
/// a window resets without adding unbounded latency.
pub struct RetryScheduler<S: CounterStore + ?Sized> {
    gate: AdmissionGate<S>,
    delay: Duration,
}

impl<S: CounterStore + ?Sized> Clone for RetryScheduler<S> {
    fn clone(&self) -> Self {
        Self {
            gate: self.gate.clone(),
            delay: self.delay,
        }
    }
}

impl<S: CounterStore + ?Sized> RetryScheduler<S> {
    /// Create a scheduler with the default retry delay.
    pub fn new(gate: AdmissionGate<S>) -> Self {
        Self {
            gate,
            delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Override the pause before the retry.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The pause before the retry.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// The wrapped gate.
    pub fn gate(&self) -> &AdmissionGate<S> {
        &self.gate
    }

    /// Evaluate `key`, retrying once after the delay if the first check is denied.
    ///
    /// Returns [`Decision::Deny`] only after both attempts were denied. Store
    /// failures end the check immediately without consuming the retry. If
    /// `cancel` fires during the delay the retry is abandoned with
    /// [`GatekeeperError::Cancelled`].
    pub async fn decide_with_retry(
        &self,
        key: &RateLimitKey,
        policy: &Policy,
        cancel: &CancellationToken,
    ) -> Result<Decision> {
        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(key = %key, "Caller cancelled while waiting to retry");
                        return Err(GatekeeperError::Cancelled { key: key.to_string() });
                    }
                    _ = tokio::time::sleep(self.delay) => {}
                }
                warn!(
                    key = %key,
                    delay_secs = self.delay.as_secs(),
                    "Retrying rate limited call after delay"
                );
            }

            match self.gate.evaluate(key, policy).await? {
                Decision::Allow => return Ok(Decision::Allow),
                Decision::Deny => {
                    debug!(key = %key, attempt = attempt, "Admission denied");
                }
            }
        }

        Ok(Decision::Deny)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mocks::{RecordingStore, UnavailableStore};
    use crate::store::MemoryCounterStore;
    use std::sync::Arc;
    use tokio::time::Instant;

    fn key() -> RateLimitKey {
        RateLimitKey::new("smsService", "sendLimit", "register-user")
    }

    fn assert_elapsed(start: Instant, expected: Duration) {
        let elapsed = start.elapsed();
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(5),
            "expected ~{:?}, waited {:?}",
            expected,
            elapsed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_allow_needs_no_delay() {
        let scheduler =
            RetryScheduler::new(AdmissionGate::new(Arc::new(MemoryCounterStore::new())));
        let policy = Policy::per_seconds(1, 60).unwrap();

        let start = Instant::now();
        let decision = scheduler
            .decide_with_retry(&key(), &policy, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(decision, Decision::Allow);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_window_reset() {
        let store = Arc::new(RecordingStore::new());
        let scheduler = RetryScheduler::new(AdmissionGate::new(store.clone()));
        // Window shorter than the retry delay, so the retry lands in a fresh window.
        let policy = Policy::per_seconds(1, 5).unwrap();
        let cancel = CancellationToken::new();

        assert_eq!(
            scheduler.decide_with_retry(&key(), &policy, &cancel).await.unwrap(),
            Decision::Allow
        );

        let start = Instant::now();
        let decision = scheduler.decide_with_retry(&key(), &policy, &cancel).await.unwrap();

        assert_eq!(decision, Decision::Allow);
        assert_elapsed(start, DEFAULT_RETRY_DELAY);
        assert_eq!(store.increment_calls(), 3);
        assert_eq!(store.expiry_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_deny_is_terminal() {
        let store = Arc::new(RecordingStore::new());
        let scheduler = RetryScheduler::new(AdmissionGate::new(store.clone()));
        let policy = Policy::per_seconds(1, 120).unwrap();
        let cancel = CancellationToken::new();

        scheduler.decide_with_retry(&key(), &policy, &cancel).await.unwrap();

        let start = Instant::now();
        let decision = scheduler.decide_with_retry(&key(), &policy, &cancel).await.unwrap();

        assert_eq!(decision, Decision::Deny);
        assert_elapsed(start, DEFAULT_RETRY_DELAY);
        assert_eq!(store.increment_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_delay() {
        let gate = AdmissionGate::new(Arc::new(MemoryCounterStore::new()));
        let scheduler = RetryScheduler::new(gate).with_delay(Duration::from_millis(250));
        let policy = Policy::per_seconds(1, 120).unwrap();
        let cancel = CancellationToken::new();

        scheduler.decide_with_retry(&key(), &policy, &cancel).await.unwrap();

        let start = Instant::now();
        scheduler.decide_with_retry(&key(), &policy, &cancel).await.unwrap();
        assert_elapsed(start, Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_abandons_retry() {
        let store = Arc::new(RecordingStore::new());
        let scheduler = RetryScheduler::new(AdmissionGate::new(store.clone()));
        let policy = Policy::per_seconds(1, 120).unwrap();
        let cancel = CancellationToken::new();

        scheduler.decide_with_retry(&key(), &policy, &cancel).await.unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let err = scheduler
            .decide_with_retry(&key(), &policy, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, GatekeeperError::Cancelled { .. }));
        assert_elapsed(start, Duration::from_secs(3));
        // The abandoned retry never reached the store.
        assert_eq!(store.increment_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_consumes_no_retry() {
        let store = Arc::new(UnavailableStore::default());
        let scheduler = RetryScheduler::new(AdmissionGate::new(store.clone()));

        let start = Instant::now();
        let err = scheduler
            .decide_with_retry(&key(), &Policy::default(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, GatekeeperError::StoreUnavailable(_)));
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(store.calls(), 1);
    }
}
