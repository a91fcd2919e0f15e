//! Rate limit policy definition.

use std::time::Duration;

use crate::error::{GatekeeperError, Result};

/// Default number of calls permitted per window when none is configured.
pub const DEFAULT_MAX_COUNT: u64 = 500;
/// Default window length when none is configured.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
/// Longest window a store can represent as a millisecond ttl.
pub const MAX_WINDOW: Duration = Duration::from_millis(i64::MAX as u64);

/// An immutable rate limit rule: at most `max_count` calls per `window`.
///
/// Policies are validated on construction and never change afterwards, so a
/// `Policy` value can be shared freely between tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Policy {
    max_count: u64,
    window: Duration,
}

impl Policy {
    /// Create a new policy.
    ///
    /// Fails with a configuration error if either value is zero, or if the
    /// window is longer than [`MAX_WINDOW`].
    pub fn new(max_count: u64, window: Duration) -> Result<Self> {
        if max_count == 0 {
            return Err(GatekeeperError::Configuration(
                "policy max_count must be greater than zero".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(GatekeeperError::Configuration(
                "policy window must be greater than zero".to_string(),
            ));
        }
        if window > MAX_WINDOW {
            return Err(GatekeeperError::Configuration(format!(
                "policy window of {}s exceeds the maximum of {}s",
                window.as_secs(),
                MAX_WINDOW.as_secs()
            )));
        }
        Ok(Self { max_count, window })
    }

    /// Create a policy from a count and a window expressed in whole seconds.
    pub fn per_seconds(max_count: u64, seconds: u64) -> Result<Self> {
        Self::new(max_count, Duration::from_secs(seconds))
    }

    /// Maximum number of calls permitted per window.
    pub fn max_count(&self) -> u64 {
        self.max_count
    }

    /// Length of the window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether a counter value is over this policy's limit.
    pub fn is_exceeded_by(&self, count: u64) -> bool {
        count > self.max_count
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_count: DEFAULT_MAX_COUNT,
            window: DEFAULT_WINDOW,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = Policy::default();
        assert_eq!(policy.max_count(), 500);
        assert_eq!(policy.window(), Duration::from_secs(60));
    }

    #[test]
    fn test_per_seconds() {
        let policy = Policy::per_seconds(10, 120).unwrap();
        assert_eq!(policy.max_count(), 10);
        assert_eq!(policy.window(), Duration::from_secs(120));
    }

    #[test]
    fn test_zero_count_rejected() {
        let err = Policy::new(0, Duration::from_secs(60)).unwrap_err();
        assert!(matches!(err, GatekeeperError::Configuration(_)));
    }

    #[test]
    fn test_zero_window_rejected() {
        let err = Policy::new(10, Duration::ZERO).unwrap_err();
        assert!(matches!(err, GatekeeperError::Configuration(_)));
    }

    #[test]
    fn test_unrepresentable_window_rejected() {
        let err = Policy::new(10, Duration::MAX).unwrap_err();
        assert!(matches!(err, GatekeeperError::Configuration(_)));

        let err = Policy::per_seconds(10, u64::MAX).unwrap_err();
        assert!(matches!(err, GatekeeperError::Configuration(_)));

        let policy = Policy::new(10, MAX_WINDOW).unwrap();
        assert_eq!(policy.window(), MAX_WINDOW);
    }

    #[test]
    fn test_is_exceeded_by() {
        let policy = Policy::per_seconds(5, 1).unwrap();
        assert!(!policy.is_exceeded_by(1));
        assert!(!policy.is_exceeded_by(5));
        assert!(policy.is_exceeded_by(6));
    }
}
