//! Redis-backed counter store for multi-process deployments.
//!
//! Uses `INCR` for the atomic create-or-increment and `PEXPIRE` for the
//! window ttl. The set-if-no-ttl variant runs as a Lua script so the ttl
//! check and the expire happen atomically on the server.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, Script};
use tracing::{info, trace};

use super::CounterStore;
use crate::error::{GatekeeperError, Result};

/// Applies the ttl only when the key exists and has none.
/// `PTTL` returns -1 for a key without expiry and -2 for a missing key.
const EXPIRE_IF_UNSET_SCRIPT: &str = r#"
    if redis.call('PTTL', KEYS[1]) == -1 then
        return redis.call('PEXPIRE', KEYS[1], ARGV[1])
    end
    return 0
"#;

/// Counter store backed by a shared Redis server.
///
/// Cloning is cheap; all clones multiplex over the same managed connection.
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
    expire_if_unset: Script,
}

impl fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore").finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    /// Connect to Redis.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    ///
    /// # Errors
    /// Returns [`GatekeeperError::Configuration`] if the URL is malformed and
    /// [`GatekeeperError::StoreUnavailable`] if the server cannot be reached.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            GatekeeperError::Configuration(format!("invalid redis url `{}`: {}", url, e))
        })?;
        let conn = ConnectionManager::new(client).await.map_err(unavailable)?;

        info!(url = %url, "Connected to Redis counter store");

        Ok(Self {
            conn,
            expire_if_unset: Script::new(EXPIRE_IF_UNSET_SCRIPT),
        })
    }
}

fn unavailable(e: RedisError) -> GatekeeperError {
    GatekeeperError::StoreUnavailable(e.to_string())
}

fn window_millis(window: Duration) -> i64 {
    i64::try_from(window.as_millis()).unwrap_or(i64::MAX).max(1)
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.incr(key, 1u64).await.map_err(unavailable)?;

        trace!(key = %key, count, "Incremented counter");
        Ok(count)
    }

    async fn set_expiry(&self, key: &str, window: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: bool = conn
            .pexpire(key, window_millis(window))
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn set_expiry_if_unset(&self, key: &str, window: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let applied: i64 = self
            .expire_if_unset
            .key(key)
            .arg(window_millis(window))
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(applied == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_millis() {
        assert_eq!(window_millis(Duration::from_secs(120)), 120_000);
        assert_eq!(window_millis(Duration::from_micros(10)), 1);
    }

    #[tokio::test]
    async fn test_malformed_url_is_configuration_error() {
        let err = RedisCounterStore::connect("not-a-redis-url").await.unwrap_err();
        assert!(matches!(err, GatekeeperError::Configuration(_)));
        assert!(!err.is_retryable());
    }
}
