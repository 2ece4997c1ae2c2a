//! Shared state storage for sessions and login attempts.
//!
//! Everything the gate needs to remember between requests goes through
//! [`KeyValueStore`]. Each operation is atomic for its key, so callers never
//! need their own locking:
//!
//! - `set` with [`SetMode::IfAbsent`] / [`SetMode::IfPresent`] maps to Redis
//!   `SET NX` / `SET XX`.
//! - `increment` creates the counter with an expiry on first use and bumps it
//!   in one step.
//!
//! [`MemoryStore`] only covers a single process. Deployments running several
//! worker processes must use [`RedisStore`] or sessions and lockouts will
//! differ between workers.

pub mod clock;
pub mod memory;
pub mod redis_store;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

use std::{fmt, future::Future, pin::Pin, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::info;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("invalid record: {0}")]
    Record(#[from] serde_json::Error),
    #[error("corrupt value for key {0}")]
    Corrupt(String),
    #[error("store unavailable")]
    Unavailable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetMode {
    Always,
    IfAbsent,
    IfPresent,
}

/// Result of an atomic increment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Counter {
    pub value: u64,
    pub expires_in: Duration,
}

pub trait KeyValueStore: fmt::Debug + Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

    /// Store `value` for `ttl`. Returns `false` when `mode` prevented the write.
    fn set<'a>(
        &'a self,
        key: &'a str,
        value: String,
        ttl: Duration,
        mode: SetMode,
    ) -> StoreFuture<'a, bool>;

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool>;

    /// Increment a counter, creating it with `ttl` when it does not exist.
    /// The expiry of an existing counter is left untouched.
    fn increment<'a>(&'a self, key: &'a str, ttl: Duration) -> StoreFuture<'a, Counter>;

    fn delete_prefix<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, u64>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Redis,
}

impl Backend {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "redis" => Some(Self::Redis),
            _ => None,
        }
    }
}

/// Open the configured backend.
///
/// # Errors
/// Returns an error if the Redis URL is missing or the server cannot be reached.
pub async fn connect(
    backend: Backend,
    redis_url: Option<&str>,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    match backend {
        Backend::Memory => {
            info!("Using in-process session store (single worker only)");
            Ok(Arc::new(MemoryStore::new(clock)))
        }
        Backend::Redis => {
            let url = redis_url
                .ok_or_else(|| anyhow::anyhow!("redis store selected but no redis URL given"))?;
            let store = RedisStore::connect(url).await?;
            info!("Using redis session store");
            Ok(Arc::new(store))
        }
    }
}


/// Clamp a TTL to whole seconds, never zero.
pub(crate) fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parse() {
        assert_eq!(Backend::parse("memory"), Some(Backend::Memory));
        assert_eq!(Backend::parse(" Redis "), Some(Backend::Redis));
        assert_eq!(Backend::parse("postgres"), None);
    }

    #[test]
    fn ttl_seconds_never_zero() {
        assert_eq!(ttl_seconds(Duration::from_millis(10)), 1);
        assert_eq!(ttl_seconds(Duration::from_secs(90)), 90);
    }

    #[tokio::test]
    async fn connect_redis_requires_url() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let result = connect(Backend::Redis, None, clock).await;
        assert!(result.is_err());
    }
}
