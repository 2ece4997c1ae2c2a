//! Redis-backed store shared by every worker process.

use redis::{aio::ConnectionManager, AsyncCommands};
use std::{fmt, time::Duration};
use tracing::{debug, instrument};

use super::{ttl_seconds, Counter, KeyValueStore, SetMode, StoreError, StoreFuture};

const SCAN_BATCH: usize = 200;

#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to `url`, e.g. `redis://127.0.0.1:6379/0`.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the server is unreachable.
    #[instrument(skip(url))]
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_connection_manager().await?;
        debug!("Connected to redis");
        Ok(Self { connection })
    }
}

impl SetMode {
    const fn redis_flag(self) -> Option<&'static str> {
        match self {
            Self::Always => None,
            Self::IfAbsent => Some("NX"),
            Self::IfPresent => Some("XX"),
        }
    }
}

impl KeyValueStore for RedisStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            let value: Option<String> = connection.get(key).await?;
            Ok(value)
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: String,
        ttl: Duration,
        mode: SetMode,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            let mut command = redis::cmd("SET");
            command.arg(key).arg(value).arg("EX").arg(ttl_seconds(ttl));
            if let Some(flag) = mode.redis_flag() {
                command.arg(flag);
            }
            // SET replies OK when written and nil when NX/XX blocked the write
            let reply: Option<String> = command.query_async(&mut connection).await?;
            Ok(reply.is_some())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            let removed: u64 = connection.del(key).await?;
            Ok(removed > 0)
        })
    }

    fn increment<'a>(&'a self, key: &'a str, ttl: Duration) -> StoreFuture<'a, Counter> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            let (value, remaining): (u64, i64) = redis::pipe()
                .atomic()
                .cmd("SET")
                .arg(key)
                .arg(0)
                .arg("EX")
                .arg(ttl_seconds(ttl))
                .arg("NX")
                .ignore()
                .cmd("INCR")
                .arg(key)
                .cmd("TTL")
                .arg(key)
                .query_async(&mut connection)
                .await?;
            Ok(Counter {
                value,
                expires_in: Duration::from_secs(u64::try_from(remaining).unwrap_or(0)),
            })
        })
    }

    fn delete_prefix<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            let pattern = format!("{prefix}*");
            let mut cursor: u64 = 0;
            let mut removed: u64 = 0;
            loop {
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query_async(&mut connection)
                    .await?;
                if !keys.is_empty() {
                    let count: u64 = connection.del(&keys).await?;
                    removed += count;
                }
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            debug!("Removed {removed} keys under {prefix}");
            Ok(removed)
        })
    }
}
