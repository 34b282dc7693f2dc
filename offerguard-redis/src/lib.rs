//! Redis backend for the `offerguard` result cache (companion crate).
//!
//! Values are written with `SET key value PX millis`, so expiry is enforced by the
//! server and shared by every process that points at the same instance.

use async_trait::async_trait;
use offerguard::cache::{BackendError, CacheBackend};
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use std::time::Duration;

/// Keys fetched per `SCAN` round trip during prefix invalidation.
const SCAN_BATCH: usize = 100;

#[derive(Clone)]
pub struct RedisCacheBackend {
    connection: ConnectionManager,
}

impl std::fmt::Debug for RedisCacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheBackend").field("connection", &"<ConnectionManager>").finish()
    }
}

impl RedisCacheBackend {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`) and verify it answers `PING`.
    ///
    /// # Errors
    /// Returns [`BackendError::Connection`] if the URL is invalid or the server is unreachable.
    pub async fn connect(url: &str) -> Result<Self, BackendError> {
        let client = Client::open(url).map_err(connection_error)?;
        let connection = ConnectionManager::new(client).await.map_err(connection_error)?;

        let backend = Self { connection };
        let mut conn = backend.connection.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await.map_err(connection_error)?;

        tracing::debug!(target: "offerguard::redis", url, "connected to redis");
        Ok(backend)
    }

    /// Wrap an existing connection manager.
    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

/// `PX` argument for `ttl`. Sub-millisecond remainders are dropped so an entry never
/// outlives its TTL.
fn expiry_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn connection_error(err: RedisError) -> BackendError {
    tracing::error!(target: "offerguard::redis", error = %err, "redis connection failed");
    BackendError::Connection(err.to_string())
}

fn command_error(operation: &'static str) -> impl FnOnce(RedisError) -> BackendError {
    move |err| BackendError::Command { operation, message: err.to_string() }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let mut conn = self.connection.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async::<Option<String>>(&mut conn)
            .await
            .map_err(command_error("GET"))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), BackendError> {
        let mut conn = self.connection.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(expiry_millis(ttl))
            .query_async::<()>(&mut conn)
            .await
            .map_err(command_error("SET"))
    }

    async fn delete(&self, key: &str) -> Result<bool, BackendError> {
        let mut conn = self.connection.clone();
        let removed = redis::cmd("DEL")
            .arg(key)
            .query_async::<u64>(&mut conn)
            .await
            .map_err(command_error("DEL"))?;
        Ok(removed > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, BackendError> {
        let mut conn = self.connection.clone();
        let pattern = format!("{}*", escape_glob(prefix));
        let mut cursor: u64 = 0;
        let mut removed = 0;

        loop {
            let (next, keys) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async::<(u64, Vec<String>)>(&mut conn)
                .await
                .map_err(command_error("SCAN"))?;

            if !keys.is_empty() {
                removed += redis::cmd("DEL")
                    .arg(&keys)
                    .query_async::<u64>(&mut conn)
                    .await
                    .map_err(command_error("DEL"))?;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        tracing::info!(target: "offerguard::redis", prefix, removed, "prefix invalidated");
        Ok(removed)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, BackendError> {
        let mut conn = self.connection.clone();
        let millis = redis::cmd("PTTL")
            .arg(key)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(command_error("PTTL"))?;
        // -2: no such key, -1: no expiry (never written by this backend).
        Ok(u64::try_from(millis).ok().filter(|ms| *ms > 0).map(Duration::from_millis))
    }
}

/// Escape the characters `SCAN MATCH` treats as glob syntax.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
