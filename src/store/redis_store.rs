//! Redis-backed counter store.
//!
//! Counters are plain integer keys with a millisecond expiry:
//! - Keys: `<prefix>:<identity>` as built by the policies
//! - Values: request count for the current window
//! - TTL: set once when the counter is created, never extended
//!
//! Connections go through `redis::aio::ConnectionManager`, which multiplexes
//! a single connection and reconnects on failure. Clones share it.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{
    AsyncCommands, Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo, Script,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{CounterStore, StoreError};

/// Increment and arm the expiry in one round trip.
///
/// The expiry is only set when the counter was just created, or when it has
/// somehow lost its TTL, so a counter can never outlive its window forever.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 or redis.call('PTTL', KEYS[1]) == -1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Batch size hint for `SCAN`.
const SCAN_COUNT: usize = 100;

/// Connection settings for the Redis store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisStoreConfig {
    /// Redis host
    #[serde(default = "default_host")]
    pub host: String,

    /// Redis port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Optional password
    #[serde(default)]
    pub password: Option<String>,

    /// Logical database index
    #[serde(default)]
    pub database: u8,

    /// Timeout for establishing the initial connection, in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            password: None,
            database: 0,
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_connect_timeout() -> u64 {
    2000
}

impl RedisStoreConfig {
    /// Connection parameters for the client.
    ///
    /// Built field by field rather than as a URL, so passwords are passed
    /// through untouched whatever characters they contain.
    pub fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: RedisConnectionInfo {
                db: i64::from(self.database),
                password: self.password.clone().filter(|p| !p.is_empty()),
                ..Default::default()
            },
        }
    }

    /// Read settings from `REDIS_HOST`, `REDIS_PORT` and `REDIS_PASSWORD`.
    pub fn from_env() -> Result<Self, StoreError> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("REDIS_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("REDIS_PORT") {
            config.port = port
                .parse()
                .map_err(|_| StoreError::Unavailable(format!("invalid REDIS_PORT: {port}")))?;
        }
        if let Ok(password) = std::env::var("REDIS_PASSWORD") {
            config.password = Some(password);
        }

        Ok(config)
    }
}

/// Counter store shared by every server instance through Redis.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: ConnectionManager,
    script: Script,
}

impl fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore").finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    /// Connect using the given settings.
    ///
    /// # Errors
    /// Returns an error if the settings are rejected, the connection cannot be
    /// established within `connect_timeout_ms`, or the server refuses it.
    pub async fn connect(config: &RedisStoreConfig) -> Result<Self, StoreError> {
        let client = Client::open(config.connection_info())?;
        let timeout = Duration::from_millis(config.connect_timeout_ms);

        let connection = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(timeout))??;

        info!(host = %config.host, port = config.port, "Connected to Redis counter store");

        Ok(Self {
            connection,
            script: Script::new(INCREMENT_SCRIPT),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        let window_ms = u64::try_from(window.as_millis().max(1)).unwrap_or(u64::MAX);

        let count: u64 = self
            .script
            .key(key)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await?;

        Ok(count)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.connection.clone();
        let ttl_ms: i64 = conn.pttl(key).await?;

        // -2: no such key, -1: key without expiry
        if ttl_ms < 0 {
            Ok(None)
        } else {
            Ok(Some(Duration::from_millis(ttl_ms as u64)))
        }
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;

            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return the same key more than once
        keys.sort();
        keys.dedup();

        debug!(pattern = %pattern, found = keys.len(), "Scanned counter keys");
        Ok(keys)
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection.clone();
        let deleted: u64 = conn.del(keys).await?;
        Ok(deleted)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
