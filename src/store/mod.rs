//! Shared counter store.
//!
//! Every server process talks to one store instance, and the store's atomic
//! increment is the only serialization point for a counter across the fleet.
//! Nothing in this crate keeps in-process locks around request counting.

mod memory;
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryCounterStore;
pub use self::redis_store::{RedisCounterStore, RedisStoreConfig};

/// Errors that can occur when talking to the counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Operations the rate limiting core needs from the counter store.
///
/// `increment` and `ttl` sit on the request path. `keys_matching` and
/// `delete` are administrative and must never be called while serving.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key` and return the new count.
    ///
    /// An absent counter is created at 1 with a time-to-live of `window`.
    /// Later increments leave the expiry untouched, so the window is fixed
    /// from the first hit.
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError>;

    /// Remaining time-to-live of `key`, or `None` if it does not exist.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// All keys matching a Redis-style glob pattern.
    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Delete the given keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;
}
