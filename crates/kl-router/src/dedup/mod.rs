//! Deduplication stores
//!
//! A [`Deduplicator`] provides an atomic test-and-set with expiry: for a given
//! key, exactly one caller per TTL window observes `true`.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod redis;

pub use self::memory::InMemoryDeduplicator;
pub use self::redis::RedisDeduplicator;

#[derive(Error, Debug)]
pub enum DedupError {
    #[error("deduplication key cannot be empty")]
    EmptyKey,

    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

#[async_trait]
pub trait Deduplicator: Send + Sync {
    /// Record `key` for `ttl`. Returns `true` when the key was not already live.
    async fn set_if_not_exists(&self, key: &str, ttl: Duration) -> Result<bool, DedupError>;
}
