//! Redis-backed deduplication
//!
//! Atomicity comes from `SET key 1 NX PX <ttl>`: Redis replies `OK` when the
//! key was set and nil when it already existed.

use std::time::Duration;

use ::redis::aio::{ConnectionLike, ConnectionManager};
use async_trait::async_trait;
use tracing::info;

use super::{DedupError, Deduplicator};

pub struct RedisDeduplicator<C = ConnectionManager> {
    conn: C,
    key_prefix: String,
}

impl RedisDeduplicator<ConnectionManager> {
    /// Connect with a reconnecting connection manager
    pub async fn connect(url: &str) -> Result<Self, DedupError> {
        let client = ::redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!(url = %url, "Connected to Redis for deduplication");
        Ok(Self::new(conn))
    }
}

impl<C> RedisDeduplicator<C> {
    pub fn new(conn: C) -> Self {
        Self {
            conn,
            key_prefix: String::new(),
        }
    }

    /// Prefix prepended to every stored key
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }
}

#[async_trait]
impl<C> Deduplicator for RedisDeduplicator<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    async fn set_if_not_exists(&self, key: &str, ttl: Duration) -> Result<bool, DedupError> {
        if key.is_empty() {
            return Err(DedupError::EmptyKey);
        }

        // PX 0 is rejected by Redis
        let ttl_ms = ttl.as_millis().clamp(1, u64::MAX as u128) as u64;

        let mut conn = self.conn.clone();
        let reply: Option<String> = ::redis::cmd("SET")
            .arg(format!("{}{}", self.key_prefix, key))
            .arg(1)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }
}
