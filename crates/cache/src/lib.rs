//! Redis-backed [`TtlCache`] for the cache rate-limit backend.
//!
//! The connection is opened on first use, so the service starts (and the
//! limiter fails open) while Redis is unreachable. A failed connect is
//! retried on the next call.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::sync::OnceCell;
use warden_core::rate_limit::{CacheError, TtlCache};

pub struct RedisTtlCache {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
}

impl RedisTtlCache {
    /// Validate `url` without connecting.
    pub fn new(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(|e| {
            tracing::warn!(error = %e, "Invalid Redis URL for rate limiting");
            backend(e)
        })?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
        })
    }

    async fn conn(&self) -> Result<ConnectionManager, CacheError> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                let manager = ConnectionManager::new(self.client.clone())
                    .await
                    .map_err(|e| {
                        tracing::warn!(error = %e, "Failed to connect to Redis for rate limiting");
                        backend(e)
                    })?;
                tracing::debug!("Connected to Redis for rate limiting");
                Ok::<_, CacheError>(manager)
            })
            .await?;
        Ok(manager.clone())
    }

    /// Round-trip a PING.
    pub async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        let reply: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        if reply != "PONG" {
            return Err(CacheError::Protocol(format!("PING returned {reply}")));
        }
        Ok(())
    }
}

#[async_trait]
impl TtlCache for RedisTtlCache {
    async fn pttl(&self, key: &str) -> Result<Option<i64>, CacheError> {
        let mut conn = self.conn().await?;
        let ttl: i64 = redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        // -2: no such key, -1: key without expiry.
        Ok((ttl >= 0).then_some(ttl))
    }

    async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        let mut conn = self.conn().await?;
        redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(backend)
    }

    async fn set_nx_ex(&self, key: &str, secs: u64, value: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn().await?;
        // Nil reply when the key already exists.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(secs)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(reply.is_some())
    }

    async fn setex(&self, key: &str, secs: u64, value: &str) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("SETEX")
            .arg(key)
            .arg(secs)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(())
    }
}

fn backend(err: redis::RedisError) -> CacheError {
    CacheError::Backend(err.to_string())
}
