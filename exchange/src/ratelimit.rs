//! The two quota pools backed by an external cache: a per account free quota
//! allowance that refreshes periodically, and a per token counter for sold
//! quota living exactly as long as the token. Both decrement atomically; a
//! negative value after decrement means the caller is out of quota.

use anyhow::{Context, Result};
use std::time::Duration;

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Atomically decrements `key` by `cost`. An absent key is initialized to
    /// `initial` with time-to-live `ttl` before the decrement. Returns the
    /// value after the decrement.
    async fn decrement(&self, key: &str, cost: i64, initial: i64, ttl: Duration) -> Result<i64>;

    /// Unconditionally sets `key` to `quantity` with time-to-live `ttl`.
    async fn set_quota(&self, key: &str, quantity: i64, ttl: Duration) -> Result<()>;
}

#[derive(Clone)]
pub struct RedisRateLimitStore {
    connection: redis::aio::ConnectionManager,
}

impl RedisRateLimitStore {
    pub async fn new(host: &str, port: u16) -> Result<Self> {
        let client = redis::Client::open(format!("redis://{}:{}", host, port))
            .context("invalid redis address")?;
        let connection = client
            .get_tokio_connection_manager()
            .await
            .context("cannot connect to redis")?;
        Ok(Self { connection })
    }
}

#[async_trait::async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn decrement(&self, key: &str, cost: i64, initial: i64, ttl: Duration) -> Result<i64> {
        // Initialization and decrement have to be one atomic step, otherwise
        // two concurrent claims could both see the fresh allowance.
        const SCRIPT: &str = r#"
            redis.call('SET', KEYS[1], ARGV[2], 'NX', 'EX', tonumber(ARGV[3]))
            return redis.call('DECRBY', KEYS[1], ARGV[1])
        "#;
        let mut connection = self.connection.clone();
        let remaining: i64 = redis::Script::new(SCRIPT)
            .key(key)
            .arg(cost)
            .arg(initial)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut connection)
            .await
            .context("rate limit decrement failed")?;
        Ok(remaining)
    }

    async fn set_quota(&self, key: &str, quantity: i64, ttl: Duration) -> Result<()> {
        let mut connection = self.connection.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(quantity)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut connection)
            .await
            .context("rate limit set failed")?;
        Ok(())
    }
}

pub fn free_quota_key(account_id: i64) -> String {
    format!("free-quota:{}", account_id)
}

pub fn sold_quota_key(jti: &str) -> String {
    format!("sold-quota:{}", jti)
}
