//! Redis-backed key-value store
//!
//! Every call is bounded by a per-operation timeout because these lookups
//! sit on the authentication hot path.

use super::{KeyValueStore, Result, StoreError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// INCRBY then arm the window only if the key has no TTL yet
const INCREMENT_SCRIPT: &str = r#"
local value = redis.call('INCRBY', KEYS[1], ARGV[1])
local window = tonumber(ARGV[2])
if window > 0 and redis.call('PTTL', KEYS[1]) < 0 then
    redis.call('PEXPIRE', KEYS[1], window)
end
return value
"#;

const SCAN_BATCH: u64 = 500;

/// Redis store
pub struct RedisStore {
    conn: ConnectionManager,
    op_timeout: Duration,
    key_prefix: String,
    increment_script: Script,
}

impl RedisStore {
    /// Connect to Redis
    pub async fn connect(url: &str, op_timeout: Duration, key_prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Unavailable(format!("invalid redis url: {e}")))?;

        // Connection setup gets a longer budget than a single command
        let setup_timeout = op_timeout.max(Duration::from_secs(5));
        let conn = tokio::time::timeout(setup_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(setup_timeout))??;

        info!("Connected to Redis (op timeout {:?})", op_timeout);

        Ok(Self {
            conn,
            op_timeout,
            key_prefix: key_prefix.to_string(),
            increment_script: Script::new(INCREMENT_SCRIPT),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(self.op_timeout)),
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PX 0 is rejected by Redis
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        self.run(redis::cmd("GET").arg(&key).query_async::<_, Option<String>>(&mut conn))
            .await
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        self.run(
            redis::cmd("SET")
                .arg(&key)
                .arg(value)
                .arg("PX")
                .arg(ttl_millis(ttl))
                .query_async::<_, ()>(&mut conn),
        )
        .await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        // SET NX replies nil when the key already exists
        let reply = self
            .run(
                redis::cmd("SET")
                    .arg(&key)
                    .arg(value)
                    .arg("PX")
                    .arg(ttl_millis(ttl))
                    .arg("NX")
                    .query_async::<_, Option<String>>(&mut conn),
            )
            .await?;
        Ok(reply.is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        let count = self
            .run(redis::cmd("EXISTS").arg(&key).query_async::<_, i64>(&mut conn))
            .await?;
        Ok(count > 0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        let applied = self
            .run(
                redis::cmd("PEXPIRE")
                    .arg(&key)
                    .arg(ttl_millis(ttl))
                    .query_async::<_, i64>(&mut conn),
            )
            .await?;
        Ok(applied == 1)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        self.run(redis::cmd("DEL").arg(&key).query_async::<_, i64>(&mut conn))
            .await?;
        Ok(())
    }

    async fn increment(&self, key: &str, delta: i64, window: Option<Duration>) -> Result<i64> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        let window_ms = window.map(ttl_millis).unwrap_or(0);
        self.run(
            self.increment_script
                .key(&key)
                .arg(delta)
                .arg(window_ms)
                .invoke_async::<_, i64>(&mut conn),
        )
        .await
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        self.run(
            redis::pipe()
                .atomic()
                .cmd("HSET")
                .arg(&key)
                .arg(field)
                .arg(value)
                .ignore()
                .cmd("PEXPIRE")
                .arg(&key)
                .arg(ttl_millis(ttl))
                .ignore()
                .query_async::<_, ()>(&mut conn),
        )
        .await
    }

    async fn count_prefix(&self, prefix: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", self.key(prefix));
        let mut cursor: u64 = 0;
        let mut total: u64 = 0;

        loop {
            let (next, keys) = self
                .run(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async::<_, (u64, Vec<String>)>(&mut conn),
                )
                .await?;
            total += keys.len() as u64;
            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!("Counted {} keys matching {}", total, pattern);
        Ok(total)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        self.run(redis::cmd("PING").query_async::<_, String>(&mut conn))
            .await?;
        Ok(())
    }
}
