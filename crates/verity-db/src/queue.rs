//! Redis-backed work queue.
//!
//! Partitions are Redis lists: producers `RPUSH` onto the ready list and
//! workers lease with `BLMOVE ready processing LEFT RIGHT`, so delivery is
//! FIFO and a leased entry is always visible in exactly one list. Retry
//! counters are plain integer keys.
//!
//! Use one `RedisQueue` per consumer loop: `BLMOVE` holds the connection
//! for the duration of the poll.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::{debug, info};

use verity_core::{QueueBackend, Result};

/// Moves an entry back to the ready list only if it was still leased.
const REQUEUE_SCRIPT: &str = r#"
if redis.call('LREM', KEYS[1], 1, ARGV[1]) == 1 then
    redis.call('RPUSH', KEYS[2], ARGV[1])
    return 1
end
return 0
"#;

/// Queue backend over a Redis connection manager.
///
/// The connection manager reconnects transparently; commands issued while
/// Redis is down fail with [`verity_core::Error::Queue`].
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
}

impl RedisQueue {
    /// Connect to Redis at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!(
            subsystem = "queue",
            component = "redis",
            url = %redact_url(url),
            "Connected to Redis queue backend"
        );
        Ok(Self { conn })
    }

    /// Connect using `REDIS_URL` (default: redis://localhost:6379).
    pub async fn from_env() -> Result<Self> {
        let url = std::env::var("REDIS_URL")
            .unwrap_or_else(|_| verity_core::defaults::REDIS_URL.to_string());
        Self::connect(&url).await
    }
}

/// Mask credentials embedded in a Redis URL for logging.
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}

#[async_trait]
impl QueueBackend for RedisQueue {
    async fn lease_next(
        &self,
        ready: &str,
        processing: &str,
        timeout: Duration,
    ) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let entry: Option<String> = redis::cmd("BLMOVE")
            .arg(ready)
            .arg(processing)
            .arg("LEFT")
            .arg("RIGHT")
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await?;
        Ok(entry)
    }

    async fn remove_entry(&self, list: &str, entry: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.lrem(list, 1, entry).await?;
        Ok(removed > 0)
    }

    async fn push_tail(&self, list: &str, entry: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.rpush(list, entry).await?;
        Ok(())
    }

    async fn requeue(&self, processing: &str, ready: &str, entry: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let moved: i64 = Script::new(REQUEUE_SCRIPT)
            .key(processing)
            .key(ready)
            .arg(entry)
            .invoke_async(&mut conn)
            .await?;
        debug!(subsystem = "queue", component = "redis", op = "requeue", moved, "Requeue script ran");
        Ok(moved == 1)
    }

    async fn incr_counter(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.incr(key, 1).await?;
        Ok(value)
    }

    async fn delete_counter(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn get_counter(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn.get(key).await?;
        Ok(value)
    }

    async fn list_len(&self, list: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.llen(list).await?;
        Ok(len)
    }

    async fn list_entries(&self, list: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let entries: Vec<String> = conn.lrange(list, 0, -1).await?;
        Ok(entries)
    }
}
