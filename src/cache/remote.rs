use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{debug, info};

use super::backend::CacheBackend;

/// Shared Redis-compatible store.
///
/// `ConnectionManager` reconnects on its own and multiplexes, so a clone per
/// call is all the pooling this needs.
pub struct RedisStore {
    connection: ConnectionManager,
    /// Per SCAN/DEL round-trip inside a pattern delete
    round_trip_timeout: Duration,
    scan_batch: usize,
}

impl RedisStore {
    pub async fn connect(
        url: &str,
        connect_timeout: Duration,
        round_trip_timeout: Duration,
        scan_batch: usize,
    ) -> anyhow::Result<Self> {
        let client = Client::open(url)
            .map_err(|e| anyhow::anyhow!("Failed to create Redis client: {}", e))?;

        let connection = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| anyhow::anyhow!("Timed out connecting to Redis after {:?}", connect_timeout))?
            .map_err(|e| anyhow::anyhow!("Failed to connect to Redis: {}", e))?;

        info!("Connected to shared cache at {}", redact_url(url));
        Ok(Self {
            connection,
            round_trip_timeout,
            scan_batch: scan_batch.max(1),
        })
    }

    async fn round_trip<T, F>(&self, step: &str, call: F) -> anyhow::Result<T>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        tokio::time::timeout(self.round_trip_timeout, call)
            .await
            .map_err(|_| anyhow::anyhow!("{} timed out after {:?}", step, self.round_trip_timeout))?
            .map_err(|e| anyhow::anyhow!("{} failed: {}", step, e))
    }
}

#[async_trait]
impl CacheBackend for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.connection.clone();
        // SETEX rejects 0
        let secs = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, value, secs).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        let mut conn = self.connection.clone();
        let removed: u64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    /// Cursor SCAN with `MATCH *pattern*`, deleting each batch as it arrives.
    /// Each round-trip has its own timeout; the caller bounds the whole loop.
    /// Keys written after the scan passes their slot can survive until TTL.
    async fn delete_pattern(&self, pattern: &str) -> anyhow::Result<u64> {
        let mut conn = self.connection.clone();
        let glob = substring_glob(pattern);
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let mut scan = redis::cmd("SCAN");
            scan.arg(cursor)
                .arg("MATCH")
                .arg(&glob)
                .arg("COUNT")
                .arg(self.scan_batch);
            let (next, keys): (u64, Vec<String>) =
                self.round_trip("SCAN", scan.query_async(&mut conn)).await?;

            if !keys.is_empty() {
                let deleted: u64 = self.round_trip("DEL", conn.del(&keys)).await?;
                removed += deleted;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!("Pattern delete '{}' removed {} keys", pattern, removed);
        Ok(removed)
    }
}

/// Glob that matches `pattern` anywhere in the key.
pub fn substring_glob(pattern: &str) -> String {
    let mut glob = String::with_capacity(pattern.len() + 2);
    glob.push('*');
    for c in pattern.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\' | '^') {
            glob.push('\\');
        }
        glob.push(c);
    }
    glob.push('*');
    glob
}

/// Strip credentials before logging a connection URL.
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}
