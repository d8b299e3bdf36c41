use std::time::Duration;

use async_trait::async_trait;

/// Raw key-value store beneath the coordinator.
///
/// Values are already-serialized JSON. Implementations report failures as
/// errors; the coordinator decides what a failure means for the caller.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short name for logs and stats (`"redis"`, `"memory"`).
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Whole-value replace with a fresh expiry.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> anyhow::Result<()>;

    /// True if the key existed.
    async fn delete(&self, key: &str) -> anyhow::Result<bool>;

    /// Remove every key containing `pattern` as a substring. Returns how many went.
    async fn delete_pattern(&self, pattern: &str) -> anyhow::Result<u64>;
}
