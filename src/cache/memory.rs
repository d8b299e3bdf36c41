use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::backend::CacheBackend;

/// Stored entry: serialized value plus its absolute expiry.
#[derive(Clone, Debug)]
struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Process-local store, used when no shared store is configured.
pub struct MemoryStore {
    entries: DashMap<String, MemoryEntry>,
    max_entries: usize,
    evictions: AtomicU64,
    expired: AtomicU64,
}

impl MemoryStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
            evictions: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.expired.fetch_add(removed as u64, Ordering::Relaxed);
            debug!("Swept {} expired local cache entries", removed);
        }
        removed
    }

    /// Evict the entry closest to expiry
    fn evict_one(&self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.expires_at)
            .map(|entry| entry.key().clone());

        if let Some(key) = victim {
            self.entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "entries": self.entries.len(),
            "max_entries": self.max_entries,
            "evictions": self.evictions.load(Ordering::Relaxed),
            "expired": self.expired.load(Ordering::Relaxed),
        })
    }
}

#[async_trait]
impl CacheBackend for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.clone()));
            }
        }

        // Re-checked under the shard lock: a set that landed since the read stays.
        if self.entries.remove_if(key, |_, entry| entry.is_expired(now)).is_some() {
            self.expired.fetch_add(1, Ordering::Relaxed);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> anyhow::Result<()> {
        let entry = MemoryEntry {
            value,
            expires_at: Instant::now() + ttl,
        };

        // Only make room for a new key; overwrites don't grow the map.
        if !self.entries.contains_key(key) && self.entries.len() >= self.max_entries {
            self.purge_expired();
            if self.entries.len() >= self.max_entries {
                self.evict_one();
            }
        }

        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn delete_pattern(&self, pattern: &str) -> anyhow::Result<u64> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.contains(pattern));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }
}
