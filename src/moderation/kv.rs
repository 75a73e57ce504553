//! Expiring key/value store
//!
//! Short-lived coordination state (the "still muted" hint and the self-action
//! markers) lives behind this trait so it can be shared by every shard. The
//! semantics follow Redis: `SET key value EX ttl`, `GET`, `GETDEL`, `DEL` and
//! `TTL`, where `TTL` answers `-2` for a missing key. Every key expires.

use crate::moderation::ModerationResult;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// `TTL` answer for a key that does not exist
pub const TTL_MISSING: i64 = -2;

/// Redis-like key/value operations used by the coordinator
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Set `key` to `value`, expiring after `ttl`
    async fn set_ex(&self, key: &str, value: i64, ttl: Duration) -> ModerationResult<()>;

    /// Read `key`
    async fn get(&self, key: &str) -> ModerationResult<Option<i64>>;

    /// Read and delete `key` in one step
    async fn get_del(&self, key: &str) -> ModerationResult<Option<i64>>;

    /// Delete `key`, returning whether it existed
    async fn del(&self, key: &str) -> ModerationResult<bool>;

    /// Remaining lifetime of `key` in whole seconds
    async fn ttl(&self, key: &str) -> ModerationResult<i64>;

    /// Drop entries whose lifetime ran out, returning how many went
    ///
    /// Backends that expire keys on their own return `Ok(0)`.
    async fn purge_expired(&self) -> ModerationResult<usize> {
        Ok(0)
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    value: i64,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-process store, used for single-process deployments and in tests
#[derive(Clone, Default)]
pub struct MemoryKv {
    entries: Arc<DashMap<String, Entry>>,
}

impl MemoryKv {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn live(&self, key: &str) -> Option<Entry> {
        let now = Instant::now();
        let entry = *self.entries.get(key)?;
        if entry.is_live(now) {
            Some(entry)
        } else {
            self.entries.remove_if(key, |_, e| !e.is_live(now));
            None
        }
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryKv {
    async fn set_ex(&self, key: &str, value: i64, ttl: Duration) -> ModerationResult<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> ModerationResult<Option<i64>> {
        Ok(self.live(key).map(|entry| entry.value))
    }

    async fn get_del(&self, key: &str) -> ModerationResult<Option<i64>> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .map(|(_, entry)| entry)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value))
    }

    async fn del(&self, key: &str) -> ModerationResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| entry.is_live(now)))
    }

    async fn ttl(&self, key: &str) -> ModerationResult<i64> {
        let Some(entry) = self.live(key) else {
            return Ok(TTL_MISSING);
        };
        let remaining = entry.expires_at.saturating_duration_since(Instant::now());
        // Rounded to the nearest second like Redis does
        let secs = (remaining.as_millis() + 500) / 1000;
        Ok(i64::try_from(secs).unwrap_or(i64::MAX))
    }

    async fn purge_expired(&self) -> ModerationResult<usize> {
        let now = Instant::now();
        let mut purged = 0;
        self.entries.retain(|_, entry| {
            let live = entry.is_live(now);
            if !live {
                purged += 1;
            }
            live
        });
        Ok(purged)
    }
}
