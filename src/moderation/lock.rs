//! Per-subject mutual exclusion
//!
//! Every read-modify-write of a member's mute state runs while holding the
//! lock for that (guild, member) pair, remote calls included. Entries are
//! created on first use and can be evicted once nobody holds or waits on them.

use dashmap::DashMap;
use serenity::all::{GuildId, UserId};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Subject of a moderation lifecycle
pub type SubjectKey = (GuildId, UserId);

/// Held while mutating a subject; released on drop
pub type SubjectGuard = OwnedMutexGuard<()>;

/// Registry of per-subject locks
#[derive(Clone, Default)]
pub struct SubjectLocks {
    locks: Arc<DashMap<SubjectKey, Arc<Mutex<()>>>>,
}

impl SubjectLocks {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the subject is free and take it
    pub async fn acquire(&self, guild_id: GuildId, user_id: UserId) -> SubjectGuard {
        // Clone the Arc out so the map shard is not held across the await
        let lock = Arc::clone(
            self.locks
                .entry((guild_id, user_id))
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        lock.lock_owned().await
    }

    /// Number of subjects with a lock entry
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Drop entries that nobody holds or waits on
    pub fn evict_idle(&self) -> usize {
        let mut evicted = 0;
        // Holders and waiters keep their own Arc clone
        self.locks.retain(|_, lock| {
            let in_use = Arc::strong_count(lock) > 1;
            if !in_use {
                evicted += 1;
            }
            in_use
        });
        evicted
    }
}
