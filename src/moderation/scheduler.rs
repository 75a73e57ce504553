//! Delayed delivery of expiry actions
//!
//! Timed unmutes and unbans are registered here. When the delay elapses the
//! action is pushed into a channel that the coordinator task drains. Delivery
//! is not a promise that the action is still valid; the receiver re-checks.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serenity::all::{GuildId, UserId};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::warn;

/// Default capacity of the delivery channel
pub const DEFAULT_BUFFER: usize = 100;

/// What should happen when the delay elapses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Unmute,
    Unban,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unmute => write!(f, "unmute"),
            Self::Unban => write!(f, "unban"),
        }
    }
}

/// A future action for one subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledAction {
    pub kind: ActionKind,
    pub guild_id: GuildId,
    pub user_id: UserId,
    /// Expiry the action was registered for
    pub due_at: DateTime<Utc>,
}

impl ScheduledAction {
    #[must_use]
    pub const fn new(
        kind: ActionKind,
        guild_id: GuildId,
        user_id: UserId,
        due_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            guild_id,
            user_id,
            due_at,
        }
    }

    #[must_use]
    pub const fn key(&self) -> ScheduleKey {
        (self.kind, self.guild_id, self.user_id)
    }
}

/// One pending slot per kind and subject
pub type ScheduleKey = (ActionKind, GuildId, UserId);

/// Registry of delayed callbacks
pub trait ExpiryScheduler: Send + Sync {
    /// Deliver `action` after `delay`, replacing any pending action with the same key
    fn schedule(&self, action: ScheduledAction, delay: Duration);

    /// Drop the pending action for the key, returning whether one was pending
    fn cancel(&self, kind: ActionKind, guild_id: GuildId, user_id: UserId) -> bool;

    fn is_scheduled(&self, kind: ActionKind, guild_id: GuildId, user_id: UserId) -> bool;
}

struct Pending {
    generation: u64,
    handle: JoinHandle<()>,
}

/// [`ExpiryScheduler`] on tokio timers
///
/// Each registration is a sleeping task. Pending timers do not survive a
/// restart; the coordinator's recovery sweep re-registers them from the
/// persisted mute records.
#[derive(Clone)]
pub struct TokioScheduler {
    tx: Sender<ScheduledAction>,
    pending: Arc<DashMap<ScheduleKey, Pending>>,
    generation: Arc<AtomicU64>,
}

impl TokioScheduler {
    /// Create a scheduler and the receiving end of its delivery channel
    #[must_use]
    pub fn new(buffer: usize) -> (Self, Receiver<ScheduledAction>) {
        let (tx, rx) = mpsc::channel(buffer);
        let scheduler = Self {
            tx,
            pending: Arc::new(DashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
        };
        (scheduler, rx)
    }

    /// Number of registered timers that have not fired yet
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending
            .iter()
            .filter(|entry| !entry.value().handle.is_finished())
            .count()
    }
}

impl ExpiryScheduler for TokioScheduler {
    fn schedule(&self, action: ScheduledAction, delay: Duration) {
        let key = action.key();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let pending = Arc::clone(&self.pending);
        let tx = self.tx.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // A newer registration for the key owns the slot
            pending.remove_if(&key, |_, slot| slot.generation == generation);
            if tx.send(action).await.is_err() {
                warn!(
                    kind = %key.0,
                    guild_id = %key.1,
                    user_id = %key.2,
                    "Scheduled action dropped, receiver closed"
                );
            }
        });

        if let Some(previous) = self.pending.insert(key, Pending { generation, handle }) {
            previous.handle.abort();
        }
    }

    fn cancel(&self, kind: ActionKind, guild_id: GuildId, user_id: UserId) -> bool {
        self.pending
            .remove(&(kind, guild_id, user_id))
            .map(|(_, slot)| {
                let was_pending = !slot.handle.is_finished();
                slot.handle.abort();
                was_pending
            })
            .unwrap_or(false)
    }

    fn is_scheduled(&self, kind: ActionKind, guild_id: GuildId, user_id: UserId) -> bool {
        self.pending
            .get(&(kind, guild_id, user_id))
            .is_some_and(|slot| !slot.handle.is_finished())
    }
}
