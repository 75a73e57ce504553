//! Self-action markers
//!
//! Before the bot bans or unbans someone it leaves a short-lived marker. The
//! gateway later reports the same ban change back to every shard; the first
//! observation that finds the marker consumes it and treats the event as the
//! bot's own. Markers nobody observes simply lapse.

use crate::moderation::{KeyValueStore, ModerationResult};
use serde::{Deserialize, Serialize};
use serenity::all::{GuildId, UserId};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// How long a marker waits for its observation
pub const MARKER_LIFETIME: Duration = Duration::from_secs(300);

/// Kind of action the bot performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarkerKind {
    Banned,
    Unbanned,
}

impl fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Banned => write!(f, "banned"),
            Self::Unbanned => write!(f, "unbanned"),
        }
    }
}

/// Key under which a marker is stored
#[must_use]
pub fn marker_key(kind: MarkerKind, guild_id: GuildId, user_id: UserId) -> String {
    format!("moderation_{kind}_user:{guild_id}:{user_id}")
}

/// Store for single-use self-action markers
#[derive(Clone)]
pub struct ActionMarkerStore {
    kv: Arc<dyn KeyValueStore>,
    lifetime: Duration,
}

impl ActionMarkerStore {
    /// Create a marker store on top of a key/value store
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            lifetime: MARKER_LIFETIME,
        }
    }

    /// Record that the bot is about to perform `kind` against the user
    pub async fn mark(
        &self,
        kind: MarkerKind,
        guild_id: GuildId,
        user_id: UserId,
    ) -> ModerationResult<()> {
        self.kv
            .set_ex(&marker_key(kind, guild_id, user_id), 1, self.lifetime)
            .await
    }

    /// Consume the marker if present; `true` means the observed event was ours
    pub async fn consume(
        &self,
        kind: MarkerKind,
        guild_id: GuildId,
        user_id: UserId,
    ) -> ModerationResult<bool> {
        let value = self.kv.get_del(&marker_key(kind, guild_id, user_id)).await?;
        Ok(value.is_some_and(|v| v > 0))
    }

    /// Withdraw a marker for an action that never happened
    pub async fn clear(
        &self,
        kind: MarkerKind,
        guild_id: GuildId,
        user_id: UserId,
    ) -> ModerationResult<()> {
        self.kv.del(&marker_key(kind, guild_id, user_id)).await?;
        Ok(())
    }
}
