//! Mute record
//!
//! One active record per (guild, member). The record remembers which roles
//! were taken away so they can be handed back when the mute ends.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serenity::all::{GuildId, RoleId, UserId};

/// Persisted record of an active mute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuteRecord {
    pub guild_id: GuildId,
    pub user_id: UserId,
    /// When the scheduled unmute is due
    pub expires_at: DateTime<Utc>,
    /// Roles taken away at mute time or while muted, in removal order
    pub removed_roles: Vec<RoleId>,
    pub created_at: DateTime<Utc>,
    /// Moderator who issued the mute
    pub author_id: Option<UserId>,
    pub reason: Option<String>,
}

impl MuteRecord {
    /// Create a record for a mute lasting `duration` from now
    #[must_use]
    pub fn new(guild_id: GuildId, user_id: UserId, duration: Duration) -> Self {
        let now = Utc::now();
        Self {
            guild_id,
            user_id,
            expires_at: now + duration,
            removed_roles: Vec::new(),
            created_at: now,
            author_id: None,
            reason: None,
        }
    }

    /// Remember a removed role unless it is already remembered
    pub fn remember_role(&mut self, role_id: RoleId) -> bool {
        if self.removed_roles.contains(&role_id) {
            return false;
        }
        self.removed_roles.push(role_id);
        true
    }

    /// Time left until expiry, zero once due
    #[must_use]
    pub fn remaining(&self) -> std::time::Duration {
        (self.expires_at - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}
