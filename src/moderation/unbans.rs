//! Timed bans waiting to be lifted
//!
//! Scheduler timers die with the process, so every timed ban is also kept
//! here and snapshotted with the rest of the moderation state. The recovery
//! sweep re-registers whatever the scheduler no longer knows about.

use crate::moderation::{ActionKind, ModerationResult, ScheduledAction, SubjectKey};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serenity::all::{GuildId, UserId};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Pending unbans keyed by subject, snapshotted to YAML
#[derive(Debug, Clone, Default)]
pub struct PendingUnbans {
    pending: Arc<DashMap<SubjectKey, DateTime<Utc>>>,
}

impl PendingUnbans {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember that the subject's ban ends at `due_at`, replacing an earlier entry
    pub fn insert(&self, guild_id: GuildId, user_id: UserId, due_at: DateTime<Utc>) {
        self.pending.insert((guild_id, user_id), due_at);
    }

    #[must_use]
    pub fn due_at(&self, guild_id: GuildId, user_id: UserId) -> Option<DateTime<Utc>> {
        self.pending.get(&(guild_id, user_id)).map(|entry| *entry)
    }

    /// Forget the subject's pending unban
    pub fn remove(&self, guild_id: GuildId, user_id: UserId) -> Option<DateTime<Utc>> {
        self.pending
            .remove(&(guild_id, user_id))
            .map(|(_, due_at)| due_at)
    }

    /// Forget the entry only if it is still the one due at `due_at`
    pub fn remove_if_due(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        due_at: DateTime<Utc>,
    ) -> bool {
        self.pending
            .remove_if(&(guild_id, user_id), |_, current| *current == due_at)
            .is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Every pending unban as a schedulable action, soonest first
    #[must_use]
    pub fn actions(&self) -> Vec<ScheduledAction> {
        let mut actions: Vec<ScheduledAction> = self
            .pending
            .iter()
            .map(|entry| {
                let (guild_id, user_id) = *entry.key();
                ScheduledAction::new(ActionKind::Unban, guild_id, user_id, *entry.value())
            })
            .collect();
        actions.sort_by_key(|action| (action.due_at, action.guild_id, action.user_id));
        actions
    }

    /// Load pending unbans from YAML; missing or unreadable files give an empty table
    pub async fn load(path: &Path) -> Self {
        let unbans = Self::new();
        if let Ok(file_content) = tokio::fs::read_to_string(path).await {
            match serde_yaml::from_str::<Vec<ScheduledAction>>(&file_content) {
                Ok(actions) => {
                    for action in actions {
                        if action.kind == ActionKind::Unban {
                            unbans.insert(action.guild_id, action.user_id, action.due_at);
                        }
                    }
                }
                Err(e) => warn!(
                    path = %path.display(),
                    error = %e,
                    "Ignoring unreadable pending unbans"
                ),
            }
        }
        unbans
    }

    /// Save every pending unban to YAML
    ///
    /// # Errors
    /// Returns an error if the entries cannot be serialized or written.
    pub async fn save(&self, path: &Path) -> ModerationResult<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        tokio::fs::write(path, serde_yaml::to_string(&self.actions())?).await?;
        Ok(())
    }
}
