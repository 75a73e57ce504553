//! Warnings issued by moderators

use crate::moderation::ModerationResult;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serenity::all::{GuildId, UserId};
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// A warning issued to a member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub id: Uuid,
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub author_id: UserId,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl Display for Warning {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} by <@{}>: {}",
            self.created_at.format("%Y-%m-%d %H:%M UTC"),
            self.author_id,
            self.reason
        )
    }
}

/// Warnings in memory, keyed by id
#[derive(Debug, Clone, Default)]
pub struct WarningStore {
    warnings: Arc<DashMap<Uuid, Warning>>,
}

impl WarningStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new warning
    pub fn add(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        author_id: UserId,
        reason: impl Into<String>,
    ) -> Warning {
        let warning = Warning {
            id: Uuid::new_v4(),
            guild_id,
            user_id,
            author_id,
            reason: reason.into(),
            created_at: Utc::now(),
        };
        self.warnings.insert(warning.id, warning.clone());
        warning
    }

    /// A member's warnings, oldest first
    #[must_use]
    pub fn for_user(&self, guild_id: GuildId, user_id: UserId) -> Vec<Warning> {
        let mut warnings: Vec<Warning> = self
            .warnings
            .iter()
            .filter(|entry| entry.guild_id == guild_id && entry.user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        warnings.sort_by_key(|warning| warning.created_at);
        warnings
    }

    /// Delete one warning issued in `guild_id`
    pub fn remove(&self, guild_id: GuildId, id: Uuid) -> Option<Warning> {
        self.warnings
            .remove_if(&id, |_, warning| warning.guild_id == guild_id)
            .map(|(_, warning)| warning)
    }

    /// Drop every warning of a member, returning how many went
    pub fn clear_user(&self, guild_id: GuildId, user_id: UserId) -> usize {
        let mut cleared = 0;
        self.warnings.retain(|_, warning| {
            let matches = warning.guild_id == guild_id && warning.user_id == user_id;
            if matches {
                cleared += 1;
            }
            !matches
        });
        cleared
    }

    /// Replace the reason of a warning issued in `guild_id`
    ///
    /// The new reason is marked with the moderator who changed it.
    pub fn edit(
        &self,
        guild_id: GuildId,
        id: Uuid,
        editor_id: UserId,
        reason: &str,
    ) -> Option<Warning> {
        let mut warning = self
            .warnings
            .get_mut(&id)
            .filter(|warning| warning.guild_id == guild_id)?;
        warning.reason = format!("{reason} (updated by <@{editor_id}>)");
        Some(warning.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Load warnings from YAML; missing or unreadable files give an empty store
    pub async fn load(path: &Path) -> Self {
        let store = Self::new();
        if let Ok(file_content) = tokio::fs::read_to_string(path).await {
            match serde_yaml::from_str::<Vec<Warning>>(&file_content) {
                Ok(warnings) => {
                    for warning in warnings {
                        store.warnings.insert(warning.id, warning);
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Ignoring unreadable warnings"),
            }
        }
        store
    }

    /// Save every warning to YAML
    ///
    /// # Errors
    /// Returns an error if the warnings cannot be serialized or written.
    pub async fn save(&self, path: &Path) -> ModerationResult<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let mut warnings: Vec<Warning> = self
            .warnings
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        warnings.sort_by_key(|warning| warning.created_at);
        tokio::fs::write(path, serde_yaml::to_string(&warnings)?).await?;
        Ok(())
    }
}
