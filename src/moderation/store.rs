//! Mute state storage
//!
//! The record repository is the durable truth. A TTL key in the key/value
//! store mirrors the remaining mute time so event handlers can check it
//! cheaply before taking the subject lock.

use crate::config::ModerationConfig;
use crate::moderation::gate;
use crate::moderation::{
    ActionKind, ExpiryScheduler, KeyValueStore, ModerationError, ModerationResult, MuteRecord,
    RemoteActions, ScheduledAction, SubjectKey,
};
use chrono::Utc;
use dashmap::DashMap;
use serenity::all::{GuildId, RoleId, UserId};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Key of the "still muted" hint
#[must_use]
pub fn muted_key(guild_id: GuildId, user_id: UserId) -> String {
    format!("moderation_muted_user:{guild_id}:{user_id}")
}

/// Persistence of mute records
#[async_trait::async_trait]
pub trait MuteRecordRepository: Send + Sync {
    async fn get(&self, guild_id: GuildId, user_id: UserId)
    -> ModerationResult<Option<MuteRecord>>;

    /// Insert or replace the subject's record
    async fn upsert(&self, record: MuteRecord) -> ModerationResult<()>;

    /// Append `role_id` to the record's removed roles unless present.
    /// `None` when the subject has no record, otherwise whether it was appended.
    async fn append_removed_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> ModerationResult<Option<bool>>;

    async fn delete(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> ModerationResult<Option<MuteRecord>>;

    /// Every active record
    async fn all(&self) -> ModerationResult<Vec<MuteRecord>>;
}

/// In-memory repository with YAML snapshots
#[derive(Clone, Default)]
pub struct MemoryMuteRepository {
    records: Arc<DashMap<SubjectKey, MuteRecord>>,
}

impl MemoryMuteRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Copy of every record, ordered by guild and user
    #[must_use]
    pub fn snapshot(&self) -> Vec<MuteRecord> {
        let mut records: Vec<MuteRecord> = self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(|record| (record.guild_id, record.user_id));
        records
    }

    /// Replace the contents with `records`, later duplicates win
    pub fn restore(&self, records: Vec<MuteRecord>) {
        self.records.clear();
        for record in records {
            self.records
                .insert((record.guild_id, record.user_id), record);
        }
    }

    /// Load records from a YAML file; missing or unreadable files give an empty repository
    pub async fn load(path: &Path) -> Self {
        let repository = Self::new();
        if let Ok(file_content) = tokio::fs::read_to_string(path).await {
            match serde_yaml::from_str::<Vec<MuteRecord>>(&file_content) {
                Ok(records) => repository.restore(records),
                Err(e) => warn!(
                    path = %path.display(),
                    error = %e,
                    "Ignoring unreadable mute records"
                ),
            }
        }
        repository
    }

    /// Write every record to a YAML file
    ///
    /// # Errors
    /// Returns an error if the records cannot be serialized or written.
    pub async fn save(&self, path: &Path) -> ModerationResult<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let yaml = serde_yaml::to_string(&self.snapshot())?;
        tokio::fs::write(path, yaml).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl MuteRecordRepository for MemoryMuteRepository {
    async fn get(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> ModerationResult<Option<MuteRecord>> {
        Ok(self
            .records
            .get(&(guild_id, user_id))
            .map(|entry| entry.value().clone()))
    }

    async fn upsert(&self, record: MuteRecord) -> ModerationResult<()> {
        self.records
            .insert((record.guild_id, record.user_id), record);
        Ok(())
    }

    async fn append_removed_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> ModerationResult<Option<bool>> {
        Ok(self
            .records
            .get_mut(&(guild_id, user_id))
            .map(|mut entry| entry.remember_role(role_id)))
    }

    async fn delete(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> ModerationResult<Option<MuteRecord>> {
        Ok(self
            .records
            .remove(&(guild_id, user_id))
            .map(|(_, record)| record))
    }

    async fn all(&self) -> ModerationResult<Vec<MuteRecord>> {
        Ok(self.snapshot())
    }
}

/// Keeps the first error of a sequence of best-effort remote calls
fn keep_first(first: &mut Option<ModerationError>, result: ModerationResult<()>) {
    if let Err(e) = result {
        warn!(error = %e, "Remote moderation call failed");
        first.get_or_insert(e);
    }
}

/// Mute state operations
///
/// Callers hold the subject lock for the whole call.
#[derive(Clone)]
pub struct MuteStore {
    records: Arc<dyn MuteRecordRepository>,
    kv: Arc<dyn KeyValueStore>,
    scheduler: Arc<dyn ExpiryScheduler>,
    remote: Arc<dyn RemoteActions>,
}

impl MuteStore {
    pub fn new(
        records: Arc<dyn MuteRecordRepository>,
        kv: Arc<dyn KeyValueStore>,
        scheduler: Arc<dyn ExpiryScheduler>,
        remote: Arc<dyn RemoteActions>,
    ) -> Self {
        Self {
            records,
            kv,
            scheduler,
            remote,
        }
    }

    /// Mute a member for `duration`
    ///
    /// Local state (record, hint and expiry callback) is committed before any
    /// role is touched. Remote failures are returned afterwards.
    ///
    /// # Errors
    /// Fails without side effects when no mute role is configured, the
    /// duration is not positive or the member cannot be fetched.
    pub async fn begin_mute(
        &self,
        config: &ModerationConfig,
        guild_id: GuildId,
        user_id: UserId,
        duration: chrono::Duration,
        author_id: Option<UserId>,
        reason: Option<String>,
    ) -> ModerationResult<MuteRecord> {
        let mute_role = config.mute_role_id.ok_or_else(|| {
            ModerationError::ConfigurationMissing(
                "No mute role set up, assign a mute role first".to_string(),
            )
        })?;
        let ttl = duration
            .to_std()
            .ok()
            .filter(|ttl| !ttl.is_zero())
            .ok_or_else(|| {
                ModerationError::ValidationFailed("Mute duration must be positive".to_string())
            })?;
        gate::expiry_after(Utc::now(), duration)?;

        let member = self.remote.fetch_member(guild_id, user_id).await?;
        let to_strip: Vec<RoleId> = member
            .roles
            .iter()
            .copied()
            .filter(|role| *role != mute_role && config.mute_remove_roles.contains(role))
            .collect();

        let mut record = MuteRecord::new(guild_id, user_id, duration);
        record.author_id = author_id;
        record.reason.clone_from(&reason);
        if let Some(existing) = self.records.get(guild_id, user_id).await? {
            record.removed_roles = existing.removed_roles;
        }
        for role in &to_strip {
            record.remember_role(*role);
        }

        self.records.upsert(record.clone()).await?;
        self.kv.set_ex(&muted_key(guild_id, user_id), 1, ttl).await?;
        self.scheduler.schedule(
            ScheduledAction::new(ActionKind::Unmute, guild_id, user_id, record.expires_at),
            ttl,
        );
        debug!(%guild_id, %user_id, expires_at = %record.expires_at, "Mute state committed");

        let mut first_error = None;
        for role in to_strip {
            let result = self
                .remote
                .remove_role(guild_id, user_id, role, reason.clone())
                .await;
            keep_first(&mut first_error, result);
        }
        if !member.roles.contains(&mute_role) {
            let result = self
                .remote
                .add_role(guild_id, user_id, mute_role, reason)
                .await;
            keep_first(&mut first_error, result);
        }

        first_error.map_or(Ok(record), Err)
    }

    /// End a member's mute, restoring removed roles when `restore_roles`
    ///
    /// Local state is cleared even when the remote calls fail; the first
    /// remote failure is returned after that.
    ///
    /// # Errors
    /// Returns the first remote or persistence failure.
    pub async fn end_mute(
        &self,
        config: &ModerationConfig,
        guild_id: GuildId,
        user_id: UserId,
        restore_roles: bool,
        reason: Option<String>,
    ) -> ModerationResult<Option<MuteRecord>> {
        let record = self.records.get(guild_id, user_id).await?;

        let mut first_error = None;
        if let Some(mute_role) = config.mute_role_id {
            let result = self
                .remote
                .remove_role(guild_id, user_id, mute_role, reason.clone())
                .await;
            keep_first(&mut first_error, result);
        }
        if restore_roles {
            let removed = record.as_ref().map(|r| r.removed_roles.as_slice()).unwrap_or_default();
            for role in removed {
                let result = self
                    .remote
                    .add_role(guild_id, user_id, *role, reason.clone())
                    .await;
                keep_first(&mut first_error, result);
            }
        }

        self.records.delete(guild_id, user_id).await?;
        self.kv.del(&muted_key(guild_id, user_id)).await?;
        self.scheduler.cancel(ActionKind::Unmute, guild_id, user_id);

        first_error.map_or(Ok(record), Err)
    }

    /// Remember and strip a role the member picked up while muted
    ///
    /// Returns whether the role was newly remembered. No record means no-op.
    ///
    /// # Errors
    /// Returns persistence failures and the remote removal failure.
    pub async fn append_removed_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> ModerationResult<bool> {
        let Some(appended) = self
            .records
            .append_removed_role(guild_id, user_id, role_id)
            .await?
        else {
            return Ok(false);
        };

        self.remote
            .remove_role(guild_id, user_id, role_id, None)
            .await?;
        Ok(appended)
    }

    /// Seconds of mute left, zero or negative when not muted
    ///
    /// # Errors
    /// Returns key/value store failures.
    pub async fn is_muted(&self, guild_id: GuildId, user_id: UserId) -> ModerationResult<i64> {
        self.kv.ttl(&muted_key(guild_id, user_id)).await
    }

    /// The subject's active record
    ///
    /// # Errors
    /// Returns persistence failures.
    pub async fn record(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> ModerationResult<Option<MuteRecord>> {
        self.records.get(guild_id, user_id).await
    }

    /// Every active record
    ///
    /// # Errors
    /// Returns persistence failures.
    pub async fn active_records(&self) -> ModerationResult<Vec<MuteRecord>> {
        self.records.all().await
    }

    /// Re-create the hint for a record loaded from disk
    ///
    /// # Errors
    /// Returns key/value store failures.
    pub async fn restore_hint(&self, record: &MuteRecord) -> ModerationResult<()> {
        let remaining = record.remaining();
        if remaining.is_zero() {
            return Ok(());
        }
        self.kv
            .set_ex(&muted_key(record.guild_id, record.user_id), 1, remaining)
            .await
    }
}
