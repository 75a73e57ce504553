//! Mute and ban lifecycle
//!
//! Every entry point that changes a member's mute state takes the member's
//! subject lock first and keeps it until the remote calls are done. Gateway
//! events only bother with the lock when the member is actually muted for more
//! than a few more seconds.
//!
//! A timed ban only leaves its pending unban behind. Self-action markers let
//! the ban add/remove events that Discord echoes back be told apart from bans
//! a human issued.

use crate::MODERATION_TARGET;
use crate::config::{ConfigProvider, ModerationConfig};
use crate::moderation::clean::{self, CleanPlan};
use crate::moderation::gate::{self, NO_REASON};
use crate::moderation::overrides;
use crate::moderation::remote::replace_modlog_reason;
use crate::moderation::{
    ActionKind, ActionMarkerStore, ChannelSnapshot, ExpiryScheduler, KeyValueStore, MarkerKind,
    ModerationError, ModerationResult, ModlogAction, ModlogEntry, MuteRecord,
    MuteRecordRepository, MuteStore, PendingUnbans, RefreshReport, RemoteActions,
    ScheduledAction, SubjectGuard, SubjectLocks, Warning, WarningStore,
};
use chrono::Utc;
use serenity::all::{ChannelId, GuildId, MessageId, RoleId, UserId};
use uuid::Uuid;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Below this many seconds of mute left, events leave the member alone
pub const MUTE_SKIP_THRESHOLD_SECS: i64 = 5;

/// Reason recorded when a timed ban runs out
pub const TIMED_BAN_EXPIRED: &str = "Timed ban expired";
/// Reason recorded when a mute runs out
pub const MUTE_EXPIRED: &str = "Mute duration expired";

const NO_MUTE_ROLE: &str = "No mute role set up, assign a mute role first";

/// Keep reports from pinging whole servers
fn escape_special_mentions(text: &str) -> String {
    text.replace("@everyone", "@\u{200b}everyone")
        .replace("@here", "@\u{200b}here")
}

/// Result of delivering a scheduled action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryOutcome {
    /// The action was carried out
    Completed,
    /// The state the action was scheduled for is gone
    Stale,
}

/// What became of an observed ban or unban
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationOutcome {
    /// The bot's own ban; already logged when it was issued
    Suppressed,
    /// Logged as performed by the bot
    LoggedAsBot,
    /// Logged as performed by someone else
    LoggedAsExternal,
    /// Nothing to log for this guild
    Ignored,
}

/// Coordinates moderation actions against guild members
pub struct LifecycleCoordinator {
    config: Arc<dyn ConfigProvider>,
    remote: Arc<dyn RemoteActions>,
    scheduler: Arc<dyn ExpiryScheduler>,
    kv: Arc<dyn KeyValueStore>,
    store: MuteStore,
    markers: ActionMarkerStore,
    locks: SubjectLocks,
    warnings: WarningStore,
    unbans: PendingUnbans,
}

impl LifecycleCoordinator {
    pub fn new(
        config: Arc<dyn ConfigProvider>,
        remote: Arc<dyn RemoteActions>,
        records: Arc<dyn MuteRecordRepository>,
        kv: Arc<dyn KeyValueStore>,
        scheduler: Arc<dyn ExpiryScheduler>,
        warnings: WarningStore,
        unbans: PendingUnbans,
    ) -> Self {
        let store = MuteStore::new(
            records,
            Arc::clone(&kv),
            Arc::clone(&scheduler),
            Arc::clone(&remote),
        );
        Self {
            config,
            remote,
            scheduler,
            markers: ActionMarkerStore::new(Arc::clone(&kv)),
            kv,
            store,
            locks: SubjectLocks::new(),
            warnings,
            unbans,
        }
    }

    #[must_use]
    pub const fn store(&self) -> &MuteStore {
        &self.store
    }

    #[must_use]
    pub const fn locks(&self) -> &SubjectLocks {
        &self.locks
    }

    #[must_use]
    pub const fn warnings(&self) -> &WarningStore {
        &self.warnings
    }

    #[must_use]
    pub const fn unbans(&self) -> &PendingUnbans {
        &self.unbans
    }

    #[must_use]
    pub fn config(&self, guild_id: GuildId) -> Option<ModerationConfig> {
        self.config.get_config(guild_id)
    }

    fn require_config(&self, guild_id: GuildId) -> ModerationResult<ModerationConfig> {
        self.config.get_config(guild_id).ok_or_else(|| {
            ModerationError::ConfigurationMissing(
                "Moderation is not configured on this server".to_string(),
            )
        })
    }

    fn require_mute_role(&self, guild_id: GuildId) -> ModerationResult<(ModerationConfig, RoleId)> {
        let config = self.require_config(guild_id)?;
        let role = config
            .mute_role_id
            .ok_or_else(|| ModerationError::ConfigurationMissing(NO_MUTE_ROLE.to_string()))?;
        Ok((config, role))
    }

    async fn post_modlog(
        &self,
        config: &ModerationConfig,
        entry: ModlogEntry,
    ) -> Option<MessageId> {
        let channel_id = config.modlog_channel_id?;
        let action = entry.action;
        let user_id = entry.user_id;
        match self.remote.post_modlog(channel_id, entry).await {
            Ok(message_id) => Some(message_id),
            Err(e) => {
                warn!(
                    target: MODERATION_TARGET,
                    guild_id = config.guild_id,
                    user_id = %user_id,
                    action = %action,
                    error = %e,
                    "Failed posting modlog entry"
                );
                None
            }
        }
    }

    /// Take the subject lock only if the member is muted past the threshold
    ///
    /// The remaining time is checked before and after acquiring, since the
    /// mute may have ended while waiting.
    ///
    /// # Errors
    /// Returns key/value store failures.
    pub async fn lock_if_muted(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> ModerationResult<Option<SubjectGuard>> {
        if self.store.is_muted(guild_id, user_id).await? < MUTE_SKIP_THRESHOLD_SECS {
            return Ok(None);
        }
        let guard = self.locks.acquire(guild_id, user_id).await;
        if self.store.is_muted(guild_id, user_id).await? < MUTE_SKIP_THRESHOLD_SECS {
            return Ok(None);
        }
        Ok(Some(guard))
    }

    /// Mute a member
    ///
    /// # Errors
    /// Validation errors leave everything untouched. A remote failure is
    /// returned after the mute has been recorded and scheduled.
    pub async fn mute(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        duration: chrono::Duration,
        author_id: UserId,
        reason: String,
    ) -> ModerationResult<MuteRecord> {
        let (config, _) = self.require_mute_role(guild_id)?;

        let record = {
            let _guard = self.locks.acquire(guild_id, user_id).await;
            self.store
                .begin_mute(
                    &config,
                    guild_id,
                    user_id,
                    duration,
                    Some(author_id),
                    Some(reason.clone()),
                )
                .await?
        };

        info!(
            target: MODERATION_TARGET,
            guild_id = %guild_id,
            user_id = %user_id,
            author_id = %author_id,
            minutes = duration.num_minutes(),
            event = "mute",
            "Member muted"
        );
        self.post_modlog(
            &config,
            ModlogEntry {
                action: ModlogAction::Muted,
                user_id,
                author_id: Some(author_id),
                reason,
                duration: Some(duration),
            },
        )
        .await;
        Ok(record)
    }

    /// Unmute a member and hand back the roles taken away
    ///
    /// Returns whether the member had an active mute. The mute role is
    /// removed either way.
    ///
    /// # Errors
    /// Validation errors leave everything untouched. Remote failures are
    /// returned after the mute state has been cleared.
    pub async fn unmute(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        author_id: UserId,
        reason: String,
    ) -> ModerationResult<bool> {
        let (config, _) = self.require_mute_role(guild_id)?;

        let ended = {
            let _guard = self.locks.acquire(guild_id, user_id).await;
            self.store
                .end_mute(&config, guild_id, user_id, true, Some(reason.clone()))
                .await?
        };

        let was_muted = ended.is_some();
        info!(
            target: MODERATION_TARGET,
            guild_id = %guild_id,
            user_id = %user_id,
            author_id = %author_id,
            was_muted,
            event = "unmute",
            "Member unmuted"
        );
        if was_muted {
            self.post_modlog(
                &config,
                ModlogEntry {
                    action: ModlogAction::Unmuted,
                    user_id,
                    author_id: Some(author_id),
                    reason,
                    duration: None,
                },
            )
            .await;
        }
        Ok(was_muted)
    }

    /// Ban a member, lifting the ban again after `duration` when given
    ///
    /// A zero or negative duration bans permanently.
    ///
    /// # Errors
    /// Durations past the limit are rejected before anything happens. Returns
    /// the configuration or remote failure. A failed ban leaves no marker behind.
    pub async fn ban(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        author_id: UserId,
        reason: String,
        duration: Option<chrono::Duration>,
    ) -> ModerationResult<()> {
        let config = self.require_config(guild_id)?;
        let timed = match duration.filter(|duration| *duration > chrono::Duration::zero()) {
            Some(duration) => {
                let due_at = gate::expiry_after(Utc::now(), duration)?;
                Some((duration, due_at, duration.to_std().unwrap_or_default()))
            }
            None => None,
        };

        let _guard = self.locks.acquire(guild_id, user_id).await;
        self.markers.mark(MarkerKind::Banned, guild_id, user_id).await?;
        if let Err(e) = self.remote.ban(guild_id, user_id, reason.clone()).await {
            if let Err(clear_error) =
                self.markers.clear(MarkerKind::Banned, guild_id, user_id).await
            {
                warn!(
                    target: MODERATION_TARGET,
                    error = %clear_error,
                    "Failed clearing ban marker"
                );
            }
            return Err(e);
        }

        match timed {
            Some((_, due_at, delay)) => {
                self.unbans.insert(guild_id, user_id, due_at);
                self.scheduler.schedule(
                    ScheduledAction::new(ActionKind::Unban, guild_id, user_id, due_at),
                    delay,
                );
            }
            // A permanent ban replaces an earlier timed one
            None => {
                self.unbans.remove(guild_id, user_id);
                self.scheduler.cancel(ActionKind::Unban, guild_id, user_id);
            }
        }

        info!(
            target: MODERATION_TARGET,
            guild_id = %guild_id,
            user_id = %user_id,
            author_id = %author_id,
            timed = timed.is_some(),
            event = "ban",
            "Member banned"
        );
        self.post_modlog(
            &config,
            ModlogEntry {
                action: ModlogAction::Banned,
                user_id,
                author_id: Some(author_id),
                reason,
                duration: timed.map(|(duration, ..)| duration),
            },
        )
        .await;
        Ok(())
    }

    /// Kick a member
    ///
    /// # Errors
    /// Returns the configuration or remote failure.
    pub async fn kick(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        author_id: UserId,
        reason: String,
    ) -> ModerationResult<()> {
        let config = self.require_config(guild_id)?;
        self.remote.kick(guild_id, user_id, reason.clone()).await?;

        info!(
            target: MODERATION_TARGET,
            guild_id = %guild_id,
            user_id = %user_id,
            author_id = %author_id,
            event = "kick",
            "Member kicked"
        );
        self.post_modlog(
            &config,
            ModlogEntry {
                action: ModlogAction::Kicked,
                user_id,
                author_id: Some(author_id),
                reason,
                duration: None,
            },
        )
        .await;
        Ok(())
    }

    /// Record a warning against a member
    ///
    /// # Errors
    /// Returns an error when the guild has no configuration.
    pub async fn warn(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        author_id: UserId,
        reason: String,
    ) -> ModerationResult<Warning> {
        let config = self.require_config(guild_id)?;
        let warning = self.warnings.add(guild_id, user_id, author_id, reason.clone());

        info!(
            target: MODERATION_TARGET,
            guild_id = %guild_id,
            user_id = %user_id,
            author_id = %author_id,
            warning_id = %warning.id,
            event = "warn",
            "Member warned"
        );
        self.post_modlog(
            &config,
            ModlogEntry {
                action: ModlogAction::Warned,
                user_id,
                author_id: Some(author_id),
                reason,
                duration: None,
            },
        )
        .await;
        Ok(warning)
    }

    /// Replace the reason of a warning issued in the guild
    ///
    /// # Errors
    /// Returns a validation error when the guild has no such warning.
    pub fn edit_warning(
        &self,
        guild_id: GuildId,
        id: Uuid,
        editor_id: UserId,
        reason: &str,
    ) -> ModerationResult<Warning> {
        let warning = self
            .warnings
            .edit(guild_id, id, editor_id, reason)
            .ok_or_else(|| {
                ModerationError::ValidationFailed(
                    "Failed updating, most likely couldn't find the warning".to_string(),
                )
            })?;
        info!(
            target: MODERATION_TARGET,
            guild_id = %guild_id,
            user_id = %warning.user_id,
            author_id = %editor_id,
            warning_id = %id,
            event = "warning_edited",
            "Warning edited"
        );
        Ok(warning)
    }

    /// Send a member report to the guild's report channel
    ///
    /// Returns the report channel.
    ///
    /// # Errors
    /// Fails when no report channel is set up or the report cannot be sent.
    pub async fn report(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        author_id: UserId,
        user_id: UserId,
        reason: &str,
    ) -> ModerationResult<ChannelId> {
        let config = self.require_config(guild_id)?;
        let report_channel = config.report_channel_id.ok_or_else(|| {
            ModerationError::ConfigurationMissing("No report channel set up".to_string())
        })?;

        let body = escape_special_mentions(&format!(
            "<@{author_id}> Reported <@{user_id}> in <#{channel_id}> For `{reason}`"
        ));
        if let Err(e) = self.remote.send_message(report_channel, body).await {
            warn!(
                target: MODERATION_TARGET,
                guild_id = %guild_id,
                channel_id = %report_channel,
                error = %e,
                "Failed sending report"
            );
            return Err(ModerationError::RemoteFailed(
                "Failed sending report, check perms for report channel".to_string(),
            ));
        }

        info!(
            target: MODERATION_TARGET,
            guild_id = %guild_id,
            user_id = %user_id,
            author_id = %author_id,
            event = "report",
            "Member reported"
        );
        Ok(report_channel)
    }

    /// Rewrite the reason on one of the bot's modlog lines
    ///
    /// # Errors
    /// Validation errors when there is no modlog channel or the message is not
    /// a modlog line of this bot. Fetch and edit failures are explained to the
    /// moderator.
    pub async fn edit_modlog_reason(
        &self,
        guild_id: GuildId,
        message_id: MessageId,
        editor_id: UserId,
        reason: &str,
    ) -> ModerationResult<()> {
        let config = self.require_config(guild_id)?;
        let channel_id = config.modlog_channel_id.ok_or_else(|| {
            ModerationError::ConfigurationMissing("No mod log channel set up".to_string())
        })?;

        let message = match self.remote.fetch_message(channel_id, message_id).await {
            Ok(message) => message,
            Err(ModerationError::RemoteApi {
                message: Some(text),
            }) => {
                return Err(ModerationError::ValidationFailed(format!(
                    "Failed retrieving the message: {text}"
                )));
            }
            Err(e) => {
                warn!(target: MODERATION_TARGET, error = %e, "Failed fetching modlog entry");
                return Err(ModerationError::RemoteFailed(
                    "Failed retrieving the message".to_string(),
                ));
            }
        };
        if message.author_id != self.remote.current_user_id() {
            return Err(ModerationError::ValidationFailed(
                "I didn't make that message".to_string(),
            ));
        }
        let content =
            replace_modlog_reason(&message.content, reason, editor_id).ok_or_else(|| {
                ModerationError::ValidationFailed(
                    "This entry is either too old or you're trying to mess with me...".to_string(),
                )
            })?;

        if let Err(e) = self.remote.edit_message(channel_id, message_id, content).await {
            warn!(target: MODERATION_TARGET, error = %e, "Failed editing modlog entry");
            return Err(ModerationError::RemoteFailed(
                "Failed updating the modlog entry".to_string(),
            ));
        }
        info!(
            target: MODERATION_TARGET,
            guild_id = %guild_id,
            author_id = %editor_id,
            message_id = %message_id,
            event = "modlog_reason",
            "Modlog reason updated"
        );
        Ok(())
    }

    /// Delete the messages a clean plan selects, returning how many went
    ///
    /// # Errors
    /// Returns the remote failure of the fetch or delete.
    pub async fn clean(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        author_id: UserId,
        plan: CleanPlan,
    ) -> ModerationResult<usize> {
        let deleted = clean::run(self.remote.as_ref(), channel_id, plan).await?;
        info!(
            target: MODERATION_TARGET,
            guild_id = %guild_id,
            channel_id = %channel_id,
            author_id = %author_id,
            deleted,
            event = "clean",
            "Messages cleaned"
        );
        Ok(deleted)
    }

    /// Carry out a delivered action after re-checking it still applies
    ///
    /// # Errors
    /// Returns remote and persistence failures; local mute state is cleared regardless.
    pub async fn handle_scheduled(
        &self,
        action: ScheduledAction,
    ) -> ModerationResult<ExpiryOutcome> {
        let ScheduledAction {
            kind,
            guild_id,
            user_id,
            due_at,
        } = action;

        match kind {
            ActionKind::Unmute => {
                let _guard = self.locks.acquire(guild_id, user_id).await;
                let current = self.store.record(guild_id, user_id).await?;
                if current.is_none_or(|record| record.expires_at != due_at) {
                    debug!(
                        target: MODERATION_TARGET,
                        guild_id = %guild_id,
                        user_id = %user_id,
                        "Stale unmute ignored"
                    );
                    return Ok(ExpiryOutcome::Stale);
                }

                let config = self
                    .config
                    .get_config(guild_id)
                    .unwrap_or_else(|| ModerationConfig::for_guild(guild_id));
                self.store
                    .end_mute(&config, guild_id, user_id, true, Some(MUTE_EXPIRED.to_string()))
                    .await?;

                info!(
                    target: MODERATION_TARGET,
                    guild_id = %guild_id,
                    user_id = %user_id,
                    event = "mute_expired",
                    "Mute expired"
                );
                self.post_modlog(
                    &config,
                    ModlogEntry {
                        action: ModlogAction::Unmuted,
                        user_id,
                        author_id: Some(self.remote.current_user_id()),
                        reason: MUTE_EXPIRED.to_string(),
                        duration: None,
                    },
                )
                .await;
                Ok(ExpiryOutcome::Completed)
            }
            ActionKind::Unban => {
                let _guard = self.locks.acquire(guild_id, user_id).await;
                if self.unbans.due_at(guild_id, user_id) != Some(due_at) {
                    debug!(
                        target: MODERATION_TARGET,
                        guild_id = %guild_id,
                        user_id = %user_id,
                        "Stale unban ignored"
                    );
                    return Ok(ExpiryOutcome::Stale);
                }

                self.markers.mark(MarkerKind::Unbanned, guild_id, user_id).await?;
                let result = self.remote.unban(guild_id, user_id).await;
                // Not retried; a failed unban is left to the moderators
                self.unbans.remove_if_due(guild_id, user_id, due_at);
                if let Err(e) = result {
                    if let Err(clear_error) =
                        self.markers.clear(MarkerKind::Unbanned, guild_id, user_id).await
                    {
                        warn!(
                            target: MODERATION_TARGET,
                            error = %clear_error,
                            "Failed clearing unban marker"
                        );
                    }
                    return Err(e);
                }
                info!(
                    target: MODERATION_TARGET,
                    guild_id = %guild_id,
                    user_id = %user_id,
                    event = "ban_expired",
                    "Timed ban lifted"
                );
                Ok(ExpiryOutcome::Completed)
            }
        }
    }

    /// Give a muted member who rejoined their mute role back
    ///
    /// Returns whether the role was re-applied.
    ///
    /// # Errors
    /// Returns key/value store and remote failures.
    pub async fn on_member_join(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> ModerationResult<bool> {
        let Some(mute_role) = self.config(guild_id).and_then(|config| config.mute_role_id) else {
            return Ok(false);
        };
        let Some(_guard) = self.lock_if_muted(guild_id, user_id).await? else {
            return Ok(false);
        };

        self.remote
            .add_role(guild_id, user_id, mute_role, Some("Member rejoined while muted".to_string()))
            .await?;
        info!(
            target: MODERATION_TARGET,
            guild_id = %guild_id,
            user_id = %user_id,
            event = "mute_reapplied",
            "Mute role re-applied on rejoin"
        );
        Ok(true)
    }

    /// Strip roles a muted member gained and keep the mute role on them
    ///
    /// `roles` are the member's roles after the update. Returns how many
    /// roles were stripped.
    ///
    /// # Errors
    /// Returns the first persistence or remote failure; the rest of the update is abandoned.
    pub async fn on_member_update(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        roles: &[RoleId],
    ) -> ModerationResult<usize> {
        let Some(config) = self.config(guild_id) else {
            return Ok(0);
        };
        let Some(mute_role) = config.mute_role_id else {
            return Ok(0);
        };

        let conflicting: Vec<RoleId> = roles
            .iter()
            .copied()
            .filter(|role| *role != mute_role && config.mute_remove_roles.contains(role))
            .collect();
        let has_mute_role = roles.contains(&mute_role);
        if conflicting.is_empty() && has_mute_role {
            return Ok(0);
        }

        let Some(_guard) = self.lock_if_muted(guild_id, user_id).await? else {
            return Ok(0);
        };

        for role in &conflicting {
            self.store.append_removed_role(guild_id, user_id, *role).await?;
        }
        if !has_mute_role {
            self.remote
                .add_role(guild_id, user_id, mute_role, Some("Member is muted".to_string()))
                .await?;
        }

        if !conflicting.is_empty() {
            info!(
                target: MODERATION_TARGET,
                guild_id = %guild_id,
                user_id = %user_id,
                stripped = conflicting.len(),
                event = "mute_roles_stripped",
                "Stripped roles from muted member"
            );
        }
        Ok(conflicting.len())
    }

    /// Handle Discord reporting a new ban
    ///
    /// # Errors
    /// Returns key/value store failures.
    pub async fn on_ban_added(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> ModerationResult<ObservationOutcome> {
        if self.markers.consume(MarkerKind::Banned, guild_id, user_id).await? {
            return Ok(ObservationOutcome::Suppressed);
        }

        let Some(config) = self.config(guild_id).filter(|config| config.log_bans) else {
            return Ok(ObservationOutcome::Ignored);
        };
        let entry = ModlogEntry {
            action: ModlogAction::Banned,
            user_id,
            author_id: None,
            reason: NO_REASON.to_string(),
            duration: None,
        };
        if self.post_modlog(&config, entry).await.is_some() {
            Ok(ObservationOutcome::LoggedAsExternal)
        } else {
            Ok(ObservationOutcome::Ignored)
        }
    }

    /// Handle Discord reporting a lifted ban
    ///
    /// # Errors
    /// Returns key/value store failures.
    pub async fn on_ban_removed(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> ModerationResult<ObservationOutcome> {
        let bot_performed = self
            .markers
            .consume(MarkerKind::Unbanned, guild_id, user_id)
            .await?;
        // Lifted by hand before the timer ran out
        if !bot_performed && self.unbans.remove(guild_id, user_id).is_some() {
            self.scheduler.cancel(ActionKind::Unban, guild_id, user_id);
        }

        let Some(config) = self
            .config(guild_id)
            .filter(|config| config.log_unbans || bot_performed)
        else {
            return Ok(ObservationOutcome::Ignored);
        };

        let entry = if bot_performed {
            ModlogEntry {
                action: ModlogAction::Unbanned,
                user_id,
                author_id: Some(self.remote.current_user_id()),
                reason: TIMED_BAN_EXPIRED.to_string(),
                duration: None,
            }
        } else {
            ModlogEntry {
                action: ModlogAction::Unbanned,
                user_id,
                author_id: None,
                reason: NO_REASON.to_string(),
                duration: None,
            }
        };

        match (self.post_modlog(&config, entry).await.is_some(), bot_performed) {
            (false, _) => Ok(ObservationOutcome::Ignored),
            (true, true) => Ok(ObservationOutcome::LoggedAsBot),
            (true, false) => Ok(ObservationOutcome::LoggedAsExternal),
        }
    }

    /// Reconcile the mute role overwrite in every channel of a guild
    pub async fn refresh_mute_overrides(&self, guild_id: GuildId) -> Option<RefreshReport> {
        let config = self.config(guild_id)?;
        overrides::refresh_guild(self.remote.as_ref(), &config, guild_id).await
    }

    /// Reconcile the mute role overwrite of one channel
    ///
    /// # Errors
    /// Returns the remote failure of the overwrite write.
    pub async fn refresh_mute_override_for_channel(
        &self,
        config: &ModerationConfig,
        channel: &ChannelSnapshot,
    ) -> ModerationResult<bool> {
        if !config.manage_mute_overrides {
            return Ok(false);
        }
        overrides::reconcile(self.remote.as_ref(), config, channel).await
    }

    /// Register an expiry for every active mute and pending unban that lacks one
    ///
    /// Returns how many were registered.
    ///
    /// # Errors
    /// Returns persistence failures.
    pub async fn recover_schedules(&self) -> ModerationResult<usize> {
        let mut recovered = 0;
        for record in self.store.active_records().await? {
            let (guild_id, user_id) = (record.guild_id, record.user_id);
            if self.scheduler.is_scheduled(ActionKind::Unmute, guild_id, user_id) {
                continue;
            }
            if record.is_expired() {
                debug!(
                    target: MODERATION_TARGET,
                    guild_id = %guild_id,
                    user_id = %user_id,
                    "Mute ran out while unscheduled"
                );
            }
            self.store.restore_hint(&record).await?;
            self.scheduler.schedule(
                ScheduledAction::new(ActionKind::Unmute, guild_id, user_id, record.expires_at),
                record.remaining(),
            );
            recovered += 1;
        }

        for action in self.unbans.actions() {
            let (kind, guild_id, user_id) = action.key();
            if self.scheduler.is_scheduled(kind, guild_id, user_id) {
                continue;
            }
            let delay = (action.due_at - Utc::now()).to_std().unwrap_or_default();
            self.scheduler.schedule(action, delay);
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn dispatch(&self, action: ScheduledAction) {
        let (kind, guild_id, user_id) = action.key();
        match self.handle_scheduled(action).await {
            Ok(outcome) => debug!(
                target: MODERATION_TARGET,
                kind = %kind,
                guild_id = %guild_id,
                user_id = %user_id,
                outcome = ?outcome,
                "Scheduled action handled"
            ),
            Err(e) => error!(
                target: MODERATION_TARGET,
                kind = %kind,
                guild_id = %guild_id,
                user_id = %user_id,
                error = %e,
                "Scheduled action failed"
            ),
        }
    }

    /// Re-register lost expiries and drop idle bookkeeping
    pub async fn sweep(&self) {
        match self.recover_schedules().await {
            Ok(0) => {}
            Ok(recovered) => info!(target: MODERATION_TARGET, recovered, "Re-registered expiries"),
            Err(e) => error!(target: MODERATION_TARGET, error = %e, "Expiry sweep failed"),
        }
        let evicted = self.locks.evict_idle();
        if evicted > 0 {
            debug!(target: MODERATION_TARGET, evicted, "Evicted idle subject locks");
        }
        match self.kv.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => debug!(target: MODERATION_TARGET, purged, "Purged expired keys"),
            Err(e) => warn!(target: MODERATION_TARGET, error = %e, "Purging expired keys failed"),
        }
    }

    /// Drain delivered actions and sweep periodically until the channel closes
    pub async fn run(self: Arc<Self>, mut rx: Receiver<ScheduledAction>, sweep_interval: Duration) {
        info!(
            target: MODERATION_TARGET,
            "Starting moderation task with {}s sweep interval",
            sweep_interval.as_secs()
        );

        let mut interval = tokio::time::interval(sweep_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                delivered = rx.recv() => {
                    let Some(action) = delivered else { break };
                    let coordinator = Arc::clone(&self);
                    tokio::spawn(async move { coordinator.dispatch(action).await });
                }
                _ = interval.tick() => self.sweep().await,
            }
        }

        info!(target: MODERATION_TARGET, "Moderation task shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use crate::moderation::clean::CleanRequest;
    use crate::moderation::testing::{BOT_ID, FakeRemote, RemoteCall};
    use crate::moderation::{
        MARKER_LIFETIME, MemoryKv, MemoryMuteRepository, MessageSnapshot, RefreshBus,
        RoleOverwrite, TokioScheduler,
    };
    use serenity::all::Permissions;

    const GUILD: GuildId = GuildId::new(1000);
    const MEMBER: UserId = UserId::new(2000);
    const MODERATOR: UserId = UserId::new(3000);
    const MUTE_ROLE: RoleId = RoleId::new(1);
    const REGULAR: RoleId = RoleId::new(2);
    const ARTIST: RoleId = RoleId::new(3);
    const MODLOG: ChannelId = ChannelId::new(50);
    const REPORTS: ChannelId = ChannelId::new(51);
    const GENERAL: ChannelId = ChannelId::new(60);

    struct Harness {
        coordinator: Arc<LifecycleCoordinator>,
        remote: Arc<FakeRemote>,
        repository: MemoryMuteRepository,
        kv: MemoryKv,
        scheduler: TokioScheduler,
        rx: Receiver<ScheduledAction>,
        configs: Arc<ConfigStore>,
    }

    fn harness(member_roles: &[RoleId]) -> Harness {
        let configs = Arc::new(ConfigStore::new());
        configs.update(GUILD, |config| {
            config.mute_role_id = Some(MUTE_ROLE);
            config.mute_remove_roles = vec![REGULAR, ARTIST];
            config.modlog_channel_id = Some(MODLOG);
        });

        let remote = Arc::new(FakeRemote::new());
        remote.add_member(GUILD, MEMBER, member_roles);
        let repository = MemoryMuteRepository::new();
        let kv = MemoryKv::new();
        let (scheduler, rx) = TokioScheduler::new(16);

        let coordinator = Arc::new(LifecycleCoordinator::new(
            configs.clone(),
            remote.clone(),
            Arc::new(repository.clone()),
            Arc::new(kv.clone()),
            Arc::new(scheduler.clone()),
            WarningStore::new(),
            PendingUnbans::new(),
        ));
        Harness {
            coordinator,
            remote,
            repository,
            kv,
            scheduler,
            rx,
            configs,
        }
    }

    fn sorted(mut roles: Vec<RoleId>) -> Vec<RoleId> {
        roles.sort();
        roles
    }

    #[tokio::test(start_paused = true)]
    async fn test_mute_then_expiry_restores_member() {
        let mut h = harness(&[]);
        let record = h
            .coordinator
            .mute(GUILD, MEMBER, chrono::Duration::minutes(10), MODERATOR, "spam".into())
            .await
            .unwrap();

        assert!(record.removed_roles.is_empty());
        let left = (record.expires_at - Utc::now()).num_seconds();
        assert!((598..=600).contains(&left));
        assert_eq!(h.coordinator.store().is_muted(GUILD, MEMBER).await.unwrap(), 600);
        assert_eq!(h.remote.roles_of(GUILD, MEMBER), vec![MUTE_ROLE]);

        let action = h.rx.recv().await.unwrap();
        assert_eq!(action.kind, ActionKind::Unmute);
        assert_eq!(
            h.coordinator.handle_scheduled(action).await.unwrap(),
            ExpiryOutcome::Completed
        );

        assert!(h.remote.roles_of(GUILD, MEMBER).is_empty());
        assert!(h.repository.is_empty());
        assert!(h.coordinator.store().is_muted(GUILD, MEMBER).await.unwrap() <= 0);

        let log = h.remote.modlog_entries();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].action, ModlogAction::Unmuted);
        assert_eq!(log[1].author_id, Some(BOT_ID));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_expiry_after_manual_unmute_is_noop() {
        let mut h = harness(&[REGULAR]);
        h.coordinator
            .mute(GUILD, MEMBER, chrono::Duration::minutes(1), MODERATOR, "spam".into())
            .await
            .unwrap();
        assert!(h
            .coordinator
            .unmute(GUILD, MEMBER, MODERATOR, "appeal".into())
            .await
            .unwrap());
        assert_eq!(h.remote.roles_of(GUILD, MEMBER), vec![REGULAR]);

        // Re-deliver the expiry the unmute cancelled
        let stale = ScheduledAction::new(ActionKind::Unmute, GUILD, MEMBER, Utc::now());
        h.remote.clear_calls();
        assert_eq!(
            h.coordinator.handle_scheduled(stale).await.unwrap(),
            ExpiryOutcome::Stale
        );
        assert!(h.remote.calls().is_empty());

        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(h.rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_for_replaced_mute_is_stale() {
        let mut h = harness(&[]);
        let first = h
            .coordinator
            .mute(GUILD, MEMBER, chrono::Duration::minutes(1), MODERATOR, "a".into())
            .await
            .unwrap();
        h.coordinator
            .mute(GUILD, MEMBER, chrono::Duration::minutes(30), MODERATOR, "b".into())
            .await
            .unwrap();

        let old = ScheduledAction::new(ActionKind::Unmute, GUILD, MEMBER, first.expires_at);
        assert_eq!(h.coordinator.handle_scheduled(old).await.unwrap(), ExpiryOutcome::Stale);
        assert_eq!(h.repository.len(), 1);
        assert_eq!(h.remote.roles_of(GUILD, MEMBER), vec![MUTE_ROLE]);

        // Only the newer expiry is delivered
        let action = h.rx.recv().await.unwrap();
        assert_eq!(
            h.coordinator.handle_scheduled(action).await.unwrap(),
            ExpiryOutcome::Completed
        );
        assert!(h.repository.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_roles_round_trip_through_mute() {
        let h = harness(&[REGULAR, RoleId::new(9)]);
        let before = sorted(h.remote.roles_of(GUILD, MEMBER));

        h.coordinator
            .mute(GUILD, MEMBER, chrono::Duration::minutes(10), MODERATOR, "x".into())
            .await
            .unwrap();

        // Someone hands the member a stripped role while muted, twice
        for _ in 0..2 {
            h.remote.grant(GUILD, MEMBER, ARTIST);
            let roles = h.remote.roles_of(GUILD, MEMBER);
            assert_eq!(
                h.coordinator.on_member_update(GUILD, MEMBER, &roles).await.unwrap(),
                1
            );
        }
        let record = h.coordinator.store().record(GUILD, MEMBER).await.unwrap().unwrap();
        assert_eq!(record.removed_roles, vec![REGULAR, ARTIST]);
        assert!(!h.remote.roles_of(GUILD, MEMBER).contains(&ARTIST));

        h.coordinator
            .unmute(GUILD, MEMBER, MODERATOR, "done".into())
            .await
            .unwrap();
        let mut after = before;
        after.push(ARTIST);
        assert_eq!(sorted(h.remote.roles_of(GUILD, MEMBER)), sorted(after));
    }

    #[tokio::test(start_paused = true)]
    async fn test_member_update_readds_lost_mute_role() {
        let h = harness(&[]);
        h.coordinator
            .mute(GUILD, MEMBER, chrono::Duration::minutes(10), MODERATOR, "x".into())
            .await
            .unwrap();

        assert_eq!(
            h.coordinator.on_member_update(GUILD, MEMBER, &[]).await.unwrap(),
            0
        );
        assert_eq!(h.remote.roles_of(GUILD, MEMBER), vec![MUTE_ROLE]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_member_update_near_expiry_is_skipped() {
        let h = harness(&[]);
        h.coordinator
            .mute(GUILD, MEMBER, chrono::Duration::seconds(6), MODERATOR, "x".into())
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;

        h.remote.grant(GUILD, MEMBER, ARTIST);
        let roles = h.remote.roles_of(GUILD, MEMBER);
        assert_eq!(
            h.coordinator.on_member_update(GUILD, MEMBER, &roles).await.unwrap(),
            0
        );
        assert!(h.remote.roles_of(GUILD, MEMBER).contains(&ARTIST));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_reapplies_mute_role_only() {
        let h = harness(&[REGULAR]);
        h.coordinator
            .mute(GUILD, MEMBER, chrono::Duration::minutes(10), MODERATOR, "x".into())
            .await
            .unwrap();

        // Leaves and comes back without roles
        h.remote.remove_member(GUILD, MEMBER);
        h.remote.add_member(GUILD, MEMBER, &[]);
        assert!(h.coordinator.on_member_join(GUILD, MEMBER).await.unwrap());

        assert_eq!(h.remote.roles_of(GUILD, MEMBER), vec![MUTE_ROLE]);
        assert_eq!(h.repository.len(), 1);
        assert_eq!(h.scheduler.pending_count(), 1);
        let record = h.coordinator.store().record(GUILD, MEMBER).await.unwrap().unwrap();
        assert_eq!(record.removed_roles, vec![REGULAR]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_of_unmuted_member_does_nothing() {
        let h = harness(&[]);
        assert!(!h.coordinator.on_member_join(GUILD, MEMBER).await.unwrap());
        assert!(h.remote.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_racing_expiry_leaves_one_consistent_state() {
        let mut h = harness(&[]);
        h.coordinator
            .mute(GUILD, MEMBER, chrono::Duration::seconds(30), MODERATOR, "x".into())
            .await
            .unwrap();
        let action = h.rx.recv().await.unwrap();

        let expiry = {
            let coordinator = Arc::clone(&h.coordinator);
            tokio::spawn(async move { coordinator.handle_scheduled(action).await })
        };
        let rejoin = {
            let coordinator = Arc::clone(&h.coordinator);
            tokio::spawn(async move { coordinator.on_member_join(GUILD, MEMBER).await })
        };
        let expired = expiry.await.unwrap().unwrap();
        rejoin.await.unwrap().unwrap();

        assert_eq!(expired, ExpiryOutcome::Completed);
        assert!(h.repository.len() <= 1);
        assert!(h.repository.is_empty());
        assert!(!h.remote.roles_of(GUILD, MEMBER).contains(&MUTE_ROLE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mute_without_mute_role_is_rejected_untouched() {
        let h = harness(&[]);
        h.configs.update(GUILD, |config| config.mute_role_id = None);

        let err = h
            .coordinator
            .mute(GUILD, MEMBER, chrono::Duration::minutes(10), MODERATOR, "x".into())
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(h.repository.is_empty());
        assert!(h.remote.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_ban_lifecycle() {
        let mut h = harness(&[]);
        h.coordinator
            .ban(GUILD, MEMBER, MODERATOR, "raid".into(), Some(chrono::Duration::hours(1)))
            .await
            .unwrap();
        assert!(h.remote.is_banned(GUILD, MEMBER));
        assert_eq!(h.remote.modlog_entries().len(), 1);

        // Discord echoes the ban back, twice
        assert_eq!(
            h.coordinator.on_ban_added(GUILD, MEMBER).await.unwrap(),
            ObservationOutcome::Suppressed
        );
        assert_eq!(
            h.coordinator.on_ban_added(GUILD, MEMBER).await.unwrap(),
            ObservationOutcome::LoggedAsExternal
        );
        assert_eq!(h.remote.modlog_entries().len(), 2);

        let action = h.rx.recv().await.unwrap();
        assert_eq!(action.kind, ActionKind::Unban);
        assert_eq!(
            h.coordinator.handle_scheduled(action).await.unwrap(),
            ExpiryOutcome::Completed
        );
        assert!(!h.remote.is_banned(GUILD, MEMBER));

        assert_eq!(
            h.coordinator.on_ban_removed(GUILD, MEMBER).await.unwrap(),
            ObservationOutcome::LoggedAsBot
        );
        let last = h.remote.modlog_entries().pop().unwrap();
        assert_eq!(last.action, ModlogAction::Unbanned);
        assert_eq!(last.author_id, Some(BOT_ID));
        assert_eq!(last.reason, TIMED_BAN_EXPIRED);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_ban_survives_restart() {
        let h = harness(&[]);
        h.coordinator
            .ban(GUILD, MEMBER, MODERATOR, "raid".into(), Some(chrono::Duration::days(7)))
            .await
            .unwrap();
        assert_eq!(h.coordinator.unbans().len(), 1);

        // A new process over the same persisted state, without any timers
        let (scheduler, mut rx) = TokioScheduler::new(16);
        let restarted = LifecycleCoordinator::new(
            h.configs.clone(),
            h.remote.clone(),
            Arc::new(h.repository.clone()),
            Arc::new(MemoryKv::new()),
            Arc::new(scheduler.clone()),
            WarningStore::new(),
            h.coordinator.unbans().clone(),
        );
        assert_eq!(restarted.recover_schedules().await.unwrap(), 1);
        assert!(scheduler.is_scheduled(ActionKind::Unban, GUILD, MEMBER));
        assert_eq!(restarted.recover_schedules().await.unwrap(), 0);

        let action = rx.recv().await.unwrap();
        assert_eq!(action.kind, ActionKind::Unban);
        assert_eq!(
            restarted.handle_scheduled(action).await.unwrap(),
            ExpiryOutcome::Completed
        );
        assert!(!h.remote.is_banned(GUILD, MEMBER));
        assert!(restarted.unbans().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_unban_drops_pending_unban() {
        let h = harness(&[]);
        h.coordinator
            .ban(GUILD, MEMBER, MODERATOR, "raid".into(), Some(chrono::Duration::hours(1)))
            .await
            .unwrap();
        h.remote.unban(GUILD, MEMBER).await.unwrap();

        assert_eq!(
            h.coordinator.on_ban_removed(GUILD, MEMBER).await.unwrap(),
            ObservationOutcome::LoggedAsExternal
        );
        assert!(h.coordinator.unbans().is_empty());
        assert!(!h.scheduler.is_scheduled(ActionKind::Unban, GUILD, MEMBER));
        assert_eq!(h.coordinator.recover_schedules().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unban_for_replaced_ban_is_stale() {
        let h = harness(&[]);
        h.coordinator
            .ban(GUILD, MEMBER, MODERATOR, "raid".into(), Some(chrono::Duration::hours(1)))
            .await
            .unwrap();
        let old_due = h.coordinator.unbans().due_at(GUILD, MEMBER).unwrap();
        h.coordinator
            .ban(GUILD, MEMBER, MODERATOR, "for good".into(), None)
            .await
            .unwrap();
        assert!(h.coordinator.unbans().is_empty());

        let old = ScheduledAction::new(ActionKind::Unban, GUILD, MEMBER, old_due);
        assert_eq!(h.coordinator.handle_scheduled(old).await.unwrap(), ExpiryOutcome::Stale);
        assert!(h.remote.is_banned(GUILD, MEMBER));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlong_ban_is_rejected_before_banning() {
        let h = harness(&[]);
        let err = h
            .coordinator
            .ban(
                GUILD,
                MEMBER,
                MODERATOR,
                "raid".into(),
                Some(chrono::Duration::weeks(20_000_000)),
            )
            .await
            .unwrap_err();

        assert!(err.is_validation());
        assert!(h.remote.calls().is_empty());
        assert!(!h.remote.is_banned(GUILD, MEMBER));
        assert!(h.coordinator.unbans().is_empty());
        assert!(h.kv.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_purges_lapsed_markers_and_idle_locks() {
        let h = harness(&[]);
        h.coordinator
            .ban(GUILD, MEMBER, MODERATOR, "raid".into(), None)
            .await
            .unwrap();
        assert_eq!(h.kv.len(), 1);
        assert_eq!(h.coordinator.locks().len(), 1);

        // Discord never echoed the ban back
        tokio::time::advance(MARKER_LIFETIME + Duration::from_secs(1)).await;
        h.coordinator.sweep().await;
        assert!(h.kv.is_empty());
        assert!(h.coordinator.locks().is_empty());
    }

    #[tokio::test]
    async fn test_report_goes_to_report_channel() {
        let h = harness(&[]);
        let err = h
            .coordinator
            .report(GUILD, GENERAL, MODERATOR, MEMBER, "spam")
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "No report channel set up");

        h.configs.update(GUILD, |config| config.report_channel_id = Some(REPORTS));
        let channel = h
            .coordinator
            .report(GUILD, GENERAL, MODERATOR, MEMBER, "pings @everyone")
            .await
            .unwrap();
        assert_eq!(channel, REPORTS);

        let sent = h.remote.sent_messages(REPORTS);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("<@3000> Reported <@2000> in <#60> For `pings @"));
        assert!(!sent[0].contains("@everyone"));

        h.remote.fail_sends(REPORTS, "Missing Access");
        let err = h
            .coordinator
            .report(GUILD, GENERAL, MODERATOR, MEMBER, "spam")
            .await
            .unwrap_err();
        assert_eq!(
            err.user_message(),
            "Failed sending report, check perms for report channel"
        );
    }

    #[tokio::test]
    async fn test_edit_modlog_reason() {
        let h = harness(&[]);
        h.coordinator
            .kick(GUILD, MEMBER, MODERATOR, "spam".into())
            .await
            .unwrap();
        let posted = h.remote.fetch_recent_messages(MODLOG, 1).await.unwrap()[0].id;

        let editor = UserId::new(3001);
        h.coordinator
            .edit_modlog_reason(GUILD, posted, editor, "ban evasion")
            .await
            .unwrap();
        assert_eq!(
            h.remote.message_content(MODLOG, posted).unwrap(),
            "**Kicked** <@2000> by <@3000>: ban evasion (updated by <@3001>)"
        );

        let err = h
            .coordinator
            .edit_modlog_reason(GUILD, MessageId::new(1), editor, "x")
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "Failed retrieving the message: Unknown Message");

        h.remote.set_messages(
            MODLOG,
            vec![MessageSnapshot {
                id: MessageId::new(5),
                author_id: MODERATOR,
                content: "**Kicked** <@1> by <@2>: x".to_string(),
                timestamp: Utc::now(),
            }],
        );
        let err = h
            .coordinator
            .edit_modlog_reason(GUILD, MessageId::new(5), editor, "x")
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "I didn't make that message");

        h.configs.update(GUILD, |config| config.modlog_channel_id = None);
        let err = h
            .coordinator
            .edit_modlog_reason(GUILD, posted, editor, "x")
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "No mod log channel set up");
    }

    #[tokio::test]
    async fn test_edit_warning_is_scoped_to_guild() {
        let h = harness(&[]);
        let warning = h
            .coordinator
            .warn(GUILD, MEMBER, MODERATOR, "spam".into())
            .await
            .unwrap();

        let edited = h
            .coordinator
            .edit_warning(GUILD, warning.id, MODERATOR, "flooding")
            .unwrap();
        assert_eq!(edited.reason, "flooding (updated by <@3000>)");

        let err = h
            .coordinator
            .edit_warning(GuildId::new(1), warning.id, MODERATOR, "x")
            .unwrap_err();
        assert_eq!(
            err.user_message(),
            "Failed updating, most likely couldn't find the warning"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_unban_respects_toggle() {
        let h = harness(&[]);
        h.configs.update(GUILD, |config| config.log_unbans = false);
        assert_eq!(
            h.coordinator.on_ban_removed(GUILD, MEMBER).await.unwrap(),
            ObservationOutcome::Ignored
        );

        h.configs.update(GUILD, |config| config.log_unbans = true);
        assert_eq!(
            h.coordinator.on_ban_removed(GUILD, MEMBER).await.unwrap(),
            ObservationOutcome::LoggedAsExternal
        );
        assert_eq!(h.remote.modlog_entries()[0].author_id, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_ban_leaves_no_marker() {
        let h = harness(&[]);
        h.remote.fail_bans("Missing Permissions");

        let err = h
            .coordinator
            .ban(GUILD, MEMBER, MODERATOR, "raid".into(), None)
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "API Error: Missing Permissions");
        assert_eq!(
            h.coordinator.on_ban_added(GUILD, MEMBER).await.unwrap(),
            ObservationOutcome::LoggedAsExternal
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_kick_and_warn_are_logged() {
        let h = harness(&[]);
        h.coordinator
            .warn(GUILD, MEMBER, MODERATOR, "be nice".into())
            .await
            .unwrap();
        h.coordinator
            .kick(GUILD, MEMBER, MODERATOR, "not nice".into())
            .await
            .unwrap();

        assert_eq!(h.coordinator.warnings().for_user(GUILD, MEMBER).len(), 1);
        let actions: Vec<ModlogAction> = h
            .remote
            .modlog_entries()
            .into_iter()
            .map(|entry| entry.action)
            .collect();
        assert_eq!(actions, vec![ModlogAction::Warned, ModlogAction::Kicked]);
        assert!(h.remote.calls().contains(&RemoteCall::Kick(GUILD, MEMBER)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_schedules_after_restart() {
        let h = harness(&[]);
        let sooner = MuteRecord::new(GUILD, MEMBER, chrono::Duration::minutes(2));
        let later = MuteRecord::new(GUILD, UserId::new(2001), chrono::Duration::minutes(5));
        h.repository.restore(vec![sooner, later]);

        assert_eq!(h.coordinator.recover_schedules().await.unwrap(), 2);
        assert_eq!(h.coordinator.recover_schedules().await.unwrap(), 0);
        assert_eq!(h.scheduler.pending_count(), 2);
        assert!(
            h.coordinator
                .store()
                .is_muted(GUILD, UserId::new(2001))
                .await
                .unwrap()
                > 290
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovered_mute_past_expiry_fires_at_once() {
        let mut h = harness(&[MUTE_ROLE]);
        let mut expired = MuteRecord::new(GUILD, MEMBER, chrono::Duration::seconds(-30));
        expired.removed_roles = vec![REGULAR];
        h.repository.restore(vec![expired.clone()]);

        assert_eq!(h.coordinator.recover_schedules().await.unwrap(), 1);
        let action = h.rx.recv().await.unwrap();
        assert_eq!(action.due_at, expired.expires_at);
        assert_eq!(
            h.coordinator.handle_scheduled(action).await.unwrap(),
            ExpiryOutcome::Completed
        );
        assert_eq!(h.remote.roles_of(GUILD, MEMBER), vec![REGULAR]);
        assert!(h.repository.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_delivers_expiry() {
        let h = harness(&[]);
        h.coordinator
            .mute(GUILD, MEMBER, chrono::Duration::minutes(1), MODERATOR, "x".into())
            .await
            .unwrap();

        let task = tokio::spawn(Arc::clone(&h.coordinator).run(h.rx, Duration::from_secs(60)));
        tokio::time::sleep(Duration::from_secs(61)).await;
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }

        assert!(h.repository.is_empty());
        assert!(h.remote.roles_of(GUILD, MEMBER).is_empty());
        task.abort();
    }

    #[tokio::test]
    async fn test_clean_deletes_matching_messages() {
        let h = harness(&[]);
        let channel = ChannelId::new(60);
        let now = Utc::now();
        let messages = (1..=6u64)
            .map(|id| MessageSnapshot {
                id: MessageId::new(id),
                author_id: if id % 2 == 0 { MEMBER } else { MODERATOR },
                content: format!("message {id}"),
                timestamp: now,
            })
            .collect();
        h.remote.set_messages(channel, messages);

        let plan = CleanRequest {
            invoker: MODERATOR,
            count: 2,
            user: Some(MEMBER),
            pattern: None,
            max_age: None,
            include_invocation: false,
        }
        .plan()
        .unwrap();
        let deleted = h
            .coordinator
            .clean(GUILD, channel, MODERATOR, plan)
            .await
            .unwrap();

        assert_eq!(deleted, 2);
        assert!(h.remote.calls().contains(&RemoteCall::BulkDelete(
            channel,
            vec![MessageId::new(6), MessageId::new(4)]
        )));
    }

    #[tokio::test]
    async fn test_refresh_bus_reconciles_held_guild() {
        let h = harness(&[]);
        h.remote.add_channel(ChannelSnapshot {
            id: ChannelId::new(7),
            guild_id: GUILD,
            role_overwrites: vec![RoleOverwrite {
                role_id: MUTE_ROLE,
                allow: Permissions::SEND_MESSAGES,
                deny: Permissions::empty(),
            }],
        });

        let bus = RefreshBus::new();
        let listener = bus.spawn_listener(Arc::clone(&h.coordinator));
        assert_eq!(bus.publish(GUILD), 1);
        assert_eq!(bus.publish(GuildId::new(4242)), 1);

        for _ in 0..50 {
            if h.remote.overwrite_calls() > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        let channel = h.remote.channel(GUILD, ChannelId::new(7)).unwrap();
        let overwrite = channel.overwrite_for(MUTE_ROLE).unwrap();
        assert_eq!(overwrite.allow, Permissions::empty());
        assert!(overwrite.deny.contains(Permissions::SEND_MESSAGES | Permissions::SPEAK));
        listener.abort();
    }

    #[tokio::test]
    async fn test_channel_refresh_honours_management_flag() {
        let h = harness(&[]);
        let channel = ChannelSnapshot {
            id: ChannelId::new(8),
            guild_id: GUILD,
            role_overwrites: Vec::new(),
        };
        h.remote.add_channel(channel.clone());

        let mut config = h.coordinator.config(GUILD).unwrap();
        config.manage_mute_overrides = false;
        assert!(!h
            .coordinator
            .refresh_mute_override_for_channel(&config, &channel)
            .await
            .unwrap());

        config.manage_mute_overrides = true;
        assert!(h
            .coordinator
            .refresh_mute_override_for_channel(&config, &channel)
            .await
            .unwrap());
        assert_eq!(h.remote.overwrite_calls(), 1);
    }
}
