//! Mute role channel overwrites
//!
//! Every channel of a guild should deny the mute role the right to send
//! messages and to speak. Only those two bits are touched; whatever else an
//! administrator put into the overwrite stays as it is.

use crate::MODERATION_TARGET;
use crate::config::ModerationConfig;
use crate::moderation::{ChannelSnapshot, ModerationResult, RemoteActions, RoleOverwrite};
use serenity::all::{GuildId, Permissions, RoleId};
use tracing::{debug, warn};

/// Permissions the mute role is denied in every managed channel
pub const MUTE_DENIED_PERMISSIONS: Permissions = Permissions::from_bits_truncate(
    Permissions::SEND_MESSAGES.bits() | Permissions::SPEAK.bits(),
);

/// Outcome of a guild-wide refresh
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Channels looked at
    pub channels: usize,
    /// Channels that received a new overwrite
    pub updated: usize,
    /// Channels whose overwrite could not be written
    pub failed: usize,
}

/// Overwrite the mute role should have, `None` when `existing` is already right
#[must_use]
pub fn desired_overwrite(
    role_id: RoleId,
    existing: Option<&RoleOverwrite>,
) -> Option<RoleOverwrite> {
    let (allow, deny) = existing.map_or((Permissions::empty(), Permissions::empty()), |o| {
        (o.allow, o.deny)
    });

    let desired = RoleOverwrite {
        role_id,
        allow: allow - MUTE_DENIED_PERMISSIONS,
        deny: deny | MUTE_DENIED_PERMISSIONS,
    };

    match existing {
        Some(current) if current.allow == desired.allow && current.deny == desired.deny => None,
        _ => Some(desired),
    }
}

/// Bring one channel's mute role overwrite in line
///
/// Returns whether an overwrite was written. Ignored channels and guilds
/// without a mute role are left alone.
///
/// # Errors
/// Returns the remote failure of the overwrite write.
pub async fn reconcile(
    remote: &dyn RemoteActions,
    config: &ModerationConfig,
    channel: &ChannelSnapshot,
) -> ModerationResult<bool> {
    let Some(role_id) = config.mute_role_id else {
        return Ok(false);
    };
    if config.ignores_channel(channel.id) {
        return Ok(false);
    }

    let Some(desired) = desired_overwrite(role_id, channel.overwrite_for(role_id)) else {
        return Ok(false);
    };

    remote.set_channel_overwrite(channel.id, desired).await?;
    debug!(
        target: MODERATION_TARGET,
        guild_id = %channel.guild_id,
        channel_id = %channel.id,
        "Mute role overwrite updated"
    );
    Ok(true)
}

/// Reconcile every channel of a guild, best effort
///
/// `None` when overwrite management is off, no mute role is set or this
/// process does not hold the guild.
pub async fn refresh_guild(
    remote: &dyn RemoteActions,
    config: &ModerationConfig,
    guild_id: GuildId,
) -> Option<RefreshReport> {
    if !config.manage_mute_overrides || config.mute_role_id.is_none() {
        return None;
    }
    let channels = remote.guild_channels(guild_id)?;

    let mut report = RefreshReport {
        channels: channels.len(),
        ..RefreshReport::default()
    };
    for channel in &channels {
        match reconcile(remote, config, channel).await {
            Ok(true) => report.updated += 1,
            Ok(false) => {}
            Err(e) => {
                report.failed += 1;
                warn!(
                    target: MODERATION_TARGET,
                    guild_id = %guild_id,
                    channel_id = %channel.id,
                    error = %e,
                    "Failed updating mute role overwrite"
                );
            }
        }
    }

    Some(report)
}
