use crate::moderation::{ChannelSnapshot, ModerationResult, ObservationOutcome};
use crate::{Data, EVENT_TARGET};
use poise::serenity_prelude::{
    self as serenity, Context, EventHandler, Guild, GuildChannel, GuildId, GuildMemberUpdateEvent,
    Member, Ready, User,
};
use tracing::{debug, error, info, warn};

pub struct Handler;

/// Shared state, once the framework setup has stored it
async fn data(ctx: &Context) -> Option<Data> {
    let data = ctx.data.read().await.get::<Data>().cloned();
    if data.is_none() {
        debug!(target: EVENT_TARGET, "Event arrived before setup finished");
    }
    data
}

/// Log a failed event reaction; gateway events have nobody to answer
fn log_failure<T>(event: &str, guild_id: GuildId, result: ModerationResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            error!(
                target: EVENT_TARGET,
                event = event,
                guild_id = %guild_id,
                error = %e,
                "Failed handling event"
            );
            None
        }
    }
}

fn log_observation(event: &str, guild_id: GuildId, user: &User, outcome: ObservationOutcome) {
    debug!(
        target: EVENT_TARGET,
        event = event,
        guild_id = %guild_id,
        user_id = %user.id,
        outcome = ?outcome,
        "Observed ban change"
    );
}

#[serenity::async_trait]
impl EventHandler for Handler {
    /// Called when the bot is ready, but the cache may not be fully populated yet.
    async fn ready(&self, ctx: Context, ready: Ready) {
        let user_name = ready.user.name.clone();
        let shard_id = ctx.shard_id;
        info!(target: EVENT_TARGET, "Connected as {user_name}, shard {shard_id}");
    }

    /// Called when the cache is fully populated.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        let guild_count_cache = ctx.cache.guild_count();
        let guild_count = guilds.len();
        if guild_count != guild_count_cache {
            warn!(
                target: EVENT_TARGET,
                "Cache guild count mismatch: {guild_count_cache} (cache) vs {guild_count} (actual)"
            );
        }
        info!(target: EVENT_TARGET, "Cache ready! The bot is in {guild_count} guild(s)");
    }

    /// Bring the mute role overwrites of a (re)joined guild up to date
    async fn guild_create(&self, ctx: Context, guild: Guild, _is_new: Option<bool>) {
        let Some(data) = data(&ctx).await else {
            return;
        };
        data.refresh.publish(guild.id);
    }

    async fn channel_create(&self, ctx: Context, channel: GuildChannel) {
        reconcile_channel(&ctx, &channel).await;
    }

    async fn channel_update(&self, ctx: Context, _old: Option<GuildChannel>, new: GuildChannel) {
        reconcile_channel(&ctx, &new).await;
    }

    /// Re-apply the mute role to members who left and came back while muted
    async fn guild_member_addition(&self, ctx: Context, new_member: Member) {
        let Some(data) = data(&ctx).await else {
            return;
        };
        let guild_id = new_member.guild_id;
        let result = data
            .coordinator
            .on_member_join(guild_id, new_member.user.id)
            .await;
        if log_failure("guild_member_addition", guild_id, result) == Some(true) {
            info!(
                target: EVENT_TARGET,
                guild_id = %guild_id,
                user_id = %new_member.user.id,
                "Muted member rejoined"
            );
        }
    }

    /// Keep muted members from regaining removed roles or losing the mute role
    async fn guild_member_update(
        &self,
        ctx: Context,
        _old_if_available: Option<Member>,
        _new: Option<Member>,
        event: GuildMemberUpdateEvent,
    ) {
        if event.user.bot {
            return;
        }
        let Some(data) = data(&ctx).await else {
            return;
        };
        let result = data
            .coordinator
            .on_member_update(event.guild_id, event.user.id, &event.roles)
            .await;
        log_failure("guild_member_update", event.guild_id, result);
    }

    async fn guild_ban_addition(&self, ctx: Context, guild_id: GuildId, banned_user: User) {
        let Some(data) = data(&ctx).await else {
            return;
        };
        let result = data.coordinator.on_ban_added(guild_id, banned_user.id).await;
        if let Some(outcome) = log_failure("guild_ban_addition", guild_id, result) {
            log_observation("guild_ban_addition", guild_id, &banned_user, outcome);
        }
    }

    async fn guild_ban_removal(&self, ctx: Context, guild_id: GuildId, unbanned_user: User) {
        let Some(data) = data(&ctx).await else {
            return;
        };
        let result = data
            .coordinator
            .on_ban_removed(guild_id, unbanned_user.id)
            .await;
        if let Some(outcome) = log_failure("guild_ban_removal", guild_id, result) {
            log_observation("guild_ban_removal", guild_id, &unbanned_user, outcome);
        }
    }
}

async fn reconcile_channel(ctx: &Context, channel: &GuildChannel) {
    let Some(data) = data(ctx).await else {
        return;
    };
    let Some(config) = data.coordinator.config(channel.guild_id) else {
        return;
    };
    let snapshot = ChannelSnapshot::from(channel);
    let result = data
        .coordinator
        .refresh_mute_override_for_channel(&config, &snapshot)
        .await;
    if log_failure("channel_update", channel.guild_id, result) == Some(true) {
        debug!(
            target: EVENT_TARGET,
            guild_id = %channel.guild_id,
            channel_id = %channel.id,
            "Updated mute role overwrite"
        );
    }
}
