//! Moderator commands
//!
//! Every moderation command goes through the command gate before touching
//! anything. Validation failures and Discord errors are answered in the
//! channel; the framework only sees errors of the reply itself.

use crate::config::{ModCommand, ModerationConfig};
use crate::moderation::clean::{CleanRequest, compile_pattern};
use crate::moderation::gate::{self, Invoker};
use crate::moderation::{ModerationError, ModerationResult};
use crate::{Context, Data, Error, MODERATION_TARGET};
use poise::CreateReply;
use poise::serenity_prelude::{
    self as serenity, GuildId, Mentionable, MessageId, Permissions, UserId,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, warn};
use uuid::Uuid;

pub const DEFAULT_MUTE_MINUTES: i64 = 10;
pub const MAX_MUTE_MINUTES: i64 = 1440;

/// How long the clean summary stays in the channel
const CLEAN_REPLY_LIFETIME: Duration = Duration::from_secs(5);
/// Leave room under Discord's 2000 character message limit
const MAX_REPLY_LEN: usize = 1900;

/// Every command the bot registers
#[must_use]
pub fn all() -> Vec<poise::Command<Data, Error>> {
    vec![
        mute(),
        unmute(),
        ban(),
        kick(),
        warn(),
        warnings(),
        editwarning(),
        delwarning(),
        clearwarnings(),
        clean(),
        report(),
        reason(),
        modconfig(),
    ]
}

/// Duration argument such as `30m`, `2h30m` or `7d`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationArg(pub chrono::Duration);

impl FromStr for DurationArg {
    type Err = ModerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        gate::parse_duration(s).map(Self)
    }
}

/// Human readable form of a duration, largest units first
#[must_use]
pub fn humanize(duration: chrono::Duration) -> String {
    let mut secs = duration.num_seconds().max(0);
    let mut parts = Vec::new();
    for (unit, size) in [("d", 86_400), ("h", 3_600), ("m", 60), ("s", 1)] {
        if secs >= size {
            parts.push(format!("{}{unit}", secs / size));
            secs %= size;
        }
    }
    if parts.is_empty() {
        "0s".to_string()
    } else {
        parts.join(" ")
    }
}

/// A command that passed the gate
struct Gated {
    guild_id: GuildId,
    author_id: UserId,
    reason: String,
}

/// Roles and channel permissions of whoever ran the command
async fn invoker(ctx: Context<'_>) -> Result<Invoker, Error> {
    let member = ctx
        .author_member()
        .await
        .ok_or("Could not load your server membership")?;

    // Interactions carry resolved permissions; prefix commands compute them from the cache
    let permissions = member
        .permissions
        .or_else(|| {
            let guild = ctx.guild()?;
            let channel = guild.channels.get(&ctx.channel_id())?;
            Some(guild.user_permissions_in(channel, &member))
        })
        .unwrap_or_else(Permissions::empty);

    Ok(Invoker {
        user_id: ctx.author().id,
        roles: member.roles.clone(),
        permissions,
    })
}

/// Answer with the moderator-facing text of `error`
async fn answer_error(ctx: Context<'_>, error: &ModerationError) -> Result<(), Error> {
    if !error.is_validation() {
        warn!(
            target: MODERATION_TARGET,
            command = %ctx.command().qualified_name,
            error = %error,
            "Moderation command failed"
        );
    }
    ctx.say(error.user_message()).await?;
    Ok(())
}

/// Reply with the outcome of a moderation call
async fn respond<T>(
    ctx: Context<'_>,
    result: ModerationResult<T>,
    success: impl FnOnce(T) -> String,
) -> Result<(), Error> {
    match result {
        Ok(value) => {
            ctx.say(success(value)).await?;
            Ok(())
        }
        Err(e) => answer_error(ctx, &e).await,
    }
}

/// Run the gate, answering the moderator when it refuses
async fn gated(
    ctx: Context<'_>,
    command: ModCommand,
    reason: Option<&str>,
) -> Result<Option<Gated>, Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a server")?;
    let invoker = invoker(ctx).await?;
    let config = ctx.data().coordinator.config(guild_id);

    match gate::check(config.as_ref(), command, &invoker, reason) {
        Ok(reason) => Ok(Some(Gated {
            guild_id,
            author_id: invoker.user_id,
            reason,
        })),
        Err(e) => {
            answer_error(ctx, &e).await?;
            Ok(None)
        }
    }
}

/// Mute a member for a number of minutes
#[poise::command(slash_command, prefix_command, guild_only, category = "Moderation")]
pub async fn mute(
    ctx: Context<'_>,
    #[description = "Member to mute"] user: serenity::User,
    #[description = "Minutes, 1 to 1440 (default 10)"]
    #[min = 1]
    #[max = 1440]
    minutes: Option<i64>,
    #[description = "Reason"]
    #[rest]
    reason: Option<String>,
) -> Result<(), Error> {
    let minutes = minutes.unwrap_or(DEFAULT_MUTE_MINUTES);
    if !(1..=MAX_MUTE_MINUTES).contains(&minutes) {
        let error = ModerationError::ValidationFailed(format!(
            "Mute duration must be between 1 and {MAX_MUTE_MINUTES} minutes"
        ));
        return answer_error(ctx, &error).await;
    }
    let Some(gated) = gated(ctx, ModCommand::Mute, reason.as_deref()).await? else {
        return Ok(());
    };

    let result = ctx
        .data()
        .coordinator
        .mute(
            gated.guild_id,
            user.id,
            chrono::Duration::minutes(minutes),
            gated.author_id,
            gated.reason,
        )
        .await;
    respond(ctx, result, |_| {
        format!("Muted {} for {minutes} minute(s).", user.id.mention())
    })
    .await
}

/// Unmute a member and give back the roles taken away
#[poise::command(slash_command, prefix_command, guild_only, category = "Moderation")]
pub async fn unmute(
    ctx: Context<'_>,
    #[description = "Member to unmute"] user: serenity::User,
    #[description = "Reason"]
    #[rest]
    reason: Option<String>,
) -> Result<(), Error> {
    let Some(gated) = gated(ctx, ModCommand::Unmute, reason.as_deref()).await? else {
        return Ok(());
    };

    let result = ctx
        .data()
        .coordinator
        .unmute(gated.guild_id, user.id, gated.author_id, gated.reason)
        .await;
    respond(ctx, result, |was_muted| {
        if was_muted {
            format!("Unmuted {}.", user.id.mention())
        } else {
            format!("{} was not muted.", user.id.mention())
        }
    })
    .await
}

/// Ban a member, optionally only for a while
#[poise::command(slash_command, prefix_command, guild_only, category = "Moderation")]
pub async fn ban(
    ctx: Context<'_>,
    #[description = "Member to ban"] user: serenity::User,
    #[description = "Lift the ban after this long, e.g. 12h or 7d"] duration: Option<
        DurationArg,
    >,
    #[description = "Reason"]
    #[rest]
    reason: Option<String>,
) -> Result<(), Error> {
    let Some(gated) = gated(ctx, ModCommand::Ban, reason.as_deref()).await? else {
        return Ok(());
    };
    let duration = duration.map(|DurationArg(duration)| duration);

    let result = ctx
        .data()
        .coordinator
        .ban(gated.guild_id, user.id, gated.author_id, gated.reason, duration)
        .await;
    respond(ctx, result, |()| match duration {
        Some(duration) => format!("Banned {} for {}.", user.id.mention(), humanize(duration)),
        None => format!("Banned {}.", user.id.mention()),
    })
    .await
}

/// Kick a member
#[poise::command(slash_command, prefix_command, guild_only, category = "Moderation")]
pub async fn kick(
    ctx: Context<'_>,
    #[description = "Member to kick"] user: serenity::User,
    #[description = "Reason"]
    #[rest]
    reason: Option<String>,
) -> Result<(), Error> {
    let Some(gated) = gated(ctx, ModCommand::Kick, reason.as_deref()).await? else {
        return Ok(());
    };

    let result = ctx
        .data()
        .coordinator
        .kick(gated.guild_id, user.id, gated.author_id, gated.reason)
        .await;
    respond(ctx, result, |()| format!("Kicked {}.", user.id.mention())).await
}

/// Warn a member
#[poise::command(slash_command, prefix_command, guild_only, category = "Moderation")]
pub async fn warn(
    ctx: Context<'_>,
    #[description = "Member to warn"] user: serenity::User,
    #[description = "Reason"]
    #[rest]
    reason: Option<String>,
) -> Result<(), Error> {
    let Some(gated) = gated(ctx, ModCommand::Warn, reason.as_deref()).await? else {
        return Ok(());
    };

    let result = ctx
        .data()
        .coordinator
        .warn(gated.guild_id, user.id, gated.author_id, gated.reason)
        .await;
    respond(ctx, result, |_| "👌".to_string()).await
}

/// Check the invoker may manage warnings, answering when not
async fn authorized_for_warnings(ctx: Context<'_>) -> Result<Option<GuildId>, Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a server")?;
    let invoker = invoker(ctx).await?;
    let config = ctx.data().coordinator.config(guild_id);
    match gate::authorize(config.as_ref(), ModCommand::Warn, &invoker) {
        Ok(_) => Ok(Some(guild_id)),
        Err(e) => {
            answer_error(ctx, &e).await?;
            Ok(None)
        }
    }
}

/// List the warnings of a member, newest first
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    aliases("warns"),
    category = "Moderation"
)]
pub async fn warnings(
    ctx: Context<'_>,
    #[description = "Member to look up"] user: serenity::User,
) -> Result<(), Error> {
    let Some(guild_id) = authorized_for_warnings(ctx).await? else {
        return Ok(());
    };

    let mut warnings = ctx.data().warnings.for_user(guild_id, user.id);
    if warnings.is_empty() {
        ctx.say("This user has not received any warnings").await?;
        return Ok(());
    }
    warnings.reverse();

    let mut out = String::new();
    for warning in &warnings {
        let line = format!("`{}` {warning}\n", warning.id);
        if out.len() + line.len() > MAX_REPLY_LEN {
            out.push_str("...");
            break;
        }
        out.push_str(&line);
    }
    ctx.say(out).await?;
    Ok(())
}

/// Change the reason of a warning
#[poise::command(slash_command, prefix_command, guild_only, category = "Moderation")]
pub async fn editwarning(
    ctx: Context<'_>,
    #[description = "Id from the warnings command"] id: String,
    #[description = "New reason"]
    #[rest]
    reason: String,
) -> Result<(), Error> {
    let Some(guild_id) = authorized_for_warnings(ctx).await? else {
        return Ok(());
    };

    let result = Uuid::parse_str(id.trim())
        .map_err(|_| {
            ModerationError::ValidationFailed(
                "Failed updating, most likely couldn't find the warning".to_string(),
            )
        })
        .and_then(|id| {
            ctx.data()
                .coordinator
                .edit_warning(guild_id, id, ctx.author().id, reason.trim())
        });
    respond(ctx, result, |_| "👌".to_string()).await
}

/// Delete one warning by id
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    aliases("dw"),
    category = "Moderation"
)]
pub async fn delwarning(
    ctx: Context<'_>,
    #[description = "Id from the warnings command"] id: String,
) -> Result<(), Error> {
    let Some(guild_id) = authorized_for_warnings(ctx).await? else {
        return Ok(());
    };

    let removed = Uuid::parse_str(id.trim())
        .ok()
        .and_then(|id| ctx.data().warnings.remove(guild_id, id));
    if removed.is_some() {
        ctx.say("👌").await?;
    } else {
        ctx.say("Failed deleting, most likely couldn't find the warning")
            .await?;
    }
    Ok(())
}

/// Delete every warning of a member
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    aliases("clw"),
    category = "Moderation"
)]
pub async fn clearwarnings(
    ctx: Context<'_>,
    #[description = "Member whose warnings to clear"] user: serenity::User,
) -> Result<(), Error> {
    let Some(guild_id) = authorized_for_warnings(ctx).await? else {
        return Ok(());
    };

    let removed = ctx.data().warnings.clear_user(guild_id, user.id);
    ctx.say(format!("Deleted {removed} warnings.")).await?;
    Ok(())
}

/// Delete recent messages, optionally filtered
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    aliases("clear", "cl"),
    category = "Moderation"
)]
pub async fn clean(
    ctx: Context<'_>,
    #[description = "How many messages to delete (1-100)"]
    #[min = 1]
    #[max = 100]
    count: i64,
    #[description = "Only delete messages by this member"] user: Option<serenity::User>,
    #[description = "Only delete messages matching this regex"] regex: Option<String>,
    #[description = "Match the regex case-insensitively"] case_insensitive: Option<bool>,
    #[description = "Only delete messages younger than this, e.g. 30m"] max_age: Option<
        DurationArg,
    >,
) -> Result<(), Error> {
    let Some(gated) = gated(ctx, ModCommand::Clean, None).await? else {
        return Ok(());
    };

    let pattern = match regex
        .as_deref()
        .map(|raw| compile_pattern(raw, case_insensitive.unwrap_or(false)))
        .transpose()
    {
        Ok(pattern) => pattern,
        Err(e) => return answer_error(ctx, &e).await,
    };
    let request = CleanRequest {
        invoker: gated.author_id,
        count,
        user: user.map(|user| user.id),
        pattern,
        max_age: max_age.map(|DurationArg(age)| age),
        include_invocation: matches!(ctx, poise::Context::Prefix(_)),
    };
    let plan = match request.plan() {
        Ok(plan) => plan,
        Err(e) => return answer_error(ctx, &e).await,
    };

    ctx.defer_ephemeral().await?;
    let deleted = match ctx
        .data()
        .coordinator
        .clean(gated.guild_id, ctx.channel_id(), gated.author_id, plan)
        .await
    {
        Ok(deleted) => deleted,
        Err(e) => return answer_error(ctx, &e).await,
    };

    let reply = ctx
        .send(
            CreateReply::default()
                .content(format!("Deleted {deleted} message(s)! :')"))
                .ephemeral(true),
        )
        .await?;
    if let poise::Context::Prefix(_) = ctx {
        tokio::time::sleep(CLEAN_REPLY_LIFETIME).await;
        if let Err(e) = reply.delete(ctx).await {
            error!(target: MODERATION_TARGET, error = %e, "Failed deleting clean summary");
        }
    }
    Ok(())
}

/// Report a member to the server's staff
#[poise::command(slash_command, prefix_command, guild_only, category = "Moderation")]
pub async fn report(
    ctx: Context<'_>,
    #[description = "Member to report"] user: serenity::User,
    #[description = "What happened"]
    #[rest]
    reason: String,
) -> Result<(), Error> {
    let Some(gated) = gated(ctx, ModCommand::Report, Some(&reason)).await? else {
        return Ok(());
    };

    let channel_id = ctx.channel_id();
    let result = ctx
        .data()
        .coordinator
        .report(gated.guild_id, channel_id, gated.author_id, user.id, &gated.reason)
        .await;
    respond(ctx, result, |report_channel| {
        // The report itself is the confirmation
        if report_channel == channel_id {
            "👌".to_string()
        } else {
            "User reported to the proper authorities".to_string()
        }
    })
    .await
}

/// Parse a message id as typed or pasted by a moderator
fn parse_message_id(raw: &str) -> ModerationResult<MessageId> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .map(MessageId::new)
        .ok_or_else(|| ModerationError::ValidationFailed(format!("Invalid message id: `{raw}`")))
}

/// Change the reason on a modlog entry
#[poise::command(slash_command, prefix_command, guild_only, category = "Moderation")]
pub async fn reason(
    ctx: Context<'_>,
    #[description = "Id of the modlog message"] message_id: String,
    #[description = "New reason"]
    #[rest]
    reason: String,
) -> Result<(), Error> {
    let Some(gated) = gated(ctx, ModCommand::Reason, Some(&reason)).await? else {
        return Ok(());
    };
    let message_id = match parse_message_id(&message_id) {
        Ok(message_id) => message_id,
        Err(e) => return answer_error(ctx, &e).await,
    };

    let result = ctx
        .data()
        .coordinator
        .edit_modlog_reason(gated.guild_id, message_id, gated.author_id, &gated.reason)
        .await;
    respond(ctx, result, |()| "👌".to_string()).await
}

/// Show or change the moderation settings of this server
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "MANAGE_GUILD",
    subcommands(
        "modconfig_show",
        "modconfig_muterole",
        "modconfig_overrides",
        "modconfig_removerole",
        "modconfig_ignorechannel",
        "modconfig_modlog",
        "modconfig_reportchannel",
        "modconfig_logs",
        "modconfig_command"
    ),
    subcommand_required,
    category = "Moderation"
)]
pub async fn modconfig(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Apply a change, save the configs and ask for an override refresh when it matters
async fn change_config(
    ctx: Context<'_>,
    refresh_overrides: bool,
    change: impl FnOnce(&mut ModerationConfig),
) -> Result<ModerationConfig, Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a server")?;
    let data = ctx.data();
    let config = data.configs.update(guild_id, change);

    if let Err(e) = data.configs.save(&data.settings.guild_configs_path()).await {
        error!(target: MODERATION_TARGET, error = %e, "Failed saving guild configs");
    }
    if refresh_overrides {
        data.refresh.publish(guild_id);
    }
    Ok(config)
}

/// Toggle `item` in `list`, returning whether it is now present
fn toggle<T: PartialEq>(list: &mut Vec<T>, item: T) -> bool {
    if let Some(index) = list.iter().position(|existing| *existing == item) {
        list.remove(index);
        false
    } else {
        list.push(item);
        true
    }
}

fn describe(config: &ModerationConfig) -> String {
    let mention_roles = |roles: &[serenity::RoleId]| {
        if roles.is_empty() {
            "none".to_string()
        } else {
            roles
                .iter()
                .map(|role| role.mention().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        }
    };
    let mention_channel = |channel: Option<serenity::ChannelId>| {
        channel.map_or_else(|| "none".to_string(), |channel| channel.mention().to_string())
    };
    let commands = ModCommand::ALL
        .into_iter()
        .map(|command| {
            let settings = config.command(command);
            let reason = match (command.takes_reason(), settings.reason_optional) {
                (false, _) => "",
                (true, true) => ", reason optional",
                (true, false) => ", reason required",
            };
            format!(
                "- **{command}**: {}{reason}, roles: {}",
                if settings.enabled { "enabled" } else { "disabled" },
                mention_roles(&settings.required_roles)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "**Mute role**: {}\n**Manage mute overrides**: {}\n**Roles removed while muted**: {}\n\
         **Ignored channels**: {}\n**Modlog**: {}\n**Reports**: {}\n**Log bans**: {}\n\
         **Log unbans**: {}\n{commands}",
        config
            .mute_role_id
            .map_or_else(|| "none".to_string(), |role| role.mention().to_string()),
        config.manage_mute_overrides,
        mention_roles(&config.mute_remove_roles),
        if config.mute_ignore_channels.is_empty() {
            "none".to_string()
        } else {
            config
                .mute_ignore_channels
                .iter()
                .map(|channel| channel.mention().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        },
        mention_channel(config.modlog_channel_id),
        mention_channel(config.report_channel_id),
        config.log_bans,
        config.log_unbans,
    )
}

/// Show the current settings
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    rename = "show",
    required_permissions = "MANAGE_GUILD"
)]
pub async fn modconfig_show(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a server")?;
    let config = ctx
        .data()
        .coordinator
        .config(guild_id)
        .unwrap_or_else(|| ModerationConfig::for_guild(guild_id));
    ctx.say(describe(&config)).await?;
    Ok(())
}

/// Set the role given to muted members
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    rename = "muterole",
    required_permissions = "MANAGE_GUILD"
)]
pub async fn modconfig_muterole(
    ctx: Context<'_>,
    #[description = "Mute role, leave empty to unset"] role: Option<serenity::Role>,
) -> Result<(), Error> {
    let role_id = role.map(|role| role.id);
    change_config(ctx, true, |config| config.mute_role_id = role_id).await?;
    match role_id {
        Some(role_id) => ctx.say(format!("Mute role set to {}.", role_id.mention())).await?,
        None => ctx.say("Mute role unset.").await?,
    };
    Ok(())
}

/// Turn management of the mute role's channel overwrites on or off
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    rename = "overrides",
    required_permissions = "MANAGE_GUILD"
)]
pub async fn modconfig_overrides(
    ctx: Context<'_>,
    #[description = "Keep the mute role denied in every channel"] manage: bool,
) -> Result<(), Error> {
    change_config(ctx, manage, |config| config.manage_mute_overrides = manage).await?;
    ctx.say(format!("Managing mute overrides: {manage}.")).await?;
    Ok(())
}

/// Add or remove a role from those taken away while muted
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    rename = "removerole",
    required_permissions = "MANAGE_GUILD"
)]
pub async fn modconfig_removerole(
    ctx: Context<'_>,
    #[description = "Role to toggle"] role: serenity::Role,
) -> Result<(), Error> {
    let mut added = false;
    change_config(ctx, false, |config| {
        added = toggle(&mut config.mute_remove_roles, role.id);
    })
    .await?;
    let verb = if added { "now" } else { "no longer" };
    ctx.say(format!("{} is {verb} removed while muted.", role.id.mention()))
        .await?;
    Ok(())
}

/// Add or remove a channel from those the mute overwrite skips
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    rename = "ignorechannel",
    required_permissions = "MANAGE_GUILD"
)]
pub async fn modconfig_ignorechannel(
    ctx: Context<'_>,
    #[description = "Channel to toggle"] channel: serenity::GuildChannel,
) -> Result<(), Error> {
    let mut ignored = false;
    change_config(ctx, true, |config| {
        ignored = toggle(&mut config.mute_ignore_channels, channel.id);
    })
    .await?;
    let verb = if ignored { "now" } else { "no longer" };
    ctx.say(format!("{} is {verb} ignored for mute overrides.", channel.id.mention()))
        .await?;
    Ok(())
}

/// Set the channel moderation actions are logged to
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    rename = "modlog",
    required_permissions = "MANAGE_GUILD"
)]
pub async fn modconfig_modlog(
    ctx: Context<'_>,
    #[description = "Modlog channel, leave empty to unset"] channel: Option<serenity::GuildChannel>,
) -> Result<(), Error> {
    let channel_id = channel.map(|channel| channel.id);
    change_config(ctx, false, |config| config.modlog_channel_id = channel_id).await?;
    match channel_id {
        Some(channel_id) => ctx.say(format!("Modlog set to {}.", channel_id.mention())).await?,
        None => ctx.say("Modlog unset.").await?,
    };
    Ok(())
}

/// Set the channel member reports are sent to
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    rename = "reportchannel",
    required_permissions = "MANAGE_GUILD"
)]
pub async fn modconfig_reportchannel(
    ctx: Context<'_>,
    #[description = "Report channel, leave empty to unset"] channel: Option<
        serenity::GuildChannel,
    >,
) -> Result<(), Error> {
    let channel_id = channel.map(|channel| channel.id);
    change_config(ctx, false, |config| config.report_channel_id = channel_id).await?;
    match channel_id {
        Some(channel_id) => {
            ctx.say(format!("Reports go to {}.", channel_id.mention()))
                .await?
        }
        None => ctx.say("Report channel unset.").await?,
    };
    Ok(())
}

/// Choose whether bans and unbans done outside the bot are logged
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    rename = "logs",
    required_permissions = "MANAGE_GUILD"
)]
pub async fn modconfig_logs(
    ctx: Context<'_>,
    #[description = "Log bans"] bans: Option<bool>,
    #[description = "Log unbans"] unbans: Option<bool>,
) -> Result<(), Error> {
    let config = change_config(ctx, false, |config| {
        if let Some(bans) = bans {
            config.log_bans = bans;
        }
        if let Some(unbans) = unbans {
            config.log_unbans = unbans;
        }
    })
    .await?;
    ctx.say(format!(
        "Logging bans: {}, unbans: {}.",
        config.log_bans, config.log_unbans
    ))
    .await?;
    Ok(())
}

/// Change the settings of one moderation command
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    rename = "command",
    required_permissions = "MANAGE_GUILD"
)]
pub async fn modconfig_command(
    ctx: Context<'_>,
    #[description = "ban, kick, mute, unmute, clean, report, reason or warn"] command: ModCommand,
    #[description = "Enable the command"] enabled: Option<bool>,
    #[description = "Allow running it without a reason"] reason_optional: Option<bool>,
    #[description = "Toggle a role that may run it"] role: Option<serenity::Role>,
) -> Result<(), Error> {
    let role_id = role.map(|role| role.id);
    let config = change_config(ctx, false, |config| {
        let settings = config.command_mut(command);
        if let Some(enabled) = enabled {
            settings.enabled = enabled;
        }
        if let Some(reason_optional) = reason_optional {
            settings.reason_optional = reason_optional;
        }
        if let Some(role_id) = role_id {
            toggle(&mut settings.required_roles, role_id);
        }
    })
    .await?;

    let settings = config.command(command);
    ctx.say(format!(
        "**{command}**: enabled {}, reason optional {}, {} role(s).",
        settings.enabled,
        settings.reason_optional,
        settings.required_roles.len()
    ))
    .await?;
    Ok(())
}
