use crate::{COMMAND_TARGET, CONSOLE_TARGET, Data, ERROR_TARGET, Error, MODERATION_TARGET};
use dashmap::DashMap;
use poise::serenity_prelude::{ChannelId, GuildId, ResolvedOption, ResolvedValue, UserId};
use poise::{Context, FrameworkError};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Instant;
use tracing::{Level, error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::Targets,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Log directory name
pub const LOG_DIR: &str = "logs";
/// Command log file name
pub const COMMAND_LOG_FILE: &str = "commands";
/// Moderation action log file name
pub const MODERATION_LOG_FILE: &str = "moderation";
/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,serenity=error";

/// Initialize the logging system with console and file outputs
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Create log directory if it doesn't exist
    if !Path::new(LOG_DIR).exists() {
        std::fs::create_dir_all(LOG_DIR)?;
    }

    // Set up file appenders with daily rotation
    let command_file = RollingFileAppender::new(Rotation::DAILY, LOG_DIR, COMMAND_LOG_FILE);
    let moderation_file =
        RollingFileAppender::new(Rotation::DAILY, LOG_DIR, MODERATION_LOG_FILE);

    // Create a layer for console output (human-readable format)
    let console_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(true);

    // Create a layer for command logs (JSON format)
    let command_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(command_file)
        .with_filter(
            Targets::new()
                .with_target(COMMAND_TARGET, Level::INFO)
                .with_target(ERROR_TARGET, Level::INFO),
        );

    // Mutes, bans and their expiry, one JSON object per line
    let moderation_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(moderation_file)
        .with_filter(Targets::new().with_target(MODERATION_TARGET, Level::INFO));

    // Use env filter to allow runtime configuration of log levels
    // Default to INFO level if not specified, but filter out serenity heartbeat logs
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(command_layer)
        .with(moderation_layer)
        .init();

    info!("Logging system initialized");
    Ok(())
}

/// Start times of running commands, keyed by invocation id
static STARTED: LazyLock<DashMap<u64, Instant>> = LazyLock::new(DashMap::new);

/// Where a command ran and who it was aimed at
#[derive(Debug, Clone, PartialEq, Eq)]
struct CommandScope {
    command: String,
    guild_id: Option<GuildId>,
    channel_id: ChannelId,
    author_id: UserId,
    target_id: Option<UserId>,
}

impl CommandScope {
    fn of(ctx: Context<'_, Data, Error>) -> Self {
        Self {
            command: ctx.command().qualified_name.clone(),
            guild_id: ctx.guild_id(),
            channel_id: ctx.channel_id(),
            author_id: ctx.author().id,
            target_id: target_user(ctx),
        }
    }

    fn guild(&self) -> String {
        self.guild_id.map_or_else(|| "DM".to_string(), |id| id.to_string())
    }

    fn target(&self) -> String {
        self.target_id.map(|id| id.to_string()).unwrap_or_default()
    }
}

/// The member a moderation command acts on, when its first parameter is one
fn target_user(ctx: Context<'_, Data, Error>) -> Option<UserId> {
    let first = ctx.command().parameters.first()?;
    if first.name != "user" {
        return None;
    }
    match ctx {
        Context::Application(actx) => first_user_option(&actx.interaction.data.options()),
        Context::Prefix(pctx) => user_in_args(pctx.args),
    }
}

fn first_user_option(options: &[ResolvedOption<'_>]) -> Option<UserId> {
    options.iter().find_map(|option| match &option.value {
        ResolvedValue::User(user, _) => Some(user.id),
        ResolvedValue::SubCommand(nested) | ResolvedValue::SubCommandGroup(nested) => {
            first_user_option(nested)
        }
        _ => None,
    })
}

/// First prefix argument as a mention or raw id
fn user_in_args(args: &str) -> Option<UserId> {
    let token = args.split_whitespace().next()?;
    let id = token
        .strip_prefix("<@")
        .and_then(|rest| rest.strip_suffix('>'))
        .map_or(token, |inner| inner.trim_start_matches('!'));
    id.parse::<u64>().ok().filter(|id| *id != 0).map(UserId::new)
}

/// Log the start of a command execution (pre-command hook)
pub fn log_command_start(ctx: Context<'_, Data, Error>) {
    STARTED.insert(ctx.id(), Instant::now());

    let scope = CommandScope::of(ctx);
    info!(
        target: COMMAND_TARGET,
        command = %scope.command,
        guild_id = %scope.guild(),
        channel_id = %scope.channel_id,
        author_id = %scope.author_id,
        target_id = %scope.target(),
        invocation = %ctx.invocation_string(),
        event = "start",
        "Command started"
    );
}

/// Log the end of a command execution (post-command hook)
pub fn log_command_end(ctx: Context<'_, Data, Error>) {
    let elapsed = STARTED.remove(&ctx.id()).map(|(_, start)| start.elapsed());
    let duration_ms = u64::try_from(elapsed.map_or(0, |d| d.as_millis())).unwrap_or(u64::MAX);

    let scope = CommandScope::of(ctx);
    info!(
        target: COMMAND_TARGET,
        command = %scope.command,
        guild_id = %scope.guild(),
        channel_id = %scope.channel_id,
        author_id = %scope.author_id,
        target_id = %scope.target(),
        duration_ms,
        event = "end",
        "Command finished"
    );
}

/// Log errors that occur during command execution
pub fn log_command_error(error: &FrameworkError<'_, Data, Error>) {
    match error {
        FrameworkError::Command { error, ctx, .. } => {
            // post_command does not run for failed commands
            STARTED.remove(&ctx.id());
            let scope = CommandScope::of(*ctx);
            error!(
                target: ERROR_TARGET,
                command = %scope.command,
                guild_id = %scope.guild(),
                channel_id = %scope.channel_id,
                author_id = %scope.author_id,
                target_id = %scope.target(),
                error = %error,
                "Command failed"
            );
        }
        FrameworkError::ArgumentParse { error, input, ctx, .. } => {
            let scope = CommandScope::of(*ctx);
            warn!(
                target: ERROR_TARGET,
                command = %scope.command,
                guild_id = %scope.guild(),
                author_id = %scope.author_id,
                input = input.as_deref().unwrap_or_default(),
                error = %error,
                "Invalid command arguments"
            );
        }
        FrameworkError::MissingUserPermissions {
            missing_permissions,
            ctx,
            ..
        } => {
            let scope = CommandScope::of(*ctx);
            warn!(
                target: ERROR_TARGET,
                command = %scope.command,
                guild_id = %scope.guild(),
                author_id = %scope.author_id,
                missing = ?missing_permissions,
                "Moderator lacks permissions"
            );
        }
        FrameworkError::CommandCheckFailed { error, ctx, .. } => {
            let scope = CommandScope::of(*ctx);
            let reason = error
                .as_ref()
                .map_or_else(|| "Check failed".to_string(), ToString::to_string);
            warn!(
                target: ERROR_TARGET,
                command = %scope.command,
                guild_id = %scope.guild(),
                author_id = %scope.author_id,
                error = %reason,
                "Command check failed"
            );
        }
        err => {
            error!(target: ERROR_TARGET, error = ?err, "Framework error");
        }
    }
}

/// Log the bot coming online
pub fn log_ready(user_name: &str, guilds: usize) {
    info!(
        target: CONSOLE_TARGET,
        user = user_name,
        guilds,
        event = "ready",
        "Registering commands"
    );
}
