//! Process settings and per-guild moderation configuration

use crate::moderation::{ModerationError, ModerationResult};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serenity::all::{ChannelId, GuildId, Permissions, RoleId};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Default directory for YAML snapshots
pub const DEFAULT_DATA_DIR: &str = "data";
/// Default interval of the schedule recovery sweep
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

pub const GUILD_CONFIGS_FILE: &str = "guild_configs.yaml";
pub const MUTES_FILE: &str = "mutes.yaml";
pub const WARNINGS_FILE: &str = "warnings.yaml";
pub const UNBANS_FILE: &str = "unbans.yaml";

/// Settings read from the environment at startup
#[derive(Clone)]
pub struct Settings {
    pub token: String,
    pub data_dir: PathBuf,
    pub sweep_interval: Duration,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("token", &"<redacted>")
            .field("data_dir", &self.data_dir)
            .field("sweep_interval", &self.sweep_interval)
            .finish()
    }
}

impl Settings {
    /// Read settings from the process environment
    ///
    /// # Errors
    /// Returns an error if `DISCORD_TOKEN` is missing or a numeric setting does not parse.
    pub fn from_env() -> ModerationResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary lookup
    ///
    /// # Errors
    /// Returns an error if `DISCORD_TOKEN` is missing or a numeric setting does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ModerationResult<Self> {
        let token = lookup("DISCORD_TOKEN")
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| {
                ModerationError::ConfigurationMissing("DISCORD_TOKEN must be set".to_string())
            })?;

        let data_dir = lookup("WARDEN_DATA_DIR")
            .filter(|dir| !dir.is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_DATA_DIR), PathBuf::from);

        let sweep_interval = match lookup("WARDEN_SWEEP_INTERVAL_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| {
                    ModerationError::ValidationFailed(format!(
                        "WARDEN_SWEEP_INTERVAL_SECS must be a positive integer, got {raw:?}"
                    ))
                })?,
            None => DEFAULT_SWEEP_INTERVAL_SECS,
        };

        Ok(Self {
            token,
            data_dir,
            sweep_interval: Duration::from_secs(sweep_interval),
        })
    }

    #[must_use]
    pub fn guild_configs_path(&self) -> PathBuf {
        self.data_dir.join(GUILD_CONFIGS_FILE)
    }

    #[must_use]
    pub fn mutes_path(&self) -> PathBuf {
        self.data_dir.join(MUTES_FILE)
    }

    #[must_use]
    pub fn warnings_path(&self) -> PathBuf {
        self.data_dir.join(WARNINGS_FILE)
    }

    #[must_use]
    pub fn unbans_path(&self) -> PathBuf {
        self.data_dir.join(UNBANS_FILE)
    }
}

/// Moderator commands subject to the command gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModCommand {
    Ban,
    Kick,
    Mute,
    Unmute,
    Clean,
    Report,
    Reason,
    Warn,
}

impl ModCommand {
    /// Every gated command, in display order
    pub const ALL: [Self; 8] = [
        Self::Ban,
        Self::Kick,
        Self::Mute,
        Self::Unmute,
        Self::Clean,
        Self::Report,
        Self::Reason,
        Self::Warn,
    ];

    /// Permission that stands in for the required roles when none are configured
    #[must_use]
    pub const fn legacy_permission(self) -> Permissions {
        match self {
            Self::Ban => Permissions::BAN_MEMBERS,
            Self::Kick | Self::Mute | Self::Unmute | Self::Reason => Permissions::KICK_MEMBERS,
            Self::Clean | Self::Warn => Permissions::MANAGE_MESSAGES,
            // Anyone may report
            Self::Report => Permissions::empty(),
        }
    }

    /// Whether the gate applies the reason rules; report and reason take
    /// their text as a required argument instead
    #[must_use]
    pub const fn takes_reason(self) -> bool {
        !matches!(self, Self::Clean | Self::Report | Self::Reason)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ban => "ban",
            Self::Kick => "kick",
            Self::Mute => "mute",
            Self::Unmute => "unmute",
            Self::Clean => "clean",
            Self::Report => "report",
            Self::Reason => "reason",
            Self::Warn => "warn",
        }
    }
}

impl fmt::Display for ModCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModCommand {
    type Err = ModerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ban" => Ok(Self::Ban),
            "kick" => Ok(Self::Kick),
            "mute" => Ok(Self::Mute),
            "unmute" => Ok(Self::Unmute),
            "clean" => Ok(Self::Clean),
            "report" => Ok(Self::Report),
            "reason" => Ok(Self::Reason),
            "warn" => Ok(Self::Warn),
            other => Err(ModerationError::ValidationFailed(format!(
                "Unknown command `{other}`, expected one of \
                 ban, kick, mute, unmute, clean, report, reason, warn"
            ))),
        }
    }
}

/// Per-command switches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSettings {
    pub enabled: bool,
    pub reason_optional: bool,
    /// Holding any of these roles grants the command; empty means the legacy
    /// permission decides
    pub required_roles: Vec<RoleId>,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            reason_optional: false,
            required_roles: Vec::new(),
        }
    }
}

/// Moderation configuration of one guild
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    // The ID of the guild
    pub guild_id: u64,
    pub mute_role_id: Option<RoleId>,
    // Keep the mute role's channel overwrites in sync
    pub manage_mute_overrides: bool,
    pub mute_ignore_channels: Vec<ChannelId>,
    // Roles taken away while muted
    pub mute_remove_roles: Vec<RoleId>,
    pub ban: CommandSettings,
    pub kick: CommandSettings,
    pub mute: CommandSettings,
    pub unmute: CommandSettings,
    pub clean: CommandSettings,
    pub report: CommandSettings,
    pub reason: CommandSettings,
    pub warn: CommandSettings,
    pub modlog_channel_id: Option<ChannelId>,
    // Where member reports go
    pub report_channel_id: Option<ChannelId>,
    pub log_bans: bool,
    pub log_unbans: bool,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            guild_id: 0,
            mute_role_id: None,
            manage_mute_overrides: true,
            mute_ignore_channels: Vec::new(),
            mute_remove_roles: Vec::new(),
            ban: CommandSettings::default(),
            kick: CommandSettings::default(),
            mute: CommandSettings::default(),
            unmute: CommandSettings::default(),
            clean: CommandSettings::default(),
            report: CommandSettings::default(),
            reason: CommandSettings::default(),
            warn: CommandSettings::default(),
            modlog_channel_id: None,
            report_channel_id: None,
            log_bans: true,
            log_unbans: true,
        }
    }
}

impl ModerationConfig {
    /// Default configuration for a guild
    #[must_use]
    pub fn for_guild(guild_id: GuildId) -> Self {
        Self {
            guild_id: guild_id.get(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn command(&self, command: ModCommand) -> &CommandSettings {
        match command {
            ModCommand::Ban => &self.ban,
            ModCommand::Kick => &self.kick,
            ModCommand::Mute => &self.mute,
            ModCommand::Unmute => &self.unmute,
            ModCommand::Clean => &self.clean,
            ModCommand::Report => &self.report,
            ModCommand::Reason => &self.reason,
            ModCommand::Warn => &self.warn,
        }
    }

    pub fn command_mut(&mut self, command: ModCommand) -> &mut CommandSettings {
        match command {
            ModCommand::Ban => &mut self.ban,
            ModCommand::Kick => &mut self.kick,
            ModCommand::Mute => &mut self.mute,
            ModCommand::Unmute => &mut self.unmute,
            ModCommand::Clean => &mut self.clean,
            ModCommand::Report => &mut self.report,
            ModCommand::Reason => &mut self.reason,
            ModCommand::Warn => &mut self.warn,
        }
    }

    #[must_use]
    pub fn ignores_channel(&self, channel_id: ChannelId) -> bool {
        self.mute_ignore_channels.contains(&channel_id)
    }
}

/// Read access to guild configuration
pub trait ConfigProvider: Send + Sync {
    fn get_config(&self, guild_id: GuildId) -> Option<ModerationConfig>;
}

/// Guild configurations held in memory and snapshotted to YAML
#[derive(Debug, Default)]
pub struct ConfigStore {
    configs: DashMap<GuildId, ModerationConfig>,
}

impl ConfigStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a guild's configuration
    pub fn set(&self, guild_id: GuildId, mut config: ModerationConfig) {
        config.guild_id = guild_id.get();
        self.configs.insert(guild_id, config);
    }

    /// Apply `change` to a guild's configuration, creating a default one first
    /// if needed, and return the result
    pub fn update(
        &self,
        guild_id: GuildId,
        change: impl FnOnce(&mut ModerationConfig),
    ) -> ModerationConfig {
        let mut entry = self
            .configs
            .entry(guild_id)
            .or_insert_with(|| ModerationConfig::for_guild(guild_id));
        change(entry.value_mut());
        entry.value().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// Load configurations from a YAML file
    ///
    /// A missing or unreadable file yields an empty store.
    pub async fn load(path: &Path) -> Self {
        let store = Self::new();

        let Ok(file_content) = tokio::fs::read_to_string(path).await else {
            return store;
        };

        match serde_yaml::from_str::<Vec<ModerationConfig>>(&file_content) {
            Ok(configs) => {
                for config in configs {
                    // GuildId cannot be zero
                    if config.guild_id == 0 {
                        continue;
                    }
                    store.configs.insert(GuildId::new(config.guild_id), config);
                }
            }
            Err(e) => warn!(
                path = %path.display(),
                error = %e,
                "Ignoring unreadable guild configs"
            ),
        }

        store
    }

    /// Save every configuration to a YAML file
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created, the configs cannot
    /// be serialized or the file cannot be written.
    pub async fn save(&self, path: &Path) -> ModerationResult<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }

        let mut configs: Vec<ModerationConfig> = self
            .configs
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        configs.sort_by_key(|config| config.guild_id);

        let yaml = serde_yaml::to_string(&configs)?;
        tokio::fs::write(path, yaml).await?;
        Ok(())
    }
}

impl ConfigProvider for ConfigStore {
    fn get_config(&self, guild_id: GuildId) -> Option<ModerationConfig> {
        self.configs
            .get(&guild_id)
            .map(|entry| entry.value().clone())
    }
}
