//! Discord side effects
//!
//! The coordinator never talks to serenity directly. Everything it needs from
//! Discord goes through [`RemoteActions`], which [`SerenityRemote`] implements
//! on top of the bot's `Http` client and gateway cache.

use crate::moderation::{ModerationError, ModerationResult};
use chrono::{DateTime, Utc};
use serenity::all::{
    Cache, ChannelId, GuildChannel, GuildId, Http, Member, Message, MessageId,
    PermissionOverwrite, PermissionOverwriteType, Permissions, RoleId, UserId,
};
use serenity::builder::{EditMessage, GetMessages};
use serenity::http::HttpError;
use std::fmt;
use std::sync::Arc;

/// Largest page the message history endpoint returns
const HISTORY_PAGE: usize = 100;

/// Roles held by a member at the time it was fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSnapshot {
    pub user_id: UserId,
    pub roles: Vec<RoleId>,
}

impl From<&Member> for MemberSnapshot {
    fn from(member: &Member) -> Self {
        Self {
            user_id: member.user.id,
            roles: member.roles.clone(),
        }
    }
}

/// Allow/deny pair of a role overwrite on a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleOverwrite {
    pub role_id: RoleId,
    pub allow: Permissions,
    pub deny: Permissions,
}

/// The parts of a guild channel the overwrite synchronizer looks at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub id: ChannelId,
    pub guild_id: GuildId,
    pub role_overwrites: Vec<RoleOverwrite>,
}

impl ChannelSnapshot {
    /// Existing overwrite for `role_id`, if the channel has one
    #[must_use]
    pub fn overwrite_for(&self, role_id: RoleId) -> Option<&RoleOverwrite> {
        self.role_overwrites.iter().find(|o| o.role_id == role_id)
    }
}

impl From<&GuildChannel> for ChannelSnapshot {
    fn from(channel: &GuildChannel) -> Self {
        let role_overwrites = channel
            .permission_overwrites
            .iter()
            .filter_map(|overwrite| match overwrite.kind {
                PermissionOverwriteType::Role(role_id) => Some(RoleOverwrite {
                    role_id,
                    allow: overwrite.allow,
                    deny: overwrite.deny,
                }),
                _ => None,
            })
            .collect();

        Self {
            id: channel.id,
            guild_id: channel.guild_id,
            role_overwrites,
        }
    }
}

/// A message as seen by the clean filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSnapshot {
    pub id: MessageId,
    pub author_id: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&Message> for MessageSnapshot {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            author_id: message.author.id,
            content: message.content.clone(),
            timestamp: DateTime::from_timestamp(message.timestamp.unix_timestamp(), 0)
                .unwrap_or_default(),
        }
    }
}

/// What a modlog line reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModlogAction {
    Banned,
    Unbanned,
    Kicked,
    Muted,
    Unmuted,
    Warned,
}

impl fmt::Display for ModlogAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Banned => "Banned",
            Self::Unbanned => "Unbanned",
            Self::Kicked => "Kicked",
            Self::Muted => "Muted",
            Self::Unmuted => "Unmuted",
            Self::Warned => "Warned",
        };
        f.write_str(label)
    }
}

/// One moderation log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModlogEntry {
    pub action: ModlogAction,
    pub user_id: UserId,
    /// `None` when the actor is unknown
    pub author_id: Option<UserId>,
    pub reason: String,
    pub duration: Option<chrono::Duration>,
}

impl fmt::Display for ModlogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "**{}** <@{}>", self.action, self.user_id)?;
        if let Some(duration) = self.duration {
            write!(f, " for {}m", duration.num_minutes())?;
        }
        match self.author_id {
            Some(author) => write!(f, " by <@{author}>")?,
            None => write!(f, " by an unknown moderator")?,
        }
        write!(f, ": {}", self.reason)
    }
}

/// Rewrite the reason of a posted modlog line
///
/// Everything after the first `": "` is the reason. `None` when `line` does
/// not look like a modlog line.
#[must_use]
pub fn replace_modlog_reason(line: &str, reason: &str, editor_id: UserId) -> Option<String> {
    let (head, _) = line.split_once(": ")?;
    if !head.starts_with("**") {
        return None;
    }
    Some(format!("{head}: {reason} (updated by <@{editor_id}>)"))
}

/// Fallible Discord operations used by the moderation core
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RemoteActions: Send + Sync {
    /// The bot's own user id
    fn current_user_id(&self) -> UserId;

    /// Fetch a member with its current roles
    async fn fetch_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> ModerationResult<MemberSnapshot>;

    async fn add_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        reason: Option<String>,
    ) -> ModerationResult<()>;

    async fn remove_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        reason: Option<String>,
    ) -> ModerationResult<()>;

    async fn ban(&self, guild_id: GuildId, user_id: UserId, reason: String)
    -> ModerationResult<()>;

    async fn unban(&self, guild_id: GuildId, user_id: UserId) -> ModerationResult<()>;

    async fn kick(&self, guild_id: GuildId, user_id: UserId, reason: String)
    -> ModerationResult<()>;

    /// Snapshot of the guild's channels, `None` when this process does not
    /// hold the guild
    fn guild_channels(&self, guild_id: GuildId) -> Option<Vec<ChannelSnapshot>>;

    /// Create or replace a role overwrite on a channel
    async fn set_channel_overwrite(
        &self,
        channel_id: ChannelId,
        overwrite: RoleOverwrite,
    ) -> ModerationResult<()>;

    async fn send_message(&self, channel_id: ChannelId, content: String) -> ModerationResult<()>;

    /// Post a moderation log line, returning the id of the posted message
    async fn post_modlog(
        &self,
        channel_id: ChannelId,
        entry: ModlogEntry,
    ) -> ModerationResult<MessageId>;

    async fn fetch_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> ModerationResult<MessageSnapshot>;

    /// Replace the text of one of the bot's messages
    async fn edit_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        content: String,
    ) -> ModerationResult<()>;

    /// Up to `limit` most recent messages, oldest first
    async fn fetch_recent_messages(
        &self,
        channel_id: ChannelId,
        limit: usize,
    ) -> ModerationResult<Vec<MessageSnapshot>>;

    async fn delete_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> ModerationResult<()>;

    async fn bulk_delete_messages(
        &self,
        channel_id: ChannelId,
        message_ids: Vec<MessageId>,
    ) -> ModerationResult<()>;
}

/// [`RemoteActions`] backed by serenity
#[derive(Clone)]
pub struct SerenityRemote {
    http: Arc<Http>,
    cache: Arc<Cache>,
    bot_id: UserId,
}

impl SerenityRemote {
    pub fn new(http: Arc<Http>, cache: Arc<Cache>, bot_id: UserId) -> Self {
        Self { http, cache, bot_id }
    }
}

fn is_not_found(error: &serenity::Error) -> bool {
    matches!(
        error,
        serenity::Error::Http(HttpError::UnsuccessfulRequest(response))
            if response.status_code.as_u16() == 404
    )
}

#[async_trait::async_trait]
impl RemoteActions for SerenityRemote {
    fn current_user_id(&self) -> UserId {
        self.bot_id
    }

    async fn fetch_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> ModerationResult<MemberSnapshot> {
        match guild_id.member(&self.http, user_id).await {
            Ok(member) => Ok(MemberSnapshot::from(&member)),
            Err(e) if is_not_found(&e) => Err(ModerationError::MemberNotFound(user_id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn add_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        reason: Option<String>,
    ) -> ModerationResult<()> {
        self.http
            .add_member_role(guild_id, user_id, role_id, reason.as_deref())
            .await?;
        Ok(())
    }

    async fn remove_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        reason: Option<String>,
    ) -> ModerationResult<()> {
        self.http
            .remove_member_role(guild_id, user_id, role_id, reason.as_deref())
            .await?;
        Ok(())
    }

    async fn ban(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        reason: String,
    ) -> ModerationResult<()> {
        guild_id
            .ban_with_reason(&self.http, user_id, 1, &reason)
            .await?;
        Ok(())
    }

    async fn unban(&self, guild_id: GuildId, user_id: UserId) -> ModerationResult<()> {
        guild_id.unban(&self.http, user_id).await?;
        Ok(())
    }

    async fn kick(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        reason: String,
    ) -> ModerationResult<()> {
        guild_id
            .kick_with_reason(&self.http, user_id, &reason)
            .await?;
        Ok(())
    }

    fn guild_channels(&self, guild_id: GuildId) -> Option<Vec<ChannelSnapshot>> {
        // The cache guard is a read lock on the guild; copy out and release it
        let guild = self.cache.guild(guild_id)?;
        Some(guild.channels.values().map(ChannelSnapshot::from).collect())
    }

    async fn set_channel_overwrite(
        &self,
        channel_id: ChannelId,
        overwrite: RoleOverwrite,
    ) -> ModerationResult<()> {
        let target = PermissionOverwrite {
            allow: overwrite.allow,
            deny: overwrite.deny,
            kind: PermissionOverwriteType::Role(overwrite.role_id),
        };
        channel_id.create_permission(&self.http, target).await?;
        Ok(())
    }

    async fn send_message(&self, channel_id: ChannelId, content: String) -> ModerationResult<()> {
        channel_id.say(&self.http, content).await?;
        Ok(())
    }

    async fn post_modlog(
        &self,
        channel_id: ChannelId,
        entry: ModlogEntry,
    ) -> ModerationResult<MessageId> {
        let message = channel_id.say(&self.http, entry.to_string()).await?;
        Ok(message.id)
    }

    async fn fetch_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> ModerationResult<MessageSnapshot> {
        let message = channel_id.message(&self.http, message_id).await?;
        Ok(MessageSnapshot::from(&message))
    }

    async fn edit_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        content: String,
    ) -> ModerationResult<()> {
        channel_id
            .edit_message(&self.http, message_id, EditMessage::new().content(content))
            .await?;
        Ok(())
    }

    async fn fetch_recent_messages(
        &self,
        channel_id: ChannelId,
        limit: usize,
    ) -> ModerationResult<Vec<MessageSnapshot>> {
        let mut collected: Vec<MessageSnapshot> = Vec::with_capacity(limit);
        let mut before: Option<MessageId> = None;

        while collected.len() < limit {
            let page = (limit - collected.len()).min(HISTORY_PAGE);
            let mut request = GetMessages::new().limit(u8::try_from(page).unwrap_or(100));
            if let Some(id) = before {
                request = request.before(id);
            }

            // Newest first
            let batch = channel_id.messages(&self.http, request).await?;
            let exhausted = batch.len() < page;
            before = batch.last().map(|message| message.id);
            collected.extend(batch.iter().map(MessageSnapshot::from));

            if exhausted || before.is_none() {
                break;
            }
        }

        collected.reverse();
        Ok(collected)
    }

    async fn delete_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> ModerationResult<()> {
        channel_id.delete_message(&self.http, message_id).await?;
        Ok(())
    }

    async fn bulk_delete_messages(
        &self,
        channel_id: ChannelId,
        message_ids: Vec<MessageId>,
    ) -> ModerationResult<()> {
        channel_id.delete_messages(&self.http, &message_ids).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overwrite_lookup_by_role() {
        let channel = ChannelSnapshot {
            id: ChannelId::new(1),
            guild_id: GuildId::new(2),
            role_overwrites: vec![
                RoleOverwrite {
                    role_id: RoleId::new(10),
                    allow: Permissions::VIEW_CHANNEL,
                    deny: Permissions::empty(),
                },
                RoleOverwrite {
                    role_id: RoleId::new(11),
                    allow: Permissions::empty(),
                    deny: Permissions::SEND_MESSAGES,
                },
            ],
        };

        let found = channel.overwrite_for(RoleId::new(11)).unwrap();
        assert_eq!(found.deny, Permissions::SEND_MESSAGES);
        assert!(channel.overwrite_for(RoleId::new(12)).is_none());
    }

    #[test]
    fn test_modlog_line() {
        let entry = ModlogEntry {
            action: ModlogAction::Muted,
            user_id: UserId::new(5),
            author_id: Some(UserId::new(6)),
            reason: "spam".to_string(),
            duration: Some(chrono::Duration::minutes(10)),
        };
        assert_eq!(entry.to_string(), "**Muted** <@5> for 10m by <@6>: spam");

        let entry = ModlogEntry {
            action: ModlogAction::Banned,
            user_id: UserId::new(5),
            author_id: None,
            reason: "(No reason specified)".to_string(),
            duration: None,
        };
        assert!(entry.to_string().contains("unknown moderator"));
    }

    #[test]
    fn test_replace_modlog_reason() {
        let line = "**Banned** <@5> for 60m by <@6>: raid: round two";
        assert_eq!(
            replace_modlog_reason(line, "ban evasion", UserId::new(7)).unwrap(),
            "**Banned** <@5> for 60m by <@6>: ban evasion (updated by <@7>)"
        );
        assert!(replace_modlog_reason("hello: there", "x", UserId::new(7)).is_none());
        assert!(replace_modlog_reason("**Kicked** <@5>", "x", UserId::new(7)).is_none());
    }

    #[test]
    fn test_remote_actions_is_object_safe() {
        fn assert_dyn(_: Option<&dyn RemoteActions>) {}
        assert_dyn(None);
    }
}
