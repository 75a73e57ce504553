//! Stateful in-memory stand-in for Discord used by the moderation tests

use crate::moderation::{
    ChannelSnapshot, MemberSnapshot, MessageSnapshot, ModerationError, ModerationResult,
    ModlogEntry, RemoteActions, RoleOverwrite, SubjectKey,
};
use serenity::all::{ChannelId, GuildId, MessageId, RoleId, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

pub const BOT_ID: UserId = UserId::new(999);

/// A mutation issued against the fake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    AddRole(GuildId, UserId, RoleId),
    RemoveRole(GuildId, UserId, RoleId),
    Ban(GuildId, UserId),
    Unban(GuildId, UserId),
    Kick(GuildId, UserId),
    SetOverwrite(ChannelId, RoleOverwrite),
    SendMessage(ChannelId, String),
    Modlog(ChannelId, ModlogEntry),
    EditMessage(ChannelId, MessageId, String),
    DeleteMessage(ChannelId, MessageId),
    BulkDelete(ChannelId, Vec<MessageId>),
}

#[derive(Default)]
struct State {
    members: HashMap<SubjectKey, Vec<RoleId>>,
    channels: HashMap<GuildId, Vec<ChannelSnapshot>>,
    bans: HashSet<SubjectKey>,
    messages: HashMap<ChannelId, Vec<MessageSnapshot>>,
    calls: Vec<RemoteCall>,
    role_failure: Option<String>,
    ban_failure: Option<String>,
    overwrite_failures: HashMap<ChannelId, String>,
    send_failures: HashMap<ChannelId, String>,
    next_message_id: u64,
}

#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<State>,
}

fn failure(message: &str) -> ModerationError {
    ModerationError::remote(Some(message.to_string()))
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn add_member(&self, guild_id: GuildId, user_id: UserId, roles: &[RoleId]) {
        self.with(|s| s.members.insert((guild_id, user_id), roles.to_vec()));
    }

    pub fn remove_member(&self, guild_id: GuildId, user_id: UserId) {
        self.with(|s| s.members.remove(&(guild_id, user_id)));
    }

    /// Give a member a role outside of the bot
    pub fn grant(&self, guild_id: GuildId, user_id: UserId, role_id: RoleId) {
        self.with(|s| {
            if let Some(roles) = s.members.get_mut(&(guild_id, user_id)) {
                if !roles.contains(&role_id) {
                    roles.push(role_id);
                }
            }
        });
    }

    pub fn roles_of(&self, guild_id: GuildId, user_id: UserId) -> Vec<RoleId> {
        self.with(|s| s.members.get(&(guild_id, user_id)).cloned().unwrap_or_default())
    }

    pub fn is_banned(&self, guild_id: GuildId, user_id: UserId) -> bool {
        self.with(|s| s.bans.contains(&(guild_id, user_id)))
    }

    pub fn add_channel(&self, channel: ChannelSnapshot) {
        self.with(|s| s.channels.entry(channel.guild_id).or_default().push(channel));
    }

    pub fn channel(&self, guild_id: GuildId, channel_id: ChannelId) -> Option<ChannelSnapshot> {
        self.with(|s| {
            s.channels
                .get(&guild_id)
                .and_then(|channels| channels.iter().find(|c| c.id == channel_id).cloned())
        })
    }

    pub fn set_messages(&self, channel_id: ChannelId, messages: Vec<MessageSnapshot>) {
        self.with(|s| s.messages.insert(channel_id, messages));
    }

    pub fn fail_role_changes(&self, message: &str) {
        self.with(|s| s.role_failure = Some(message.to_string()));
    }

    pub fn fail_bans(&self, message: &str) {
        self.with(|s| s.ban_failure = Some(message.to_string()));
    }

    pub fn fail_overwrite(&self, channel_id: ChannelId, message: &str) {
        self.with(|s| s.overwrite_failures.insert(channel_id, message.to_string()));
    }

    /// Make sends and modlog posts to `channel_id` fail
    pub fn fail_sends(&self, channel_id: ChannelId, message: &str) {
        self.with(|s| s.send_failures.insert(channel_id, message.to_string()));
    }

    /// Current text of a message posted to or placed in `channel_id`
    pub fn message_content(&self, channel_id: ChannelId, message_id: MessageId) -> Option<String> {
        self.with(|s| {
            s.messages
                .get(&channel_id)?
                .iter()
                .find(|message| message.id == message_id)
                .map(|message| message.content.clone())
        })
    }

    pub fn sent_messages(&self, channel_id: ChannelId) -> Vec<String> {
        self.with(|s| {
            s.calls
                .iter()
                .filter_map(|call| match call {
                    RemoteCall::SendMessage(channel, content) if *channel == channel_id => {
                        Some(content.clone())
                    }
                    _ => None,
                })
                .collect()
        })
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.with(|s| s.calls.clone())
    }

    pub fn clear_calls(&self) {
        self.with(|s| s.calls.clear());
    }

    pub fn modlog_entries(&self) -> Vec<ModlogEntry> {
        self.with(|s| {
            s.calls
                .iter()
                .filter_map(|call| match call {
                    RemoteCall::Modlog(_, entry) => Some(entry.clone()),
                    _ => None,
                })
                .collect()
        })
    }

    pub fn overwrite_calls(&self) -> usize {
        self.with(|s| {
            s.calls
                .iter()
                .filter(|call| matches!(call, RemoteCall::SetOverwrite(..)))
                .count()
        })
    }
}

#[async_trait::async_trait]
impl RemoteActions for FakeRemote {
    fn current_user_id(&self) -> UserId {
        BOT_ID
    }

    async fn fetch_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> ModerationResult<MemberSnapshot> {
        self.with(|s| {
            s.members
                .get(&(guild_id, user_id))
                .map(|roles| MemberSnapshot {
                    user_id,
                    roles: roles.clone(),
                })
                .ok_or(ModerationError::MemberNotFound(user_id))
        })
    }

    async fn add_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        _reason: Option<String>,
    ) -> ModerationResult<()> {
        self.with(|s| {
            s.calls.push(RemoteCall::AddRole(guild_id, user_id, role_id));
            if let Some(message) = &s.role_failure {
                return Err(failure(message));
            }
            let roles = s
                .members
                .get_mut(&(guild_id, user_id))
                .ok_or_else(|| failure("Unknown Member"))?;
            if !roles.contains(&role_id) {
                roles.push(role_id);
            }
            Ok(())
        })
    }

    async fn remove_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        _reason: Option<String>,
    ) -> ModerationResult<()> {
        self.with(|s| {
            s.calls.push(RemoteCall::RemoveRole(guild_id, user_id, role_id));
            if let Some(message) = &s.role_failure {
                return Err(failure(message));
            }
            let roles = s
                .members
                .get_mut(&(guild_id, user_id))
                .ok_or_else(|| failure("Unknown Member"))?;
            roles.retain(|role| *role != role_id);
            Ok(())
        })
    }

    async fn ban(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        _reason: String,
    ) -> ModerationResult<()> {
        self.with(|s| {
            s.calls.push(RemoteCall::Ban(guild_id, user_id));
            if let Some(message) = &s.ban_failure {
                return Err(failure(message));
            }
            s.members.remove(&(guild_id, user_id));
            s.bans.insert((guild_id, user_id));
            Ok(())
        })
    }

    async fn unban(&self, guild_id: GuildId, user_id: UserId) -> ModerationResult<()> {
        self.with(|s| {
            s.calls.push(RemoteCall::Unban(guild_id, user_id));
            if s.bans.remove(&(guild_id, user_id)) {
                Ok(())
            } else {
                Err(failure("Unknown Ban"))
            }
        })
    }

    async fn kick(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        _reason: String,
    ) -> ModerationResult<()> {
        self.with(|s| {
            s.calls.push(RemoteCall::Kick(guild_id, user_id));
            s.members
                .remove(&(guild_id, user_id))
                .map(|_| ())
                .ok_or_else(|| failure("Unknown Member"))
        })
    }

    fn guild_channels(&self, guild_id: GuildId) -> Option<Vec<ChannelSnapshot>> {
        self.with(|s| s.channels.get(&guild_id).cloned())
    }

    async fn set_channel_overwrite(
        &self,
        channel_id: ChannelId,
        overwrite: RoleOverwrite,
    ) -> ModerationResult<()> {
        self.with(|s| {
            s.calls.push(RemoteCall::SetOverwrite(channel_id, overwrite));
            if let Some(message) = s.overwrite_failures.get(&channel_id) {
                return Err(failure(message));
            }
            let channel = s
                .channels
                .values_mut()
                .flat_map(|channels| channels.iter_mut())
                .find(|channel| channel.id == channel_id)
                .ok_or_else(|| failure("Unknown Channel"))?;
            channel
                .role_overwrites
                .retain(|existing| existing.role_id != overwrite.role_id);
            channel.role_overwrites.push(overwrite);
            Ok(())
        })
    }

    async fn send_message(&self, channel_id: ChannelId, content: String) -> ModerationResult<()> {
        self.with(|s| {
            if let Some(message) = s.send_failures.get(&channel_id) {
                return Err(failure(message));
            }
            s.calls.push(RemoteCall::SendMessage(channel_id, content));
            Ok(())
        })
    }

    async fn post_modlog(
        &self,
        channel_id: ChannelId,
        entry: ModlogEntry,
    ) -> ModerationResult<MessageId> {
        self.with(|s| {
            if let Some(message) = s.send_failures.get(&channel_id) {
                return Err(failure(message));
            }
            s.next_message_id += 1;
            let id = MessageId::new(10_000 + s.next_message_id);
            s.messages.entry(channel_id).or_default().push(MessageSnapshot {
                id,
                author_id: BOT_ID,
                content: entry.to_string(),
                timestamp: chrono::Utc::now(),
            });
            s.calls.push(RemoteCall::Modlog(channel_id, entry));
            Ok(id)
        })
    }

    async fn fetch_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> ModerationResult<MessageSnapshot> {
        self.with(|s| {
            s.messages
                .get(&channel_id)
                .and_then(|messages| messages.iter().find(|message| message.id == message_id))
                .cloned()
                .ok_or_else(|| failure("Unknown Message"))
        })
    }

    async fn edit_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        content: String,
    ) -> ModerationResult<()> {
        self.with(|s| {
            s.calls
                .push(RemoteCall::EditMessage(channel_id, message_id, content.clone()));
            let message = s
                .messages
                .get_mut(&channel_id)
                .and_then(|messages| messages.iter_mut().find(|message| message.id == message_id))
                .ok_or_else(|| failure("Unknown Message"))?;
            message.content = content;
            Ok(())
        })
    }

    async fn fetch_recent_messages(
        &self,
        channel_id: ChannelId,
        limit: usize,
    ) -> ModerationResult<Vec<MessageSnapshot>> {
        self.with(|s| {
            let messages = s.messages.get(&channel_id).cloned().unwrap_or_default();
            let skip = messages.len().saturating_sub(limit);
            Ok(messages.into_iter().skip(skip).collect())
        })
    }

    async fn delete_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> ModerationResult<()> {
        self.with(|s| {
            s.calls.push(RemoteCall::DeleteMessage(channel_id, message_id));
            if let Some(messages) = s.messages.get_mut(&channel_id) {
                messages.retain(|message| message.id != message_id);
            }
            Ok(())
        })
    }

    async fn bulk_delete_messages(
        &self,
        channel_id: ChannelId,
        message_ids: Vec<MessageId>,
    ) -> ModerationResult<()> {
        self.with(|s| {
            if let Some(messages) = s.messages.get_mut(&channel_id) {
                messages.retain(|message| !message_ids.contains(&message.id));
            }
            s.calls.push(RemoteCall::BulkDelete(channel_id, message_ids));
            Ok(())
        })
    }
}
