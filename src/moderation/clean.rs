//! Message selection for bulk deletes

use crate::moderation::{MessageSnapshot, ModerationError, ModerationResult, RemoteActions};
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serenity::all::{ChannelId, MessageId, UserId};

/// Most messages removed by one clean
pub const MAX_DELETE: usize = 100;
/// Most messages fetched when looking for matches
pub const MAX_FETCH: usize = 1000;
/// Fetch multiplier when a filter will discard messages
pub const FILTERED_FETCH_FACTOR: usize = 50;
/// Discord refuses to bulk delete anything older than two weeks; keep a minute of slack
pub const BULK_DELETE_CEILING_SECS: i64 = 14 * 24 * 60 * 60 - 60;

const CASE_INSENSITIVE: &str = "(?i)";

/// Compile a content filter, optionally case-insensitive
///
/// # Errors
/// Returns a validation error when the pattern does not compile.
pub fn compile_pattern(raw: &str, case_insensitive: bool) -> ModerationResult<Regex> {
    let source = if case_insensitive && !raw.starts_with(CASE_INSENSITIVE) {
        format!("{CASE_INSENSITIVE}{raw}")
    } else {
        raw.to_string()
    };
    Regex::new(&source)
        .map_err(|e| ModerationError::ValidationFailed(format!("Invalid regex: {e}")))
}

/// What a clean keeps looking for
#[derive(Debug, Clone)]
pub struct CleanFilter {
    pub user: Option<UserId>,
    pub pattern: Option<Regex>,
    pub max_age: Option<Duration>,
    pub want: usize,
}

/// Pick the messages to delete
///
/// `candidates` are in chronological order. They are walked newest first and
/// the result is most recent first.
#[must_use]
pub fn select(
    candidates: &[MessageSnapshot],
    filter: &CleanFilter,
    now: DateTime<Utc>,
) -> Vec<MessageId> {
    let want = filter.want.min(MAX_DELETE);
    let ceiling = Duration::seconds(BULK_DELETE_CEILING_SECS);
    let mut selected = Vec::with_capacity(want);

    for message in candidates.iter().rev() {
        if selected.len() >= want {
            break;
        }
        if filter.user.is_some_and(|user| message.author_id != user) {
            continue;
        }
        let age = now - message.timestamp;
        if age > ceiling {
            continue;
        }
        if filter
            .pattern
            .as_ref()
            .is_some_and(|pattern| !pattern.is_match(&message.content))
        {
            continue;
        }
        if filter.max_age.is_some_and(|max_age| age > max_age) {
            continue;
        }
        selected.push(message.id);
    }

    selected
}

/// A clean command as the moderator typed it
#[derive(Debug, Clone)]
pub struct CleanRequest {
    pub invoker: UserId,
    pub count: i64,
    pub user: Option<UserId>,
    pub pattern: Option<Regex>,
    pub max_age: Option<Duration>,
    /// The command arrived as a channel message that should go too
    pub include_invocation: bool,
}

/// Filter and fetch size derived from a request
#[derive(Debug, Clone)]
pub struct CleanPlan {
    pub filter: CleanFilter,
    pub fetch_limit: usize,
}

impl CleanRequest {
    /// Work out how much to fetch and how much to delete
    ///
    /// # Errors
    /// Returns a validation error when nothing would be deleted.
    pub fn plan(self) -> ModerationResult<CleanPlan> {
        let mut count = self.count;
        if self.include_invocation && self.user.is_none_or(|user| user == self.invoker) {
            count += 1;
        }
        if count < 1 {
            return Err(ModerationError::ValidationFailed(
                "Can't delete nothing".to_string(),
            ));
        }
        let want = usize::try_from(count).unwrap_or(MAX_DELETE).min(MAX_DELETE);

        let filtered = self.user.is_some() || self.pattern.is_some() || self.max_age.is_some();
        let fetch_limit = if filtered {
            want * FILTERED_FETCH_FACTOR
        } else {
            want
        }
        .min(MAX_FETCH);

        Ok(CleanPlan {
            filter: CleanFilter {
                user: self.user,
                pattern: self.pattern,
                max_age: self.max_age,
                want,
            },
            fetch_limit,
        })
    }
}

/// Delete the selected messages, one call either way
///
/// # Errors
/// Returns the remote failure.
pub async fn delete_selected(
    remote: &dyn RemoteActions,
    channel_id: ChannelId,
    ids: Vec<MessageId>,
) -> ModerationResult<usize> {
    match ids.as_slice() {
        [] => Ok(0),
        [id] => {
            remote.delete_message(channel_id, *id).await?;
            Ok(1)
        }
        _ => {
            let count = ids.len();
            remote.bulk_delete_messages(channel_id, ids).await?;
            Ok(count)
        }
    }
}

/// Fetch, select and delete in one go, returning how many messages went
///
/// # Errors
/// Returns remote failures of the fetch or delete.
pub async fn run(
    remote: &dyn RemoteActions,
    channel_id: ChannelId,
    plan: CleanPlan,
) -> ModerationResult<usize> {
    let candidates = remote
        .fetch_recent_messages(channel_id, plan.fetch_limit)
        .await?;
    let ids = select(&candidates, &plan.filter, Utc::now());
    delete_selected(remote, channel_id, ids).await
}
