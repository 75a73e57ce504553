//! Command gate
//!
//! Checks a moderator command before anything is mutated: the guild has a
//! configuration, the invoker is allowed to run the command, the command is
//! enabled and a reason is present when one is required.

use crate::config::{CommandSettings, ModCommand, ModerationConfig};
use crate::moderation::{ModerationError, ModerationResult};
use chrono::{DateTime, Duration, Utc};
use serenity::all::{Permissions, RoleId, UserId};

/// Reason recorded when an optional reason is left out
pub const NO_REASON: &str = "(No reason specified)";

/// Longest duration a timed action may run
pub const MAX_DURATION_DAYS: i64 = 3650;

/// Who is running a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoker {
    pub user_id: UserId,
    pub roles: Vec<RoleId>,
    /// Effective permissions in the invoking channel
    pub permissions: Permissions,
}

impl Invoker {
    fn has_any_role(&self, roles: &[RoleId]) -> bool {
        self.roles.iter().any(|role| roles.contains(role))
    }
}

/// Check the invoker may run `command` and that it is enabled
///
/// # Errors
/// `ConfigurationMissing`, `PermissionDenied` or `CommandDisabled`, checked in
/// that order.
pub fn authorize<'a>(
    config: Option<&'a ModerationConfig>,
    command: ModCommand,
    invoker: &Invoker,
) -> ModerationResult<&'a CommandSettings> {
    let config = config.ok_or_else(|| {
        ModerationError::ConfigurationMissing(
            "Moderation is not configured on this server".to_string(),
        )
    })?;
    let settings = config.command(command);

    let role_granted = !settings.required_roles.is_empty()
        && invoker.has_any_role(&settings.required_roles);
    if !role_granted {
        let needed = command.legacy_permission();
        if !invoker.permissions.administrator() && !invoker.permissions.contains(needed) {
            return Err(ModerationError::PermissionDenied {
                command: command.to_string(),
                permission: needed.get_permission_names().join(", "),
            });
        }
    }

    if !settings.enabled {
        return Err(ModerationError::CommandDisabled(command.to_string()));
    }
    Ok(settings)
}

/// Validate a command invocation and return the effective reason
///
/// # Errors
/// Everything [`authorize`] returns, then `ReasonRequired`.
pub fn check(
    config: Option<&ModerationConfig>,
    command: ModCommand,
    invoker: &Invoker,
    reason: Option<&str>,
) -> ModerationResult<String> {
    let settings = authorize(config, command, invoker)?;

    let reason = reason.map(str::trim).unwrap_or_default();
    if !command.takes_reason() {
        return Ok(reason.to_string());
    }
    if reason.is_empty() {
        if !settings.reason_optional {
            return Err(ModerationError::ReasonRequired);
        }
        return Ok(NO_REASON.to_string());
    }
    Ok(reason.to_string())
}

fn too_long() -> ModerationError {
    ModerationError::ValidationFailed(format!(
        "Durations are limited to {MAX_DURATION_DAYS} days"
    ))
}

/// When an action lasting `duration` from `now` runs out
///
/// # Errors
/// Returns a validation error for durations that are not positive or exceed
/// [`MAX_DURATION_DAYS`].
pub fn expiry_after(now: DateTime<Utc>, duration: Duration) -> ModerationResult<DateTime<Utc>> {
    if duration <= Duration::zero() {
        return Err(ModerationError::ValidationFailed(
            "Duration must be positive".to_string(),
        ));
    }
    if duration > Duration::days(MAX_DURATION_DAYS) {
        return Err(too_long());
    }
    now.checked_add_signed(duration).ok_or_else(too_long)
}

/// Parse a duration like `90`, `30m`, `2h30m` or `7d`
///
/// A bare number counts minutes. Units are `s`, `m`, `h`, `d` and `w`.
///
/// # Errors
/// Returns a validation error for malformed, zero or overlong durations.
pub fn parse_duration(raw: &str) -> ModerationResult<Duration> {
    let invalid = || ModerationError::ValidationFailed(format!("Invalid duration: `{raw}`"));
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(invalid());
    }
    if let Ok(minutes) = raw.parse::<i64>() {
        let total = Duration::try_minutes(minutes)
            .filter(|d| *d > Duration::zero())
            .ok_or_else(invalid)?;
        return within_limit(total);
    }

    let mut total = Duration::zero();
    let mut digits = String::new();
    for c in raw.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let amount: i64 = digits.parse().map_err(|_| invalid())?;
        digits.clear();
        let part = match c.to_ascii_lowercase() {
            's' => Duration::try_seconds(amount),
            'm' => Duration::try_minutes(amount),
            'h' => Duration::try_hours(amount),
            'd' => Duration::try_days(amount),
            'w' => Duration::try_weeks(amount),
            _ => None,
        }
        .ok_or_else(invalid)?;
        total = total.checked_add(&part).ok_or_else(invalid)?;
    }
    if !digits.is_empty() || total <= Duration::zero() {
        return Err(invalid());
    }
    within_limit(total)
}

fn within_limit(duration: Duration) -> ModerationResult<Duration> {
    if duration > Duration::days(MAX_DURATION_DAYS) {
        return Err(too_long());
    }
    Ok(duration)
}
