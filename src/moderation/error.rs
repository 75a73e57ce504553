//! Error types for the moderation system
//!
//! Validation errors are produced before any state is touched and are shown
//! to the invoking moderator as-is. Remote and persistence errors happen while
//! mutating and are either reported to the moderator or logged.

use serenity::all::UserId;
use serenity::http::HttpError;
use thiserror::Error;

/// Reply shown when the remote side gave no message of its own
pub const GENERIC_FAILURE: &str = "An error occurred";

/// Errors that can occur during moderation operations
#[derive(Debug, Error)]
pub enum ModerationError {
    /// No config for the guild, or the feature needs something that is not set up
    #[error("{0}")]
    ConfigurationMissing(String),

    /// Invoker has neither a required role nor the fallback permission
    #[error(
        "The **{command}** command requires the **{permission}** permission in this channel, you don't have it."
    )]
    PermissionDenied { command: String, permission: String },

    /// Command is turned off for the guild
    #[error(
        "The **{0}** command is disabled on this server. Enable it in the moderation settings."
    )]
    CommandDisabled(String),

    /// Guild requires a reason for this command
    #[error("Reason is required.")]
    ReasonRequired,

    /// Input validation failed
    #[error("{0}")]
    ValidationFailed(String),

    /// Target member could not be fetched
    #[error("Member not found: {0}")]
    MemberNotFound(UserId),

    /// Discord rejected the request
    #[error("Discord API error: {}", .message.as_deref().unwrap_or(GENERIC_FAILURE))]
    RemoteApi { message: Option<String> },

    /// A remote step failed and the moderator is told what to check
    #[error("{0}")]
    RemoteFailed(String),

    /// Record or key/value store failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Generic error
    #[error("Moderation error: {0}")]
    Other(String),
}

impl ModerationError {
    /// Remote error with an optional Discord-supplied message
    #[must_use]
    pub fn remote(message: Option<String>) -> Self {
        Self::RemoteApi { message }
    }

    /// Whether this error was raised before anything was mutated
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::ConfigurationMissing(_)
                | Self::PermissionDenied { .. }
                | Self::CommandDisabled(_)
                | Self::ReasonRequired
                | Self::ValidationFailed(_)
                | Self::MemberNotFound(_)
        )
    }

    /// Text to reply to the moderator with
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::RemoteApi {
                message: Some(message),
            } => format!("API Error: {message}"),
            Self::RemoteApi { message: None } | Self::Persistence(_) | Self::Other(_) => {
                GENERIC_FAILURE.to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<serenity::Error> for ModerationError {
    fn from(error: serenity::Error) -> Self {
        let message = match &error {
            serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) => {
                Some(response.error.message.clone())
            }
            _ => None,
        };
        tracing::debug!(error = %error, "Discord request failed");
        Self::RemoteApi { message }
    }
}

impl From<serde_yaml::Error> for ModerationError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::Persistence(error.to_string())
    }
}

impl From<std::io::Error> for ModerationError {
    fn from(error: std::io::Error) -> Self {
        Self::Persistence(error.to_string())
    }
}

/// Convert a string into a `ModerationError`
impl From<String> for ModerationError {
    fn from(message: String) -> Self {
        Self::Other(message)
    }
}

/// Result type for moderation operations
pub type ModerationResult<T> = Result<T, ModerationError>;
